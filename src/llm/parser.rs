// =============================================================================
// LLM reply parser — three-stage, per spec.md §4.5.4 / §9
// =============================================================================
//
// 1. Strict JSON parse of the whole payload.
// 2. JSON embedded in long free text: scan **from the end**, balancing
//    braces, accept the outermost object that contains both `"decision"`
//    and `"confidence"`.
// 3. No JSON at all: keyword fallback over a synonym table, HOLD with
//    confidence 0 if no action dominates.

use serde::Deserialize;

use crate::types::Action;

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReply {
    pub action: Action,
    pub confidence: f64,
    pub entry: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub reasoning: String,
}

#[derive(Deserialize)]
struct RawReply {
    decision: String,
    confidence: f64,
    #[serde(default)]
    entry: Option<f64>,
    #[serde(default)]
    stop_loss: Option<f64>,
    #[serde(default)]
    take_profit: Option<f64>,
    #[serde(default)]
    reasoning: Option<String>,
}

impl RawReply {
    fn into_parsed(self) -> Option<ParsedReply> {
        let action = action_from_keyword(&self.decision)?;
        Some(ParsedReply {
            action,
            confidence: self.confidence.clamp(0.0, 1.0),
            entry: self.entry,
            stop_loss: self.stop_loss,
            take_profit: self.take_profit,
            reasoning: self.reasoning.unwrap_or_default(),
        })
    }
}

/// Parse an LLM reply through the three-stage cascade. Never fails: the
/// keyword fallback always produces a verdict, defaulting to HOLD/0.
pub fn parse_llm_reply(text: &str) -> ParsedReply {
    if let Some(reply) = strict_json(text) {
        return reply;
    }
    if let Some(reply) = balanced_brace_extract(text) {
        return reply;
    }
    keyword_fallback(text)
}

fn strict_json(text: &str) -> Option<ParsedReply> {
    let raw: RawReply = serde_json::from_str(text.trim()).ok()?;
    raw.into_parsed()
}

/// Scan from the end of `text`, balancing `{`/`}`, and return the first
/// (i.e. rightmost-starting) balanced object that parses and contains both
/// `decision` and `confidence`. Reasoner models tend to put the answer last,
/// after pages of chain-of-thought, so scanning from the tail finds the
/// real answer before any earlier JSON-shaped aside in the reasoning.
fn balanced_brace_extract(text: &str) -> Option<ParsedReply> {
    let bytes = text.as_bytes();
    let mut candidate_ends: Vec<usize> = Vec::new();
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'}' {
            candidate_ends.push(i);
        }
    }

    for &end in candidate_ends.iter().rev() {
        let mut depth = 0i32;
        let mut start = None;
        for i in (0..=end).rev() {
            match bytes[i] {
                b'}' => depth += 1,
                b'{' => {
                    depth -= 1;
                    if depth == 0 {
                        start = Some(i);
                        break;
                    }
                }
                _ => {}
            }
        }
        if let Some(start) = start {
            let candidate = &text[start..=end];
            if !candidate.contains("\"decision\"") || !candidate.contains("\"confidence\"") {
                continue;
            }
            if let Ok(raw) = serde_json::from_str::<RawReply>(candidate) {
                if let Some(parsed) = raw.into_parsed() {
                    return Some(parsed);
                }
            }
        }
    }
    None
}

/// Synonym table: `{BUY,LONG,compra}->BUY`, `{SELL,SHORT,venta}->SELL`,
/// `{HOLD,WAIT,NEUTRAL,espera}->HOLD`. Emits HOLD/confidence 0 if no keyword
/// dominates (spec.md §4.5.4).
fn keyword_fallback(text: &str) -> ParsedReply {
    let lower = text.to_lowercase();

    let buy_hits = count_hits(&lower, &["buy", "compra", "long"]);
    let sell_hits = count_hits(&lower, &["sell", "venta", "short"]);
    let hold_hits = count_hits(&lower, &["hold", "espera", "wait", "neutral"]);

    let action = if buy_hits > sell_hits && buy_hits > hold_hits && buy_hits > 0 {
        Action::Buy
    } else if sell_hits > buy_hits && sell_hits > hold_hits && sell_hits > 0 {
        Action::Sell
    } else {
        Action::Hold
    };

    ParsedReply {
        action,
        confidence: 0.0,
        entry: None,
        stop_loss: None,
        take_profit: None,
        reasoning: "keyword fallback: no structured JSON in reply".to_string(),
    }
}

fn count_hits(haystack: &str, needles: &[&str]) -> usize {
    needles.iter().filter(|n| haystack.contains(**n)).count()
}

fn action_from_keyword(word: &str) -> Option<Action> {
    let w = word.trim().to_uppercase();
    match w.as_str() {
        "BUY" | "LONG" | "COMPRA" => Some(Action::Buy),
        "SELL" | "SHORT" | "VENTA" => Some(Action::Sell),
        "HOLD" | "WAIT" | "NEUTRAL" | "ESPERA" => Some(Action::Hold),
        _ => None,
    }
}
