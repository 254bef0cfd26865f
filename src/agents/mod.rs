// =============================================================================
// Agents — one per regime, dispatched from a fixed tagged-variant table
// =============================================================================
//
// spec.md §9: "Regime/agent polymorphism — tagged variants over a fixed set
// {trend, reversal, range, filter}; a dispatch table maps regime -> agent.
// Avoid dynamic method lookup." `decide` below is that table: a plain
// `match`, not a trait-object registry.
//
// Every agent shares the "directness rule" (§4.5): criteria are
// pre-computed in code; the LLM is consulted only when the criteria are
// ambiguous, and it receives the criteria table pre-evaluated — it must not
// recompute them.

pub mod range;
pub mod reversal;
pub mod trend;

use std::sync::Arc;

use tracing::warn;

use crate::config::{AiAgentsConfig, AtrStopsConfig};
use crate::llm::{parse_llm_reply, ChatMessage, CircuitBreaker, LlmProvider, LlmRole, TokenBucket};
use crate::market_data::Snapshot;
use crate::types::{Action, AgentKind, Decision, Regime};

/// Shared collaborators every agent needs to reach the deep LLM.
pub struct AgentDeps {
    pub llm: Arc<dyn LlmProvider>,
    pub deep_breaker: Arc<CircuitBreaker>,
    pub token_bucket: Arc<TokenBucket>,
}

/// Dispatch table: regime -> agent. `LowVolatility` never reaches here in
/// practice (the volatility gate holds it upstream); it is handled as a
/// defensive HOLD rather than panicking on an unreachable-by-contract input.
pub async fn decide(
    regime: Regime,
    snapshot: &Snapshot,
    config: &AiAgentsConfig,
    atr_stops: &AtrStopsConfig,
    deps: &AgentDeps,
) -> Decision {
    match regime {
        Regime::Trending => trend::decide(snapshot, config, atr_stops, deps).await,
        Regime::Reversal => reversal::decide(snapshot, config, deps).await,
        Regime::Ranging => range::decide(snapshot, config, atr_stops, deps).await,
        Regime::LowVolatility => {
            warn!(symbol = %snapshot.symbol, "low_volatility snapshot reached agent dispatch; should have been gated upstream");
            Decision::hold_filtered("low_volatility: no agent defined")
        }
    }
}

/// ATR-derived stop-loss/take-profit pair for a deterministic (non-LLM)
/// decision, per spec.md §6's `risk_management.atr_stops` keys. The LLM path
/// supplies its own SL/TP in the JSON reply (§4.5.4); only the direct,
/// criteria-table-only paths in `trend`/`range` need this.
pub fn atr_stop_levels(side: Action, entry: f64, atr: f64, cfg: &AtrStopsConfig) -> (f64, f64) {
    let sl_distance = (atr * cfg.sl_multiplier).max(entry * cfg.min_distance_percent / 100.0);
    let tp_distance = atr * cfg.tp_multiplier;
    match side {
        Action::Buy => (entry - sl_distance, entry + tp_distance),
        Action::Sell | Action::Hold => (entry + sl_distance, entry - tp_distance),
    }
}

/// One pre-evaluated criterion in the table shown to the LLM.
pub struct Criterion {
    pub label: &'static str,
    pub met: bool,
}

/// Build the prompt described in spec.md §4.5.4: symbol/timeframe, labelled
/// indicator numbers, the pre-evaluated criteria table (✓/✗), order-book /
/// funding / OI summary, and the required JSON schema.
pub fn build_prompt(agent: AgentKind, snapshot: &Snapshot, side: Action, criteria: &[Criterion]) -> Vec<ChatMessage> {
    let ind = &snapshot.indicators;
    let ob = &snapshot.order_book;

    let criteria_table: String = criteria
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}. {} [{}]", i + 1, c.label, if c.met { "\u{2713}" } else { "\u{2717}" }))
        .collect::<Vec<_>>()
        .join("\n");

    let system = format!(
        "You are the {agent} agent of a spot-market trading system. A candidate {side} has been \
         pre-screened by deterministic code. The criteria table below is ALREADY EVALUATED — do \
         not recompute it, only reason about the ambiguous cases it leaves open. Respond with a \
         single JSON object matching exactly this schema: \
         {{\"decision\": \"BUY\"|\"SELL\"|\"HOLD\", \"confidence\": number in [0,1], \
         \"entry\": number, \"stop_loss\": number, \"take_profit\": number, \"reasoning\": string}}."
    );

    let user = format!(
        "symbol: {symbol}\ntimeframe: configured bar interval\nprice: {price}\n\n\
         indicators:\n  rsi={rsi:.2}\n  ema_20={ema20:.4}\n  ema_50={ema50:.4}\n  ema_200={ema200:.4}\n  \
         macd_histogram={macdh:.6}\n  bb_upper={bbu:.4}\n  bb_mid={bbm:.4}\n  bb_lower={bbl:.4}\n  \
         atr={atr:.4}\n  atr_pct={atrpct:.3}\n  adx={adx:.2}\n  volume_ratio={volr:.2}\n\n\
         criteria (pre-evaluated, do not recompute):\n{criteria_table}\n\n\
         order_book: imbalance={imb:.3} pressure={pressure} best_bid_wall={bidwall:?} best_ask_wall={askwall:?}\n\
         funding_rate={funding:?}\nopen_interest={oi:?}\nbtc_correlation={corr:?}\n",
        symbol = snapshot.symbol,
        price = snapshot.price,
        rsi = ind.rsi,
        ema20 = ind.ema_20,
        ema50 = ind.ema_50,
        ema200 = ind.ema_200,
        macdh = ind.macd_histogram,
        bbu = ind.bb_upper,
        bbm = ind.bb_mid,
        bbl = ind.bb_lower,
        atr = ind.atr,
        atrpct = ind.atr_pct,
        adx = ind.adx,
        volr = ind.volume_ratio,
        criteria_table = criteria_table,
        imb = ob.imbalance,
        pressure = ob.pressure,
        bidwall = ob.best_bid_wall_price,
        askwall = ob.best_ask_wall_price,
        funding = snapshot.funding_rate,
        oi = snapshot.open_interest,
        corr = snapshot.btc_correlation,
    );

    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

/// Consult the deep reasoner for an ambiguous criteria count. Honors the
/// circuit breaker and token bucket (spec.md §5); a denied/open call or a
/// transport failure degrades to HOLD rather than propagating the error —
/// the pipeline must always terminate in a Decision.
pub async fn consult_deep(
    agent: AgentKind,
    snapshot: &Snapshot,
    side: Action,
    criteria: &[Criterion],
    deps: &AgentDeps,
) -> Decision {
    if deps.deep_breaker.is_open() {
        warn!(symbol = %snapshot.symbol, %agent, "deep llm circuit breaker open, holding");
        return Decision::hold_filtered("deep llm circuit breaker open");
    }
    if !deps.token_bucket.try_acquire() {
        warn!(symbol = %snapshot.symbol, %agent, "llm token bucket exhausted, holding");
        return Decision::hold_filtered("llm call budget exhausted this minute");
    }

    let messages = build_prompt(agent, snapshot, side, criteria);
    match deps.llm.chat(LlmRole::Deep, &messages, false).await {
        Ok(text) => {
            deps.deep_breaker.record_success();
            let reply = parse_llm_reply(&text);
            Decision {
                action: reply.action,
                confidence: reply.confidence,
                entry_price: reply.entry,
                stop_loss: reply.stop_loss,
                take_profit: reply.take_profit,
                agent,
                reasoning: reply.reasoning,
            }
        }
        Err(e) => {
            deps.deep_breaker.record_failure();
            warn!(symbol = %snapshot.symbol, %agent, error = %e, "deep llm call failed");
            Decision::hold_filtered(format!("llm.transport: {e}"))
        }
    }
}

/// Count how many of `criteria` are met.
pub fn count_met(criteria: &[Criterion]) -> usize {
    criteria.iter().filter(|c| c.met).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AtrStopsConfig;

    fn cfg() -> AtrStopsConfig {
        AtrStopsConfig { sl_multiplier: 1.5, tp_multiplier: 2.7, min_distance_percent: 0.4 }
    }

    #[test]
    fn buy_stop_is_below_entry_and_target_above() {
        let (sl, tp) = atr_stop_levels(Action::Buy, 100.0, 2.0, &cfg());
        assert!((sl - 97.0).abs() < 1e-9); // 100 - 2*1.5
        assert!((tp - 105.4).abs() < 1e-9); // 100 + 2*2.7
    }

    #[test]
    fn sell_stop_is_above_entry_and_target_below() {
        let (sl, tp) = atr_stop_levels(Action::Sell, 100.0, 2.0, &cfg());
        assert!((sl - 103.0).abs() < 1e-9);
        assert!((tp - 94.6).abs() < 1e-9);
    }

    #[test]
    fn tiny_atr_still_respects_the_min_distance_floor() {
        let (sl, _tp) = atr_stop_levels(Action::Buy, 100.0, 0.01, &cfg());
        // 0.01*1.5=0.015 vs 100*0.4%=0.4 -- the floor wins.
        assert!((100.0 - sl - 0.4).abs() < 1e-9);
    }
}
