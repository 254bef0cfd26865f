// =============================================================================
// Trend agent — spec.md §4.5.1
// =============================================================================
//
// Four criteria, deterministically evaluated:
//   1. price positioned on the trend side of EMA200 (above for long-only spot
//      continuation, since shorting isn't offered — a break below disqualifies).
//   2. EMA50 > EMA200 (golden-cross structure) with EMA50 itself rising.
//   3. ADX >= config.min_adx_trend (trend strength floor).
//   4. a participation condition: either a volume-confirmed pullback
//      (volume_ratio >= min_volume_ratio and price within 1.5x ATR of EMA50)
//      or a breakout (ADX >= 35, a new 20-bar high, volume_ratio >= 1.0).
//
// 4/4 -> direct BUY, confidence derived from ADX/alignment strength, no LLM.
// 3/4 -> ambiguous, consult the deep reasoner.
// <=2/4 -> HOLD, no LLM (not worth spending a call on a weak trend).

use crate::agents::{atr_stop_levels, consult_deep, count_met, AgentDeps, Criterion};
use crate::config::{AiAgentsConfig, AtrStopsConfig};
use crate::indicators::ema::calculate_ema;
use crate::market_data::Snapshot;
use crate::types::{Action, AgentKind, Decision};

/// Breakout branch of criterion 4 (spec.md §4.5.1): ADX floor distinct from
/// the agent's own trend-strength gate, since a breakout needs markedly more
/// conviction than merely being "trending".
const BREAKOUT_ADX_FLOOR: f64 = 35.0;
const BREAKOUT_VOLUME_RATIO_FLOOR: f64 = 1.0;
const PULLBACK_ATR_MULTIPLE: f64 = 1.5;
const BREAKOUT_LOOKBACK_BARS: usize = 20;

pub async fn decide(snapshot: &Snapshot, config: &AiAgentsConfig, atr_stops: &AtrStopsConfig, deps: &AgentDeps) -> Decision {
    let ind = &snapshot.indicators;

    let above_ema200 = snapshot.price > ind.ema_200;
    let structure_aligned = ind.ema_50 > ind.ema_200 && ema_50_rising(&snapshot.ohlcv);
    let strong_adx = ind.adx >= config.min_adx_trend;

    let pullback = ind.volume_ratio >= config.min_volume_ratio && (snapshot.price - ind.ema_50).abs() <= PULLBACK_ATR_MULTIPLE * ind.atr;
    let breakout = ind.adx >= BREAKOUT_ADX_FLOOR
        && is_new_n_bar_high(&snapshot.ohlcv, snapshot.price, BREAKOUT_LOOKBACK_BARS)
        && ind.volume_ratio >= BREAKOUT_VOLUME_RATIO_FLOOR;
    let participation = pullback || breakout;

    let criteria = [
        Criterion { label: "price above EMA200", met: above_ema200 },
        Criterion { label: "EMA50 > EMA200 (trend structure)", met: structure_aligned },
        Criterion { label: "ADX above trend-strength floor", met: strong_adx },
        Criterion { label: "volume-confirmed pullback or breakout", met: participation },
    ];

    let met = count_met(&criteria);

    if met == 4 {
        let confidence = direct_confidence(ind.adx, config.min_adx_trend);
        let (stop_loss, take_profit) = atr_stop_levels(Action::Buy, snapshot.price, ind.atr, atr_stops);
        return Decision {
            action: Action::Buy,
            confidence,
            entry_price: Some(snapshot.price),
            stop_loss: Some(stop_loss),
            take_profit: Some(take_profit),
            agent: AgentKind::Trend,
            reasoning: "all four trend criteria met, emitted directly".to_string(),
        };
    }

    if met == 3 {
        return consult_deep(AgentKind::Trend, snapshot, Action::Buy, &criteria, deps).await;
    }

    Decision::hold_filtered(format!("trend agent: only {met}/4 criteria met"))
}

/// ADX headroom above the configured floor maps to [0.55, 0.95]; this agent
/// never emits above 0.95 directly — anything that confident gets a deep
/// second opinion rather than pure code issuing max confidence.
fn direct_confidence(adx: f64, floor: f64) -> f64 {
    let headroom = ((adx - floor) / 20.0).clamp(0.0, 1.0);
    (0.55 + headroom * 0.40).min(0.95)
}

/// EMA50's own slope: true once the series has at least two points and the
/// latest is above the previous one. `Indicators.ema_50` is only a current
/// scalar, so the slope is re-derived from the bar closes rather than read
/// off the snapshot.
fn ema_50_rising(ohlcv: &[crate::market_data::snapshot::OhlcvBar]) -> bool {
    let closes: Vec<f64> = ohlcv.iter().map(|b| b.close).collect();
    let series = calculate_ema(&closes, 50);
    match series.len() {
        0 | 1 => false,
        n => series[n - 1] > series[n - 2],
    }
}

/// True when `price` is at or above the highest high of the last `lookback`
/// bars — the breakout half of criterion 4.
fn is_new_n_bar_high(ohlcv: &[crate::market_data::snapshot::OhlcvBar], price: f64, lookback: usize) -> bool {
    if ohlcv.len() < lookback {
        return false;
    }
    let recent_high = ohlcv[ohlcv.len() - lookback..].iter().fold(f64::MIN, |acc, bar| acc.max(bar.high));
    price >= recent_high
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CircuitBreaker, LlmProvider, LlmRole, TokenBucket};
    use crate::market_data::snapshot::{Indicators, OhlcvBar, OrderBookSummary};
    use crate::market_data::{Pressure};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    struct StubProvider(&'static str);

    #[async_trait]
    impl LlmProvider for StubProvider {
        async fn chat(
            &self,
            _role: LlmRole,
            _messages: &[crate::llm::ChatMessage],
            _json_hint: bool,
        ) -> Result<String, crate::error::SathError> {
            Ok(self.0.to_string())
        }
    }

    fn deps_with(reply: &'static str) -> AgentDeps {
        AgentDeps {
            llm: Arc::new(StubProvider(reply)),
            deep_breaker: Arc::new(CircuitBreaker::new(3, Duration::from_secs(60))),
            token_bucket: Arc::new(TokenBucket::new(60)),
        }
    }

    /// 200 bars of steadily rising closes so EMA50's own slope is positive,
    /// with the final price sitting a pullback distance above EMA50.
    fn rising_ohlcv() -> Vec<OhlcvBar> {
        (0..200)
            .map(|i| {
                let close = 90.0 + i as f64 * 0.05;
                OhlcvBar { open: close - 0.2, high: close + 0.3, low: close - 0.5, close, volume: 1000.0 }
            })
            .collect()
    }

    fn base_snapshot() -> Snapshot {
        Snapshot {
            symbol: "ETHUSDT".to_string(),
            timestamp: chrono::Utc::now(),
            price: 100.0,
            ohlcv: rising_ohlcv(),
            indicators: Indicators {
                rsi: 55.0,
                ema_20: 99.0,
                ema_50: 98.0,
                ema_200: 90.0,
                macd_line: 0.5,
                macd_signal: 0.3,
                macd_histogram: 0.2,
                bb_upper: 105.0,
                bb_mid: 100.0,
                bb_lower: 95.0,
                atr: 2.0,
                atr_pct: 2.0,
                adx: 30.0,
                volume_mean_20: 900.0,
                volume_current: 1000.0,
                volume_ratio: 1.1,
            },
            order_book: OrderBookSummary {
                bids: vec![],
                asks: vec![],
                best_bid_wall_price: None,
                best_ask_wall_price: None,
                imbalance: 0.0,
                pressure: Pressure::Neutral,
            },
            funding_rate: None,
            open_interest: None,
            btc_correlation: None,
        }
    }

    fn config() -> AiAgentsConfig {
        AiAgentsConfig {
            min_volatility_percent: 0.5,
            min_volume_ratio: 0.3,
            min_adx_trend: 20.0,
        }
    }

    fn atr_stops() -> crate::config::AtrStopsConfig {
        crate::config::AtrStopsConfig { sl_multiplier: 1.5, tp_multiplier: 2.7, min_distance_percent: 0.4 }
    }

    #[tokio::test]
    async fn four_of_four_emits_directly_without_consulting_llm() {
        let snap = base_snapshot();
        let deps = deps_with("this should never be read");
        let decision = decide(&snap, &config(), &atr_stops(), &deps).await;
        assert_eq!(decision.action, Action::Buy);
        assert!(decision.confidence >= 0.55);
        assert_eq!(decision.agent, AgentKind::Trend);
        assert!(decision.stop_loss.unwrap() < decision.entry_price.unwrap());
        assert!(decision.take_profit.unwrap() > decision.entry_price.unwrap());
    }

    #[tokio::test]
    async fn three_of_four_consults_the_deep_llm() {
        let mut snap = base_snapshot();
        snap.indicators.volume_ratio = 0.1; // fails participation
        snap.price = 100.0; // still below bb_upper of 105, so participation fails
        let reply = r#"{"decision":"BUY","confidence":0.7,"entry":100.0,"stop_loss":95.0,"take_profit":110.0,"reasoning":"ok"}"#;
        let deps = deps_with(reply);
        let decision = decide(&snap, &config(), &atr_stops(), &deps).await;
        assert_eq!(decision.action, Action::Buy);
        assert!((decision.confidence - 0.7).abs() < 1e-9);
    }

    #[tokio::test]
    async fn two_of_four_holds_without_consulting_llm() {
        let mut snap = base_snapshot();
        snap.indicators.adx = 5.0; // fails ADX floor
        snap.indicators.volume_ratio = 0.1;
        snap.price = 100.0;
        let deps = deps_with("should never be called");
        let decision = decide(&snap, &config(), &atr_stops(), &deps).await;
        assert_eq!(decision.action, Action::Hold);
    }
}
