// =============================================================================
// Range agent — spec.md §4.5.3
// =============================================================================
//
// Ranging regime means price is expected to oscillate between the Bollinger
// bands rather than trend. The agent fades the band edge it's closest to:
//   - near the lower band -> candidate BUY
//   - near the upper band -> candidate SELL
//
// Three criteria, evaluated against whichever edge is closest:
//   1. price within 0.5% of the relevant band edge.
//   2. RSI extreme confirms the fade (RSI <= 35 at the lower edge, RSI >= 65
//      at the upper edge).
//   3. order-book imbalance agrees with the fade direction (positive/buy
//      pressure at the lower edge, negative/sell pressure at the upper edge).
//
// 3/3 -> direct emit. 2/3 -> consult the deep reasoner. <2 -> HOLD.
//
// A closed bar with a wick or close beyond the band it's supposedly fading
// invalidates the range read outright (a failed breakout, not a fade setup)
// and HOLDs immediately without spending an LLM call on it.

use crate::agents::{atr_stop_levels, consult_deep, count_met, AgentDeps, Criterion};
use crate::config::{AiAgentsConfig, AtrStopsConfig};
use crate::market_data::Snapshot;
use crate::types::{Action, AgentKind, Decision};

const EDGE_PROXIMITY_PCT: f64 = 0.5;

pub async fn decide(snapshot: &Snapshot, _config: &AiAgentsConfig, atr_stops: &AtrStopsConfig, deps: &AgentDeps) -> Decision {
    let ind = &snapshot.indicators;
    let price = snapshot.price;

    let dist_to_lower = (price - ind.bb_lower).abs() / price * 100.0;
    let dist_to_upper = (price - ind.bb_upper).abs() / price * 100.0;

    let (side, edge_distance, band_edge) = if dist_to_lower <= dist_to_upper {
        (Action::Buy, dist_to_lower, ind.bb_lower)
    } else {
        (Action::Sell, dist_to_upper, ind.bb_upper)
    };

    if breakout_invalidates(snapshot, side, band_edge) {
        return Decision::hold_filtered("range agent: band edge broke, not a fade setup");
    }

    let near_edge = edge_distance <= EDGE_PROXIMITY_PCT;
    let rsi_confirms = match side {
        Action::Buy => ind.rsi <= 35.0,
        Action::Sell => ind.rsi >= 65.0,
        Action::Hold => false,
    };
    let imbalance_confirms = match side {
        Action::Buy => snapshot.order_book.imbalance >= 0.1,
        Action::Sell => snapshot.order_book.imbalance <= -0.1,
        Action::Hold => false,
    };

    let criteria = [
        Criterion { label: "price within 0.5% of the fade edge", met: near_edge },
        Criterion { label: "RSI extreme confirms the fade", met: rsi_confirms },
        Criterion { label: "order-book imbalance agrees with the fade", met: imbalance_confirms },
    ];

    let met = count_met(&criteria);

    if met == 3 {
        let (stop_loss, take_profit) = atr_stop_levels(side, price, ind.atr, atr_stops);
        return Decision {
            action: side,
            confidence: 0.6,
            entry_price: Some(price),
            stop_loss: Some(stop_loss),
            take_profit: Some(take_profit),
            agent: AgentKind::Range,
            reasoning: "all three range-fade criteria met, emitted directly".to_string(),
        };
    }

    if met == 2 {
        return consult_deep(AgentKind::Range, snapshot, side, &criteria, deps).await;
    }

    Decision::hold_filtered(format!("range agent: only {met}/3 criteria met"))
}

/// A close beyond the edge it was supposed to fade means the range has
/// broken out rather than bounced; the regime classification no longer
/// holds for this bar so the agent bails out rather than fading a breakout.
fn breakout_invalidates(snapshot: &Snapshot, side: Action, band_edge: f64) -> bool {
    let Some(last) = snapshot.ohlcv.last() else {
        return false;
    };
    match side {
        Action::Buy => last.close < band_edge,
        Action::Sell => last.close > band_edge,
        Action::Hold => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CircuitBreaker, LlmProvider, LlmRole, TokenBucket};
    use crate::market_data::snapshot::{Indicators, OhlcvBar, OrderBookSummary};
    use crate::market_data::Pressure;
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

    fn config() -> AiAgentsConfig {
        AiAgentsConfig {
            min_volatility_percent: 0.5,
            min_volume_ratio: 0.3,
            min_adx_trend: 20.0,
        }
    }

    fn atr_stops() -> AtrStopsConfig {
        AtrStopsConfig { sl_multiplier: 1.5, tp_multiplier: 2.7, min_distance_percent: 0.4 }
    }

    fn snapshot_with(price: f64, bb_lower: f64, bb_upper: f64, rsi: f64, imbalance: f64, last_close: f64) -> Snapshot {
        let ohlcv = vec![OhlcvBar { open: price, high: price + 1.0, low: price - 1.0, close: last_close, volume: 1000.0 }; 200];
        Snapshot {
            symbol: "ETHUSDT".to_string(),
            timestamp: chrono::Utc::now(),
            price,
            ohlcv,
            indicators: Indicators {
                rsi,
                ema_20: price,
                ema_50: price,
                ema_200: price,
                macd_line: 0.0,
                macd_signal: 0.0,
                macd_histogram: 0.0,
                bb_upper,
                bb_mid: (bb_upper + bb_lower) / 2.0,
                bb_lower,
                atr: 1.0,
                atr_pct: 1.0,
                adx: 15.0,
                volume_mean_20: 900.0,
                volume_current: 1000.0,
                volume_ratio: 1.0,
            },
            order_book: OrderBookSummary {
                bids: vec![],
                asks: vec![],
                best_bid_wall_price: None,
                best_ask_wall_price: None,
                imbalance,
                pressure: Pressure::Neutral,
            },
            funding_rate: None,
            open_interest: None,
            btc_correlation: None,
        }
    }

    #[tokio::test]
    async fn three_of_three_emits_directly_at_lower_edge() {
        let snap = snapshot_with(95.2, 95.0, 105.0, 30.0, 0.2, 95.2);
        let deps = deps_with("should never be called");
        let decision = decide(&snap, &config(), &atr_stops(), &deps).await;
        assert_eq!(decision.action, Action::Buy);
        assert_eq!(decision.agent, AgentKind::Range);
        assert!(decision.stop_loss.unwrap() < decision.entry_price.unwrap());
        assert!(decision.take_profit.unwrap() > decision.entry_price.unwrap());
    }

    #[tokio::test]
    async fn two_of_three_consults_deep_llm() {
        let snap = snapshot_with(95.2, 95.0, 105.0, 30.0, 0.0, 95.2); // imbalance fails
        let reply = r#"{"decision":"BUY","confidence":0.55,"entry":95.2,"stop_loss":93.0,"take_profit":100.0,"reasoning":"ok"}"#;
        let deps = deps_with(reply);
        let decision = decide(&snap, &config(), &atr_stops(), &deps).await;
        assert_eq!(decision.action, Action::Buy);
    }

    #[tokio::test]
    async fn broken_band_edge_holds_without_llm() {
        let snap = snapshot_with(94.0, 95.0, 105.0, 30.0, 0.2, 94.0); // closed below lower band
        let deps = deps_with("should never be called");
        let decision = decide(&snap, &config(), &atr_stops(), &deps).await;
        assert_eq!(decision.action, Action::Hold);
    }
}
