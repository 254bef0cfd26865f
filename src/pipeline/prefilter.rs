// =============================================================================
// Pre-filter — cheap, pure reject function ahead of the regime/agent/LLM path
// =============================================================================
//
// A Snapshot that matches all of the dead-market conditions below never
// reaches an agent or the LLM: it is rejected here at zero cost. This is the
// first of two volatility defences; `pipeline::volatility_gate` is the
// second, using the full (not halved) threshold.

use crate::market_data::Snapshot;
use crate::types::Decision;

/// Fraction of the bar's ATR below which the MACD histogram is considered
/// flat momentum.
const MACD_FLAT_EPSILON_ATR_FRACTION: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PrefilterVerdict {
    Pass,
    Reject(RejectReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NeutralNoFlow,
    FlatMomentum,
    DeadMarket,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::NeutralNoFlow => "neutral_no_flow",
            RejectReason::FlatMomentum => "flat_momentum",
            RejectReason::DeadMarket => "dead_market",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pure `Snapshot -> {pass, reject(reason)}`. Each of the three bulleted
/// conditions is independently sufficient to reject: a neutral/no-flow
/// reading, a flat-momentum reading, or a dead (half-threshold) market.
pub fn evaluate(snapshot: &Snapshot, min_volatility_percent: f64) -> PrefilterVerdict {
    let ind = &snapshot.indicators;

    let neutral_no_flow = (45.0..=55.0).contains(&ind.rsi) && ind.volume_ratio < 1.5;

    let macd_epsilon = ind.atr * MACD_FLAT_EPSILON_ATR_FRACTION;
    let flat_momentum = ind.macd_histogram.abs() < macd_epsilon;

    let dead_market = ind.atr_pct < (min_volatility_percent / 2.0);

    // Priority order for the logged reason when more than one applies.
    if dead_market {
        PrefilterVerdict::Reject(RejectReason::DeadMarket)
    } else if neutral_no_flow {
        PrefilterVerdict::Reject(RejectReason::NeutralNoFlow)
    } else if flat_momentum {
        PrefilterVerdict::Reject(RejectReason::FlatMomentum)
    } else {
        PrefilterVerdict::Pass
    }
}

/// Second volatility defence, applied after the pre-filter. Uses the full
/// (not halved) `min_volatility_percent` threshold.
pub fn volatility_gate(snapshot: &Snapshot, min_volatility_percent: f64) -> PrefilterVerdict {
    if snapshot.indicators.atr_pct < min_volatility_percent {
        PrefilterVerdict::Reject(RejectReason::DeadMarket)
    } else {
        PrefilterVerdict::Pass
    }
}

/// Convert a reject verdict into the HOLD Decision the pipeline emits.
/// Returns `None` when the verdict is `Pass`.
pub fn reject_decision(verdict: PrefilterVerdict) -> Option<Decision> {
    match verdict {
        PrefilterVerdict::Pass => None,
        PrefilterVerdict::Reject(reason) => Some(Decision::hold_filtered(format!(
            "pre-filter reject: {reason}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::orderbook::Pressure;
    use crate::market_data::snapshot::{Indicators, OhlcvBar, OrderBookSummary};

    fn snapshot_with(rsi: f64, volume_ratio: f64, macd_histogram: f64, atr: f64, atr_pct: f64) -> Snapshot {
        Snapshot {
            symbol: "ETHUSDT".into(),
            timestamp: chrono::Utc::now(),
            price: 2000.0,
            ohlcv: vec![
                OhlcvBar {
                    open: 2000.0,
                    high: 2000.0,
                    low: 2000.0,
                    close: 2000.0,
                    volume: 100.0
                };
                200
            ],
            indicators: Indicators {
                rsi,
                ema_20: 2000.0,
                ema_50: 2000.0,
                ema_200: 2000.0,
                macd_line: 0.0,
                macd_signal: 0.0,
                macd_histogram,
                bb_upper: 2010.0,
                bb_mid: 2000.0,
                bb_lower: 1990.0,
                atr,
                atr_pct,
                adx: 15.0,
                volume_mean_20: 100.0,
                volume_current: 100.0,
                volume_ratio,
            },
            order_book: OrderBookSummary {
                bids: Vec::new(),
                asks: Vec::new(),
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

    #[test]
    fn spec_scenario_neutral_and_flat_momentum_rejects() {
        // RSI=50, volume_ratio=1.1, MACD_hist≈0, ATR%=0.3, min_vol=0.5.
        let snap = snapshot_with(50.0, 1.1, 0.001, 1.0, 0.3);
        let verdict = evaluate(&snap, 0.5);
        assert_eq!(verdict, PrefilterVerdict::Reject(RejectReason::NeutralNoFlow));
    }

    #[test]
    fn dead_market_alone_rejects() {
        let snap = snapshot_with(60.0, 2.0, 5.0, 1.0, 0.1);
        assert_eq!(evaluate(&snap, 0.5), PrefilterVerdict::Reject(RejectReason::DeadMarket));
    }

    #[test]
    fn flat_momentum_alone_rejects() {
        let snap = snapshot_with(60.0, 2.0, 0.001, 1.0, 0.4);
        assert_eq!(evaluate(&snap, 0.5), PrefilterVerdict::Reject(RejectReason::FlatMomentum));
    }

    #[test]
    fn high_volume_strong_momentum_above_threshold_passes() {
        let snap = snapshot_with(50.0, 2.0, 5.0, 1.0, 0.4);
        assert_eq!(evaluate(&snap, 0.5), PrefilterVerdict::Pass);
    }

    #[test]
    fn extreme_rsi_with_flow_and_volatility_passes() {
        let snap = snapshot_with(72.0, 2.0, 5.0, 1.0, 0.4);
        assert_eq!(evaluate(&snap, 0.5), PrefilterVerdict::Pass);
    }

    #[test]
    fn reject_decision_is_hold_with_zero_confidence() {
        let verdict = PrefilterVerdict::Reject(RejectReason::DeadMarket);
        let decision = reject_decision(verdict).unwrap();
        assert_eq!(decision.confidence, 0.0);
        assert!(!decision.is_actionable());
    }

    #[test]
    fn pass_verdict_yields_no_decision() {
        assert!(reject_decision(PrefilterVerdict::Pass).is_none());
    }

    #[test]
    fn volatility_gate_rejects_below_full_threshold() {
        let snap = snapshot_with(60.0, 2.0, 5.0, 1.0, 0.4);
        assert_eq!(
            volatility_gate(&snap, 0.5),
            PrefilterVerdict::Reject(RejectReason::DeadMarket)
        );
    }

    #[test]
    fn volatility_gate_passes_at_or_above_threshold() {
        let snap = snapshot_with(60.0, 2.0, 5.0, 1.0, 0.5);
        assert_eq!(volatility_gate(&snap, 0.5), PrefilterVerdict::Pass);
    }
}
