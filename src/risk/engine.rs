// =============================================================================
// Risk engine — ordered validation chain + fractional-Kelly sizing
// =============================================================================
//
// `evaluate` runs the seven checks from spec.md §4.6 in a fixed order and
// fails fast on the first rejection, tagged with the `RiskRejectKind` that
// caused it. A Decision that survives all seven gets sized: fractional
// Kelly, blending the agent's stated confidence with the account's
// empirical win rate once enough trade history exists, capped by
// `max_risk_cap` and the exchange's lot/notional constraints.

use std::path::Path;
use std::sync::Arc;

use chrono::{Timelike, Utc};
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::config::RiskManagementConfig;
use crate::error::{RiskRejectKind, SathError};
use crate::market_data::Snapshot;
use crate::risk::state::RiskState;
use crate::risk::store::RiskStore;
use crate::types::{Action, Decision};

#[derive(Debug, Clone, PartialEq)]
pub struct SizedOrder {
    pub action: Action,
    pub quantity: f64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub risk_amount: f64,
    pub kelly_fraction: f64,
}

pub struct RiskEngine {
    state: RwLock<RiskState>,
    store: Arc<RiskStore>,
    config: RiskManagementConfig,
}

impl RiskEngine {
    pub async fn new(
        store: Arc<RiskStore>,
        config: RiskManagementConfig,
        starting_capital: f64,
        legacy_json_path: &Path,
    ) -> anyhow::Result<Self> {
        let mut state = store.migrate_legacy_json(legacy_json_path, starting_capital).await?;
        state.maybe_roll_day();
        Ok(Self {
            state: RwLock::new(state),
            store,
            config,
        })
    }

    pub fn snapshot_state(&self) -> RiskState {
        self.state.read().clone()
    }

    pub fn is_killed(&self) -> bool {
        self.state.read().killed
    }

    /// Explicit operator kill. Persisted immediately; requires an explicit
    /// clear, not just a day roll, to resume trading.
    pub async fn kill(&self, reason: &str) -> anyhow::Result<()> {
        {
            let mut s = self.state.write();
            s.killed = true;
        }
        warn!(reason, "risk engine kill switch activated");
        self.persist().await
    }

    pub async fn clear_kill(&self) -> anyhow::Result<()> {
        {
            let mut s = self.state.write();
            s.killed = false;
        }
        info!("risk engine kill switch cleared");
        self.persist().await
    }

    async fn persist(&self) -> anyhow::Result<()> {
        let snapshot = self.state.read().clone();
        self.store.save(&snapshot).await
    }

    /// Record a closed trade's realized PnL, trip the kill-switch if the
    /// resulting daily drawdown or loss streak crosses the configured caps,
    /// and persist the updated counters atomically.
    pub async fn record_trade_result(&self, pnl: f64) -> anyhow::Result<()> {
        let trip_reason = {
            let mut s = self.state.write();
            s.maybe_roll_day();
            s.record_trade(pnl);

            if s.daily_loss_pct() >= self.config.max_daily_drawdown_pct {
                s.killed = true;
                Some(format!(
                    "daily drawdown {:.2}% crossed cap {:.2}%",
                    s.daily_loss_pct() * 100.0,
                    self.config.max_daily_drawdown_pct * 100.0
                ))
            } else if s.consecutive_losses >= self.config.max_consecutive_losses {
                s.killed = true;
                Some(format!(
                    "{} consecutive losses crossed cap {}",
                    s.consecutive_losses, self.config.max_consecutive_losses
                ))
            } else {
                None
            }
        };

        if let Some(reason) = trip_reason {
            warn!(%reason, "risk engine auto kill-switch tripped");
        }

        self.persist().await
    }

    /// Run the ordered validation chain and, if the decision survives,
    /// return a sized order. `open_positions` lists `(symbol, side)` for
    /// every currently open position, used by the correlation filter.
    /// `account_balance` is denominated in whichever asset this decision's
    /// side actually spends: quote for BUY, base asset for SELL.
    pub fn evaluate(
        &self,
        decision: &Decision,
        snapshot: &Snapshot,
        account_balance: f64,
        open_positions: &[(String, Action)],
        min_notional: f64,
        lot_step: f64,
    ) -> Result<SizedOrder, SathError> {
        let state = self.state.read();

        // 1. kill switch
        if state.killed {
            return Err(SathError::RiskReject {
                kind: RiskRejectKind::KillSwitch,
                reason: "kill switch is active".to_string(),
            });
        }

        // 2. confidence floor
        if decision.confidence < self.config.min_confidence {
            return Err(SathError::RiskReject {
                kind: RiskRejectKind::Confidence,
                reason: format!(
                    "confidence {:.2} below floor {:.2}",
                    decision.confidence, self.config.min_confidence
                ),
            });
        }

        // 3. session filter
        if self.config.session_filter.enabled {
            let hour = Utc::now().hour() as u8;
            if self.config.session_filter.avoid_hours_utc.contains(&hour) {
                return Err(SathError::RiskReject {
                    kind: RiskRejectKind::Session,
                    reason: format!("UTC hour {hour} is in the avoid-hours list"),
                });
            }
        }

        let (entry, stop_loss, take_profit) = match (decision.entry_price, decision.stop_loss, decision.take_profit) {
            (Some(e), Some(sl), Some(tp)) => (e, sl, tp),
            _ => {
                return Err(SathError::RiskReject {
                    kind: RiskRejectKind::Rr,
                    reason: "decision is missing entry/stop_loss/take_profit".to_string(),
                })
            }
        };

        let risk_distance = (entry - stop_loss).abs();
        let reward_distance = (take_profit - entry).abs();
        if risk_distance <= 0.0 {
            return Err(SathError::RiskReject {
                kind: RiskRejectKind::Rr,
                reason: "stop_loss coincides with entry_price".to_string(),
            });
        }

        // 4. SL/TP sanity: the stop must clear both a percentage floor and
        // an ATR-derived floor, then the reward must clear the r:r floor.
        let min_sl_distance = (self.config.atr_stops.min_distance_percent / 100.0 * entry)
            .max(snapshot.indicators.atr * self.config.atr_stops.sl_multiplier);
        if risk_distance < min_sl_distance {
            return Err(SathError::RiskReject {
                kind: RiskRejectKind::Rr,
                reason: format!(
                    "stop distance {risk_distance:.6} below floor {min_sl_distance:.6} \
                     (max of {:.2}% of entry and {:.1}x ATR)",
                    self.config.atr_stops.min_distance_percent, self.config.atr_stops.sl_multiplier
                ),
            });
        }

        let rr = reward_distance / risk_distance;
        if rr < self.config.min_risk_reward_ratio {
            return Err(SathError::RiskReject {
                kind: RiskRejectKind::Rr,
                reason: format!("r:r {:.2} below floor {:.2}", rr, self.config.min_risk_reward_ratio),
            });
        }

        // 5. balance floor (must have something to risk at all)
        if account_balance <= 0.0 {
            return Err(SathError::RiskReject {
                kind: RiskRejectKind::Balance,
                reason: "account balance is zero or unavailable".to_string(),
            });
        }

        // 6. correlation filter: this symbol's BTC-correlation scalar stands
        // in for its correlation to every other open symbol (no pairwise
        // correlation matrix is collected). Reject only when that
        // correlation is high AND an open position already shares this
        // decision's direction, so a highly-correlated *hedge* still passes.
        const CORRELATION_THRESHOLD: f64 = 0.7;
        if let Some(corr) = snapshot.btc_correlation {
            if corr.abs() > CORRELATION_THRESHOLD {
                let same_direction = open_positions.iter().any(|(_, side)| *side == decision.action);
                if same_direction {
                    return Err(SathError::RiskReject {
                        kind: RiskRejectKind::Correlation,
                        reason: format!(
                            "correlation {corr:.2} exceeds {CORRELATION_THRESHOLD:.2} and an open position already shares this direction"
                        ),
                    });
                }
            }
        }

        // 7. fee impact: the trade must clear its own round-trip cost by a
        // comfortable multiple, or fees eat the edge entirely.
        let round_trip_fee_pct = self.config.fee_rate * 2.0;
        let reward_pct = reward_distance / entry;
        if reward_pct < round_trip_fee_pct * self.config.min_profit_to_fees {
            return Err(SathError::RiskReject {
                kind: RiskRejectKind::Fees,
                reason: format!(
                    "expected profit {:.4}% does not clear {:.1}x round-trip fees ({:.4}%)",
                    reward_pct * 100.0,
                    self.config.min_profit_to_fees,
                    round_trip_fee_pct * 100.0
                ),
            });
        }

        let win_prob = blended_win_probability(decision.confidence, state.empirical_win_rate());
        let kelly_fraction = fractional_kelly(win_prob, rr, self.config.kelly_criterion.fraction, self.config.max_risk_cap);

        // Notional = f * capital_available_for_this_side (spec.md §4.6).
        // `account_balance` already arrives denominated in the side's own
        // unit -- quote for BUY, base asset for SELL -- so BUY sizes a
        // quote-denominated notional down to a quantity, while SELL sizes
        // the base-asset quantity directly; comparing a SELL's quote
        // notional against a base-asset balance was the historic
        // insufficient-balance bug this fix closes.
        let quantity = match decision.action {
            Action::Buy => {
                let notional_target = account_balance * kelly_fraction;
                round_down_to_step(notional_target / entry, lot_step)
            }
            Action::Sell | Action::Hold => round_down_to_step(account_balance * kelly_fraction, lot_step),
        };
        let notional = quantity * entry;
        let risk_amount = quantity * risk_distance;

        if quantity <= 0.0 || notional < min_notional {
            return Err(SathError::RiskReject {
                kind: RiskRejectKind::MinSize,
                reason: format!("sized notional {notional:.2} below exchange minimum {min_notional:.2}"),
            });
        }

        let balance_ok = match decision.action {
            Action::Buy => notional <= account_balance,
            Action::Sell | Action::Hold => quantity <= account_balance,
        };
        if !balance_ok {
            return Err(SathError::RiskReject {
                kind: RiskRejectKind::Balance,
                reason: format!(
                    "sized order (qty {quantity:.6}, notional {notional:.2}) exceeds available balance {account_balance:.6}"
                ),
            });
        }

        Ok(SizedOrder {
            action: decision.action,
            quantity,
            entry_price: entry,
            stop_loss,
            take_profit,
            risk_amount,
            kelly_fraction,
        })
    }
}

/// Blend the agent's stated confidence with the account's empirical win
/// rate once there's a large enough sample to trust it; below that sample
/// size, confidence alone drives sizing (spec.md §4.6).
fn blended_win_probability(confidence: f64, empirical: Option<f64>) -> f64 {
    match empirical {
        Some(rate) => ((confidence + rate) / 2.0).clamp(0.0, 1.0),
        None => confidence.clamp(0.0, 1.0),
    }
}

/// Classic Kelly fraction `f* = p - (1-p)/b`, scaled by the configured
/// fractional multiplier and capped at `max_risk_cap`. Negative f* (a
/// negative-edge bet) clamps to zero rather than sizing a short.
fn fractional_kelly(win_prob: f64, reward_risk_ratio: f64, kelly_fraction_config: f64, max_risk_cap: f64) -> f64 {
    if reward_risk_ratio <= 0.0 {
        return 0.0;
    }
    let f_star = win_prob - (1.0 - win_prob) / reward_risk_ratio;
    (f_star.max(0.0) * kelly_fraction_config).clamp(0.0, max_risk_cap)
}

fn round_down_to_step(quantity: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return quantity.max(0.0);
    }
    (quantity / step).floor() * step
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AtrStopsConfig, KellyCriterionConfig, SessionFilterConfig};
    use crate::market_data::snapshot::{Indicators, OrderBookSummary};
    use crate::market_data::Pressure;
    use crate::types::AgentKind;

    fn config() -> RiskManagementConfig {
        RiskManagementConfig {
            min_confidence: 0.55,
            min_risk_reward_ratio: 1.8,
            max_risk_cap: 0.03,
            max_daily_drawdown_pct: 0.10,
            max_consecutive_losses: 5,
            min_profit_to_fees: 8.0,
            fee_rate: 0.001,
            kelly_criterion: KellyCriterionConfig { fraction: 0.25, min_confidence: 0.55 },
            atr_stops: AtrStopsConfig { sl_multiplier: 1.5, tp_multiplier: 2.7, min_distance_percent: 0.4 },
            session_filter: SessionFilterConfig { enabled: false, avoid_hours_utc: vec![] },
        }
    }

    fn decision(confidence: f64, entry: f64, sl: f64, tp: f64) -> Decision {
        Decision {
            action: Action::Buy,
            confidence,
            entry_price: Some(entry),
            stop_loss: Some(sl),
            take_profit: Some(tp),
            agent: AgentKind::Trend,
            reasoning: "test".to_string(),
        }
    }

    fn sell_decision(confidence: f64, entry: f64, sl: f64, tp: f64) -> Decision {
        Decision {
            action: Action::Sell,
            confidence,
            entry_price: Some(entry),
            stop_loss: Some(sl),
            take_profit: Some(tp),
            agent: AgentKind::Trend,
            reasoning: "test".to_string(),
        }
    }

    fn snapshot() -> Snapshot {
        Snapshot {
            symbol: "ETHUSDT".to_string(),
            timestamp: chrono::Utc::now(),
            price: 100.0,
            ohlcv: vec![],
            indicators: Indicators {
                rsi: 50.0,
                ema_20: 100.0,
                ema_50: 100.0,
                ema_200: 100.0,
                macd_line: 0.0,
                macd_signal: 0.0,
                macd_histogram: 0.0,
                bb_upper: 105.0,
                bb_mid: 100.0,
                bb_lower: 95.0,
                atr: 1.0,
                atr_pct: 1.0,
                adx: 25.0,
                volume_mean_20: 1000.0,
                volume_current: 1000.0,
                volume_ratio: 1.0,
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
            btc_correlation: Some(0.1),
        }
    }

    async fn fresh_engine() -> RiskEngine {
        let store = Arc::new(RiskStore::connect("sqlite::memory:").await.unwrap());
        RiskEngine {
            state: RwLock::new(RiskState::fresh(1000.0)),
            store,
            config: config(),
        }
    }

    #[tokio::test]
    async fn low_confidence_is_rejected_before_sizing() {
        let engine = fresh_engine().await;
        let d = decision(0.4, 100.0, 95.0, 110.0);
        let err = engine.evaluate(&d, &snapshot(), 1000.0, &[], 10.0, 0.001).unwrap_err();
        assert_eq!(err.identifier(), "risk.reject.confidence");
    }

    #[tokio::test]
    async fn poor_risk_reward_is_rejected() {
        let engine = fresh_engine().await;
        let d = decision(0.8, 100.0, 98.0, 102.0); // rr = 1.0, floor is 1.8
        let err = engine.evaluate(&d, &snapshot(), 1000.0, &[], 10.0, 0.001).unwrap_err();
        assert_eq!(err.identifier(), "risk.reject.rr");
    }

    #[tokio::test]
    async fn thin_profit_rejected_by_fee_floor() {
        let engine = fresh_engine().await;
        // rr clears the floor exactly (1.8) and the stop clears its own
        // distance floor, but the absolute move is too thin relative to fees.
        let d = decision(0.8, 1000.0, 996.0, 1007.2);
        let err = engine.evaluate(&d, &snapshot(), 1000.0, &[], 10.0, 0.001).unwrap_err();
        assert_eq!(err.identifier(), "risk.reject.fees");
    }

    #[tokio::test]
    async fn sl_distance_below_atr_and_percent_floor_is_rejected() {
        let engine = fresh_engine().await;
        // distance 0.09 clears neither the 0.4%-of-entry floor (0.4) nor
        // the ATR floor (1.5).
        let d = decision(0.8, 100.0, 99.91, 100.16);
        let err = engine.evaluate(&d, &snapshot(), 1000.0, &[], 10.0, 0.001).unwrap_err();
        assert_eq!(err.identifier(), "risk.reject.rr");
    }

    #[tokio::test]
    async fn healthy_decision_sizes_successfully() {
        let engine = fresh_engine().await;
        let d = decision(0.8, 100.0, 95.0, 115.0); // rr = 3.0, 15% reward clears fees easily
        let sized = engine.evaluate(&d, &snapshot(), 1000.0, &[], 1.0, 0.001).unwrap();
        assert!(sized.quantity > 0.0);
        assert!(sized.kelly_fraction <= config().max_risk_cap);
        // notional must follow spec.md §4.6's literal `f * capital_available`,
        // not a risk_amount/risk_distance blow-up off the stop distance.
        let expected_notional = 1000.0 * sized.kelly_fraction;
        let actual_notional = sized.quantity * sized.entry_price;
        assert!(
            (actual_notional - expected_notional).abs() < 0.01,
            "expected notional ~{expected_notional:.4}, got {actual_notional:.4}"
        );
    }

    #[tokio::test]
    async fn sell_decision_sizes_against_base_asset_balance_not_notional() {
        // Mirrors the spot "only sell what you hold" fix: account_balance
        // here is a base-asset quantity (e.g. SOL held), not USDT. Sizing
        // must size and balance-check in that unit, not compare a
        // quote-denominated notional against it.
        let engine = fresh_engine().await;
        let d = sell_decision(0.8, 126.0, 128.5, 120.0); // rr = 2.4
        let base_asset_balance = 0.294;
        let sized = engine.evaluate(&d, &snapshot(), base_asset_balance, &[], 0.5, 0.001).unwrap();
        assert!(sized.quantity > 0.0);
        assert!(sized.quantity <= base_asset_balance, "sized quantity must not exceed held balance");
    }

    #[tokio::test]
    async fn correlated_same_direction_exposure_is_rejected_even_with_one_open_position() {
        let engine = fresh_engine().await;
        let mut snap = snapshot();
        snap.btc_correlation = Some(0.75); // above the 0.7 threshold
        let d = decision(0.8, 100.0, 95.0, 115.0);
        let open = vec![("BTCUSDT".to_string(), Action::Buy)];
        let err = engine.evaluate(&d, &snap, 1000.0, &open, 1.0, 0.001).unwrap_err();
        assert_eq!(err.identifier(), "risk.reject.correlation");
    }

    #[tokio::test]
    async fn correlated_opposite_direction_exposure_is_not_rejected() {
        let engine = fresh_engine().await;
        let mut snap = snapshot();
        snap.btc_correlation = Some(0.75);
        let d = decision(0.8, 100.0, 95.0, 115.0); // BUY
        let open = vec![("BTCUSDT".to_string(), Action::Sell)];
        let sized = engine.evaluate(&d, &snap, 1000.0, &open, 1.0, 0.001).unwrap();
        assert!(sized.quantity > 0.0);
    }

    #[test]
    fn kelly_fraction_never_exceeds_the_risk_cap() {
        let f = fractional_kelly(0.95, 5.0, 0.25, 0.03);
        assert!(f <= 0.03);
    }

    #[test]
    fn negative_edge_sizes_to_zero() {
        let f = fractional_kelly(0.2, 1.0, 0.25, 0.03);
        assert_eq!(f, 0.0);
    }
}
