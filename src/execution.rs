// =============================================================================
// Execution Engine — price re-verification, bracket placement, OCO tracking
// =============================================================================
//
// `execute` is the only entry point: risk-size the decision, re-verify the
// market hasn't moved past the configured slippage tolerance since the
// snapshot was taken, place a limit order at entry (or market in paper
// mode), then bracket the fill with a stop-loss/take-profit OCO pair whose
// order IDs live on the `Position` for the trailing-stop cancel/replace
// cycle in `position_engine`.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{Mode, OrderExecutionConfig};
use crate::error::SathError;
use crate::exchange::{ExchangeClient, OrderSide, OrderType};
use crate::market_data::Snapshot;
use crate::position_engine::{OcoIds, PositionManager};
use crate::risk::{RiskEngine, SizedOrder};
use crate::types::{Action, Decision};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecutionOutcome {
    /// Filled and bracketed on the exchange (live mode).
    Placed { position_id: String, order_id: u64 },
    /// Filled locally without touching the exchange (paper mode).
    Simulated { position_id: String },
    /// The risk engine rejected the decision before anything was sent.
    RiskRejected { reason: String },
    /// Price moved past tolerance, or the order didn't fill in time, or the
    /// exchange rejected it outright — no position was opened.
    Aborted { reason: String },
}

pub struct ExecutionEngine {
    client: Arc<dyn ExchangeClient>,
    risk: Arc<RiskEngine>,
    positions: Arc<PositionManager>,
    config: OrderExecutionConfig,
    mode: Mode,
}

impl ExecutionEngine {
    pub fn new(
        client: Arc<dyn ExchangeClient>,
        risk: Arc<RiskEngine>,
        positions: Arc<PositionManager>,
        config: OrderExecutionConfig,
        mode: Mode,
    ) -> Self {
        Self { client, risk, positions, config, mode }
    }

    pub async fn execute(&self, decision: &Decision, snapshot: &Snapshot, account_balance: f64) -> ExecutionOutcome {
        if !decision.is_actionable() {
            return ExecutionOutcome::RiskRejected { reason: "decision is HOLD".to_string() };
        }

        let (min_notional, lot_step) = match self.exchange_constraints(&snapshot.symbol).await {
            Ok(v) => v,
            Err(e) => {
                warn!(symbol = %snapshot.symbol, error = %e, "failed to fetch exchange constraints");
                return ExecutionOutcome::Aborted { reason: format!("exchange constraints unavailable: {e}") };
            }
        };

        let open_positions = self.positions.open_position_sides();
        let sized = match self.risk.evaluate(decision, snapshot, account_balance, &open_positions, min_notional, lot_step) {
            Ok(sized) => sized,
            Err(e @ SathError::RiskReject { .. }) => {
                info!(symbol = %snapshot.symbol, error = %e, "decision rejected by risk engine");
                return ExecutionOutcome::RiskRejected { reason: e.to_string() };
            }
            Err(e) => return ExecutionOutcome::Aborted { reason: e.to_string() },
        };

        match self.verify_price(&snapshot.symbol, sized.entry_price).await {
            Ok(current_price) => self.place_and_bracket(decision, &snapshot.symbol, &sized, current_price).await,
            Err(e) => {
                warn!(symbol = %snapshot.symbol, error = %e, "execution aborted by slippage re-check");
                ExecutionOutcome::Aborted { reason: e.to_string() }
            }
        }
    }

    async fn exchange_constraints(&self, symbol: &str) -> anyhow::Result<(f64, f64)> {
        let min_notional = self.client.min_notional(symbol).await?;
        let lot_step = self.client.lot_step(symbol).await?;
        Ok((min_notional, lot_step))
    }

    /// Re-fetch the live price and abort if it has moved past
    /// `max_price_deviation_pct` since the snapshot the decision was sized
    /// from (spec.md §4.7 step 1). This is a distinct, wider tolerance from
    /// `max_slippage_pct`, which only bounds how far the entry limit itself
    /// is placed from the live price (step 2).
    async fn verify_price(&self, symbol: &str, expected_entry: f64) -> Result<f64, SathError> {
        let current = self
            .client
            .get_price(symbol)
            .await
            .map_err(|e| SathError::ExecExchangeError(e.to_string()))?;

        let moved_pct = (current - expected_entry).abs() / expected_entry;
        if moved_pct > self.config.max_price_deviation_pct {
            return Err(SathError::ExecSlippageAbort { moved_pct, max_pct: self.config.max_price_deviation_pct });
        }
        Ok(current)
    }

    async fn place_and_bracket(
        &self,
        decision: &Decision,
        symbol: &str,
        sized: &SizedOrder,
        current_price: f64,
    ) -> ExecutionOutcome {
        if !self.mode.is_live() {
            let position_id = self.positions.open_position(
                symbol,
                sized.action,
                current_price,
                sized.quantity,
                sized.stop_loss,
                sized.take_profit,
                decision.agent,
                decision.confidence,
                OcoIds::default(),
            );
            info!(symbol, position_id = %position_id, "paper fill simulated");
            return ExecutionOutcome::Simulated { position_id };
        }

        let side = to_exchange_side(sized.action);
        let limit_price = entry_with_slippage_budget(sized.action, current_price, self.config.max_slippage_pct);

        let order_type = if self.config.use_limit_orders { OrderType::Limit } else { OrderType::Market };
        let placed = match self
            .client
            .place_order(symbol, side, order_type, sized.quantity, Some(limit_price), None)
            .await
        {
            Ok(p) => p,
            Err(e) => {
                warn!(symbol, error = %e, "entry order placement failed");
                return ExecutionOutcome::Aborted { reason: format!("entry order rejected: {e}") };
            }
        };

        if !self.await_fill(symbol, placed.order_id).await {
            if let Err(e) = self.client.cancel_order(symbol, placed.order_id).await {
                warn!(symbol, order_id = placed.order_id, error = %e, "failed to cancel unfilled entry order");
            }
            return ExecutionOutcome::Aborted { reason: "entry order did not fill within order_timeout_s".to_string() };
        }

        let exit_side = opposite_side(side);
        let sl_order = self
            .client
            .place_order(symbol, exit_side, OrderType::StopLossLimit, sized.quantity, Some(sized.stop_loss), Some(sized.stop_loss))
            .await;
        let tp_order = self
            .client
            .place_order(symbol, exit_side, OrderType::TakeProfitLimit, sized.quantity, Some(sized.take_profit), Some(sized.take_profit))
            .await;

        let oco_ids = OcoIds {
            stop_loss_order_id: sl_order.as_ref().ok().map(|o| o.order_id),
            take_profit_order_id: tp_order.as_ref().ok().map(|o| o.order_id),
        };
        if oco_ids.stop_loss_order_id.is_none() {
            warn!(symbol, order_id = placed.order_id, "stop-loss leg of bracket failed to place");
        }
        if oco_ids.take_profit_order_id.is_none() {
            warn!(symbol, order_id = placed.order_id, "take-profit leg of bracket failed to place");
        }

        let position_id = self.positions.open_position(
            symbol,
            sized.action,
            limit_price,
            sized.quantity,
            sized.stop_loss,
            sized.take_profit,
            decision.agent,
            decision.confidence,
            oco_ids,
        );

        info!(symbol, position_id = %position_id, order_id = placed.order_id, "live order filled and bracketed");
        ExecutionOutcome::Placed { position_id, order_id: placed.order_id }
    }

    /// Poll open orders until the entry order disappears (filled or
    /// cancelled elsewhere) or `order_timeout_s` elapses.
    async fn await_fill(&self, symbol: &str, order_id: u64) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(self.config.order_timeout_s);
        let poll_interval = Duration::from_millis(500);

        while tokio::time::Instant::now() < deadline {
            match self.client.get_open_orders(Some(symbol)).await {
                Ok(open) => {
                    let still_open = open.iter().any(|o| o.get("orderId").and_then(|v| v.as_u64()) == Some(order_id));
                    if !still_open {
                        return true;
                    }
                }
                Err(e) => warn!(symbol, order_id, error = %e, "failed to poll open orders while awaiting fill"),
            }
            tokio::time::sleep(poll_interval).await;
        }
        false
    }
}

fn to_exchange_side(action: Action) -> OrderSide {
    match action {
        Action::Buy => OrderSide::Buy,
        Action::Sell => OrderSide::Sell,
        Action::Hold => OrderSide::Buy, // unreachable: caller filters HOLD before sizing
    }
}

fn opposite_side(side: OrderSide) -> OrderSide {
    match side {
        OrderSide::Buy => OrderSide::Sell,
        OrderSide::Sell => OrderSide::Buy,
    }
}

/// Entry limit priced at the edge of the slippage budget: buyers cap how
/// much above the live price they'll pay, sellers cap how much below.
fn entry_with_slippage_budget(action: Action, current_price: f64, max_slippage_pct: f64) -> f64 {
    match action {
        Action::Buy => current_price * (1.0 + max_slippage_pct),
        Action::Sell | Action::Hold => current_price * (1.0 - max_slippage_pct),
    }
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("mode", &self.mode)
            .field("positions", &self.positions)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buy_slippage_budget_is_above_current_price() {
        let limit = entry_with_slippage_budget(Action::Buy, 100.0, 0.001);
        assert!((limit - 100.1).abs() < 1e-9);
    }

    #[test]
    fn sell_slippage_budget_is_below_current_price() {
        let limit = entry_with_slippage_budget(Action::Sell, 100.0, 0.001);
        assert!((limit - 99.9).abs() < 1e-9);
    }
}
