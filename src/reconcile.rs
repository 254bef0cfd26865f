// =============================================================================
// Reconciliation — repair internal position state against the exchange
// =============================================================================
//
// Every open position this process tracks should correspond to a resting
// bracket order on the exchange, and every resting bracket order should
// correspond to a position this process tracks. A reconciliation pass
// repairs both kinds of drift rather than merely logging them:
//
//   - an internal position whose symbol has no matching open order is
//     assumed to have been closed exchange-side (its SL or TP leg filled)
//     while this process wasn't watching; it is closed locally at the
//     current market price so the equity/Kelly bookkeeping stays correct.
//   - an exchange order with no matching internal position is adopted as a
//     new position with conservative, wide brackets, flagged for operator
//     review, rather than left to trade unmanaged.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::exchange::ExchangeClient;
use crate::position_engine::{OcoIds, Position, PositionManager, PositionStatus};
use crate::types::{split_symbol, Action, AgentKind, BalanceInfo};

/// Fraction either side of an adopted position's fill price used as a
/// conservative placeholder bracket until an operator reviews it.
const ADOPTED_BRACKET_PCT: f64 = 0.05;

#[derive(Debug, Clone)]
pub struct ReconcileResult {
    pub positions_matched: u32,
    pub positions_closed_as_orphaned: u32,
    pub orders_adopted: u32,
    pub balance_drift: bool,
}

/// Run one reconciliation cycle against the exchange. `symbols` is the
/// watchlist; every distinct base and quote asset across it gets its
/// balance refreshed, since the risk engine's sizing step reads whichever
/// side of the pair a decision actually spends -- quote on BUY, base on
/// SELL (spec.md §4.6's "never the config's initial_capital" fix only
/// holds if every asset a decision could spend is actually cached).
pub async fn reconcile_once(
    client: &Arc<dyn ExchangeClient>,
    positions: &PositionManager,
    balances: &RwLock<Vec<BalanceInfo>>,
    symbols: &[String],
) -> Result<ReconcileResult> {
    let now = Utc::now().to_rfc3339();
    info!(timestamp = %now, "reconciliation cycle started");

    let exchange_orders = client
        .get_open_orders(None)
        .await
        .context("reconcile: failed to fetch open orders")?;

    let exchange_symbols: HashSet<String> = exchange_orders
        .iter()
        .filter_map(|o| o.get("symbol").and_then(|v| v.as_str()).map(|s| s.to_string()))
        .collect();

    let open_positions = positions.get_open_positions();
    let internal_symbols: HashSet<String> = open_positions.iter().map(|p| p.symbol.clone()).collect();

    let mut matched = 0u32;
    let mut closed_as_orphaned = 0u32;

    for pos in &open_positions {
        if exchange_symbols.contains(&pos.symbol) {
            matched += 1;
            continue;
        }

        warn!(position_id = %pos.id, symbol = %pos.symbol, "no matching exchange order; assuming position closed exchange-side");
        match client.get_price(&pos.symbol).await {
            Ok(price) => {
                if positions.close_position(&pos.id, "ReconcileNoMatchingOrder", price).is_some() {
                    closed_as_orphaned += 1;
                }
            }
            Err(e) => warn!(position_id = %pos.id, symbol = %pos.symbol, error = %e, "could not fetch price to close orphaned position"),
        }
    }

    let mut adopted = 0u32;
    for order in &exchange_orders {
        let Some(symbol) = order.get("symbol").and_then(|v| v.as_str()) else {
            continue;
        };
        if internal_symbols.contains(symbol) {
            continue;
        }
        if let Some(position) = adopt_from_order(symbol, order) {
            warn!(symbol, "adopting unmanaged exchange order as a tracked position, brackets are placeholders");
            positions.adopt_position(position);
            adopted += 1;
        }
    }

    let mut assets: Vec<&str> = Vec::new();
    for symbol in symbols {
        let (base, quote) = split_symbol(symbol);
        if !base.is_empty() && !assets.contains(&base) {
            assets.push(base);
        }
        if !quote.is_empty() && !assets.contains(&quote) {
            assets.push(quote);
        }
    }

    let mut balance_drift = false;
    for asset in assets {
        match refresh_balance(client, balances, asset).await {
            Ok(drifted) => balance_drift |= drifted,
            Err(e) => warn!(asset, error = %e, "failed to refresh balance for asset"),
        }
    }

    info!(
        positions_matched = matched,
        positions_closed_as_orphaned = closed_as_orphaned,
        orders_adopted = adopted,
        balance_drift,
        "reconciliation cycle completed"
    );

    Ok(ReconcileResult {
        positions_matched: matched,
        positions_closed_as_orphaned: closed_as_orphaned,
        orders_adopted: adopted,
        balance_drift,
    })
}

/// Build a conservative placeholder position from an unmanaged exchange
/// order. Side and fill price come straight off the order; brackets are
/// wide guesses meant to be corrected by an operator, not traded on.
fn adopt_from_order(symbol: &str, order: &serde_json::Value) -> Option<Position> {
    let side_str = order.get("side").and_then(|v| v.as_str())?;
    let side = match side_str {
        "BUY" => Action::Buy,
        "SELL" => Action::Sell,
        _ => return None,
    };
    let price: f64 = order
        .get("price")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .or_else(|| order.get("price").and_then(|v| v.as_f64()))
        .unwrap_or(0.0);
    let quantity: f64 = order
        .get("origQty")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .or_else(|| order.get("origQty").and_then(|v| v.as_f64()))
        .unwrap_or(0.0);
    if price <= 0.0 || quantity <= 0.0 {
        return None;
    }

    let (stop_loss, take_profit) = match side {
        Action::Buy => (price * (1.0 - ADOPTED_BRACKET_PCT), price * (1.0 + ADOPTED_BRACKET_PCT)),
        _ => (price * (1.0 + ADOPTED_BRACKET_PCT), price * (1.0 - ADOPTED_BRACKET_PCT)),
    };

    Some(Position {
        id: Uuid::new_v4().to_string(),
        symbol: symbol.to_string(),
        side,
        entry_price: price,
        quantity,
        current_price: price,
        unrealized_pnl: 0.0,
        unrealized_pnl_pct: 0.0,
        stop_loss,
        take_profit,
        trailing_active: false,
        trailing_anchor: price,
        last_trail_update: None,
        oco_ids: OcoIds::default(),
        opened_at: Utc::now().to_rfc3339(),
        agent: AgentKind::Filter,
        confidence: 0.0,
        closed_at: None,
        close_reason: None,
        realized_pnl: 0.0,
        status: PositionStatus::Open,
    })
}

/// Refresh one asset's cached balance. Returns `true` if it moved more than
/// a small relative threshold since the last refresh.
async fn refresh_balance(client: &Arc<dyn ExchangeClient>, balances: &RwLock<Vec<BalanceInfo>>, asset: &str) -> Result<bool> {
    let free = client
        .get_balance(asset)
        .await
        .with_context(|| format!("reconcile: failed to fetch balance for {asset}"))?;

    let drift = {
        let current = balances.read();
        match current.iter().find(|b| b.asset == asset) {
            Some(b) if b.free > 0.0 => ((free - b.free) / b.free).abs() > 0.0001,
            Some(_) => free > 0.0,
            None => free > 0.0,
        }
    };

    let mut guard = balances.write();
    guard.retain(|b| b.asset != asset);
    guard.push(BalanceInfo { asset: asset.to_string(), free, locked: 0.0 });

    Ok(drift)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;

    use crate::exchange::{OrderSide, OrderType, PlacedOrder};
    use crate::market_data::Candle;

    #[test]
    fn adopt_from_order_builds_a_conservative_long_bracket() {
        let order = json!({"side": "BUY", "price": "100.00", "origQty": "2.0"});
        let pos = adopt_from_order("ETHUSDT", &order).unwrap();
        assert_eq!(pos.side, Action::Buy);
        assert!(pos.stop_loss < pos.entry_price);
        assert!(pos.take_profit > pos.entry_price);
        assert_eq!(pos.agent, AgentKind::Filter);
    }

    #[test]
    fn adopt_from_order_rejects_zero_quantity() {
        let order = json!({"side": "BUY", "price": "100.00", "origQty": "0"});
        assert!(adopt_from_order("ETHUSDT", &order).is_none());
    }

    /// Stub exchange exposing only per-asset balances and an empty book of
    /// open orders, enough to drive `reconcile_once`'s balance refresh.
    struct StubExchange {
        balances: HashMap<String, f64>,
    }

    #[async_trait]
    impl ExchangeClient for StubExchange {
        async fn get_klines(&self, _symbol: &str, _interval: &str, _limit: u32) -> Result<Vec<Candle>> {
            Ok(Vec::new())
        }
        async fn get_price(&self, _symbol: &str) -> Result<f64> {
            Ok(0.0)
        }
        async fn get_balance(&self, asset: &str) -> Result<f64> {
            Ok(*self.balances.get(asset).unwrap_or(&0.0))
        }
        async fn place_order(
            &self,
            _symbol: &str,
            _side: OrderSide,
            _order_type: OrderType,
            _quantity: f64,
            _price: Option<f64>,
            _stop_price: Option<f64>,
        ) -> Result<PlacedOrder> {
            anyhow::bail!("not used in this test")
        }
        async fn cancel_order(&self, _symbol: &str, _order_id: u64) -> Result<()> {
            Ok(())
        }
        async fn get_open_orders(&self, _symbol: Option<&str>) -> Result<Vec<serde_json::Value>> {
            Ok(Vec::new())
        }
        async fn lot_step(&self, _symbol: &str) -> Result<f64> {
            Ok(0.001)
        }
        async fn min_notional(&self, _symbol: &str) -> Result<f64> {
            Ok(10.0)
        }
    }

    #[tokio::test]
    async fn reconcile_once_refreshes_both_base_and_quote_balances() {
        let client: Arc<dyn ExchangeClient> = Arc::new(StubExchange {
            balances: HashMap::from([("SOL".to_string(), 0.294), ("USDT".to_string(), 0.0)]),
        });
        let positions = PositionManager::new(crate::config::TrailingStopConfig {
            activation_profit_percent: 2.0,
            trail_distance_percent: 1.0,
            min_profit_to_lock: 0.05,
            cooldown_seconds: 0,
        });
        let balances = RwLock::new(Vec::<BalanceInfo>::new());

        reconcile_once(&client, &positions, &balances, &["SOLUSDT".to_string()]).await.unwrap();

        let snapshot = balances.read();
        let sol = snapshot.iter().find(|b| b.asset == "SOL").expect("SOL balance cached");
        let usdt = snapshot.iter().find(|b| b.asset == "USDT").expect("USDT balance cached");
        assert!((sol.free - 0.294).abs() < 1e-9);
        assert_eq!(usdt.free, 0.0);
    }
}
