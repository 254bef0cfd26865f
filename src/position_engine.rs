// =============================================================================
// Position Engine — single SL/TP life-cycle with profit-locking trailing stop
// =============================================================================
//
// Life-cycle: Open -> Closed (stop-loss / take-profit / trailing stop /
// manual). There is no partial-close step (the teacher's dual TP1/TP2 model
// is replaced by spec.md's single bracket): every position carries exactly
// one stop-loss and one take-profit order, placed together as an OCO pair
// by the execution layer, whose IDs are recorded on the position for
// cancel-and-replace when the trailing stop moves.
//
// Trailing stop activates once unrealized profit crosses
// `activation_profit_percent`, then trails `trail_distance_percent` behind
// the best price seen. The profit-lock invariant (spec.md §4.2) holds from
// the moment trailing activates: the trailing stop is never placed below
// (for longs) the entry price, so once active a position can no longer
// close at a loss from a trail hit. `cooldown_seconds` rate-limits how often
// the trail is allowed to move, to avoid chattering cancel/replace calls.

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::TrailingStopConfig;
use crate::types::{Action, AgentKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "Open"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// Exchange order IDs backing a position's protective bracket, so the
/// trailing-stop cancel/replace cycle knows what to cancel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OcoIds {
    pub stop_loss_order_id: Option<u64>,
    pub take_profit_order_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub symbol: String,
    pub side: Action,
    pub entry_price: f64,
    pub quantity: f64,
    #[serde(default)]
    pub current_price: f64,
    #[serde(default)]
    pub unrealized_pnl: f64,
    #[serde(default)]
    pub unrealized_pnl_pct: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    #[serde(default)]
    pub trailing_active: bool,
    /// Best price seen since entry (for longs: the high; for shorts: the low).
    #[serde(default)]
    pub trailing_anchor: f64,
    #[serde(default)]
    pub last_trail_update: Option<i64>,
    #[serde(default)]
    pub oco_ids: OcoIds,
    pub opened_at: String,
    pub agent: AgentKind,
    pub confidence: f64,
    #[serde(default)]
    pub closed_at: Option<String>,
    #[serde(default)]
    pub close_reason: Option<String>,
    #[serde(default)]
    pub realized_pnl: f64,
    #[serde(default)]
    pub status: PositionStatus,
}

impl Default for PositionStatus {
    fn default() -> Self {
        PositionStatus::Open
    }
}

/// Outcome of a trailing-stop evaluation this tick.
pub struct TrailUpdate {
    pub position_id: String,
    pub new_stop_loss: f64,
}

pub struct PositionManager {
    open: RwLock<Vec<Position>>,
    closed: RwLock<Vec<Position>>,
    trailing: TrailingStopConfig,
}

impl PositionManager {
    pub fn new(trailing: TrailingStopConfig) -> Self {
        Self {
            open: RwLock::new(Vec::new()),
            closed: RwLock::new(Vec::new()),
            trailing,
        }
    }

    pub fn open_position(
        &self,
        symbol: &str,
        side: Action,
        entry_price: f64,
        quantity: f64,
        stop_loss: f64,
        take_profit: f64,
        agent: AgentKind,
        confidence: f64,
        oco_ids: OcoIds,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        let pos = Position {
            id: id.clone(),
            symbol: symbol.to_string(),
            side,
            entry_price,
            quantity,
            current_price: entry_price,
            unrealized_pnl: 0.0,
            unrealized_pnl_pct: 0.0,
            stop_loss,
            take_profit,
            trailing_active: false,
            trailing_anchor: entry_price,
            last_trail_update: None,
            oco_ids,
            opened_at: now,
            agent,
            confidence,
            closed_at: None,
            close_reason: None,
            realized_pnl: 0.0,
            status: PositionStatus::Open,
        };

        info!(id = %id, symbol, %side, entry_price, quantity, stop_loss, take_profit, "position opened");
        self.open.write().push(pos);
        id
    }

    /// Adopt a position discovered on the exchange during reconciliation
    /// (spec.md §4.8) rather than opened by this process.
    pub fn adopt_position(&self, position: Position) {
        warn!(id = %position.id, symbol = %position.symbol, "adopting externally-discovered position");
        self.open.write().push(position);
    }

    pub fn update_price(&self, symbol: &str, current_price: f64) {
        let mut positions = self.open.write();
        for pos in positions.iter_mut().filter(|p| p.symbol == symbol) {
            pos.current_price = current_price;

            let direction = if pos.side == Action::Buy { 1.0 } else { -1.0 };
            pos.unrealized_pnl = direction * (current_price - pos.entry_price) * pos.quantity;
            pos.unrealized_pnl_pct = if pos.entry_price > 0.0 {
                direction * ((current_price - pos.entry_price) / pos.entry_price) * 100.0
            } else {
                0.0
            };

            let is_long = pos.side == Action::Buy;
            if is_long {
                pos.trailing_anchor = pos.trailing_anchor.max(current_price);
            } else {
                pos.trailing_anchor = if pos.trailing_anchor == pos.entry_price {
                    current_price
                } else {
                    pos.trailing_anchor.min(current_price)
                };
            }
        }
    }

    /// Evaluate and apply trailing-stop movement for every open position,
    /// rate-limited by `cooldown_seconds`. Returns the set of positions
    /// whose stop-loss moved this tick, so the execution layer can
    /// cancel-and-replace the corresponding exchange order.
    pub fn evaluate_trailing_stops(&self) -> Vec<TrailUpdate> {
        let mut updates = Vec::new();
        let mut positions = self.open.write();
        let now = Utc::now().timestamp();

        for pos in positions.iter_mut() {
            let is_long = pos.side == Action::Buy;
            let profit_pct = if is_long {
                (pos.current_price - pos.entry_price) / pos.entry_price * 100.0
            } else {
                (pos.entry_price - pos.current_price) / pos.entry_price * 100.0
            };

            if !pos.trailing_active {
                if profit_pct >= self.trailing.activation_profit_percent {
                    pos.trailing_active = true;
                    debug!(id = %pos.id, profit_pct, "trailing stop activated");
                } else {
                    continue;
                }
            }

            if let Some(last) = pos.last_trail_update {
                if now - last < self.trailing.cooldown_seconds as i64 {
                    continue;
                }
            }

            let candidate = if is_long {
                pos.trailing_anchor * (1.0 - self.trailing.trail_distance_percent / 100.0)
            } else {
                pos.trailing_anchor * (1.0 + self.trailing.trail_distance_percent / 100.0)
            };

            // Profit-lock invariant: once trailing is active the stop can
            // never sit below (long) / above (short) the entry price, and
            // it only ever moves in the position's favor.
            let floor = if is_long {
                pos.entry_price * (1.0 + self.trailing.min_profit_to_lock / 100.0)
            } else {
                pos.entry_price * (1.0 - self.trailing.min_profit_to_lock / 100.0)
            };

            let new_stop = if is_long { candidate.max(floor) } else { candidate.min(floor) };

            let improves = if is_long { new_stop > pos.stop_loss } else { new_stop < pos.stop_loss };
            if improves {
                pos.stop_loss = new_stop;
                pos.last_trail_update = Some(now);
                updates.push(TrailUpdate {
                    position_id: pos.id.clone(),
                    new_stop_loss: new_stop,
                });
                info!(id = %pos.id, new_stop_loss = new_stop, profit_pct, "trailing stop moved");
            }
        }

        updates
    }

    /// Record the new exchange order IDs after a trailing-stop
    /// cancel-and-replace.
    pub fn set_oco_ids(&self, position_id: &str, oco_ids: OcoIds) {
        let mut positions = self.open.write();
        if let Some(pos) = positions.iter_mut().find(|p| p.id == position_id) {
            pos.oco_ids = oco_ids;
        }
    }

    /// Scan open positions and return `(position_id, reason)` for any that
    /// should be exited on this tick's price.
    pub fn check_exits(&self) -> Vec<(String, String)> {
        let positions = self.open.read();
        let mut exits = Vec::new();

        for pos in positions.iter() {
            let is_long = pos.side == Action::Buy;
            let price = pos.current_price;

            let sl_hit = if is_long { price <= pos.stop_loss } else { price >= pos.stop_loss };
            if sl_hit {
                exits.push((pos.id.clone(), "StopLoss".to_string()));
                continue;
            }

            let tp_hit = if is_long { price >= pos.take_profit } else { price <= pos.take_profit };
            if tp_hit {
                exits.push((pos.id.clone(), "TakeProfit".to_string()));
            }
        }

        exits
    }

    pub fn close_position(&self, id: &str, reason: &str, close_price: f64) -> Option<f64> {
        let mut open = self.open.write();
        let idx = open.iter().position(|p| p.id == id)?;
        let mut pos = open.remove(idx);

        let direction = if pos.side == Action::Buy { 1.0 } else { -1.0 };
        let pnl = direction * (close_price - pos.entry_price) * pos.quantity;
        pos.realized_pnl = pnl;
        pos.current_price = close_price;
        pos.unrealized_pnl = 0.0;
        pos.unrealized_pnl_pct = 0.0;
        pos.status = PositionStatus::Closed;
        pos.closed_at = Some(Utc::now().to_rfc3339());
        pos.close_reason = Some(reason.to_string());

        info!(id, reason, close_price, realized_pnl = pnl, "position closed");
        self.closed.write().push(pos);
        Some(pnl)
    }

    pub fn get_open_positions(&self) -> Vec<Position> {
        self.open.read().clone()
    }

    /// `(symbol, side)` for every open position, used by the risk engine's
    /// correlation filter to judge same-direction exposure.
    pub fn open_position_sides(&self) -> Vec<(String, Action)> {
        self.open.read().iter().map(|p| (p.symbol.clone(), p.side)).collect()
    }

    pub fn get_closed_positions(&self, count: usize) -> Vec<Position> {
        let closed = self.closed.read();
        closed.iter().rev().take(count).cloned().collect()
    }
}

impl std::fmt::Debug for PositionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionManager")
            .field("open_positions", &self.open.read().len())
            .field("closed_positions", &self.closed.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trailing_config() -> TrailingStopConfig {
        TrailingStopConfig {
            activation_profit_percent: 2.0,
            trail_distance_percent: 1.0,
            min_profit_to_lock: 0.05,
            cooldown_seconds: 0,
        }
    }

    #[test]
    fn trailing_stop_never_drops_below_entry_once_active() {
        let mgr = PositionManager::new(trailing_config());
        let id = mgr.open_position("ETHUSDT", Action::Buy, 100.0, 1.0, 95.0, 120.0, AgentKind::Trend, 0.8, OcoIds::default());
        mgr.update_price("ETHUSDT", 103.0); // +3%, activates trailing
        let updates = mgr.evaluate_trailing_stops();
        assert_eq!(updates.len(), 1);
        assert!(updates[0].new_stop_loss >= 100.0, "trailed stop must be at/above entry once active");
        let _ = id;
    }

    #[test]
    fn no_trail_movement_below_activation_threshold() {
        let mgr = PositionManager::new(trailing_config());
        mgr.open_position("ETHUSDT", Action::Buy, 100.0, 1.0, 95.0, 120.0, AgentKind::Trend, 0.8, OcoIds::default());
        mgr.update_price("ETHUSDT", 101.0); // +1%, below 2% activation
        let updates = mgr.evaluate_trailing_stops();
        assert!(updates.is_empty());
    }

    #[test]
    fn stop_loss_exit_detected() {
        let mgr = PositionManager::new(trailing_config());
        mgr.open_position("ETHUSDT", Action::Buy, 100.0, 1.0, 95.0, 120.0, AgentKind::Trend, 0.8, OcoIds::default());
        mgr.update_price("ETHUSDT", 94.0);
        let exits = mgr.check_exits();
        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].1, "StopLoss");
    }

    #[test]
    fn take_profit_exit_detected() {
        let mgr = PositionManager::new(trailing_config());
        mgr.open_position("ETHUSDT", Action::Buy, 100.0, 1.0, 95.0, 120.0, AgentKind::Trend, 0.8, OcoIds::default());
        mgr.update_price("ETHUSDT", 121.0);
        let exits = mgr.check_exits();
        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].1, "TakeProfit");
    }

    #[test]
    fn closing_a_long_position_computes_pnl_in_the_right_direction() {
        let mgr = PositionManager::new(trailing_config());
        let id = mgr.open_position("ETHUSDT", Action::Buy, 100.0, 2.0, 95.0, 120.0, AgentKind::Trend, 0.8, OcoIds::default());
        let pnl = mgr.close_position(&id, "TakeProfit", 110.0).unwrap();
        assert!((pnl - 20.0).abs() < 1e-9);
    }
}
