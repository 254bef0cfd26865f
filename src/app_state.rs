// =============================================================================
// Shared application state
// =============================================================================
//
// Everything the orchestrator's worker pool and the reconciliation loop need
// in common, wired once at startup and handed around as `Arc<AppState>`.
// Each field owns its own interior mutability; AppState itself adds nothing
// but the wiring.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::agents::AgentDeps;
use crate::config::Config;
use crate::exchange::ExchangeClient;
use crate::execution::ExecutionEngine;
use crate::market_data::{CandleBuffer, Collector, OrderBookManager};
use crate::pipeline::DecisionCache;
use crate::position_engine::PositionManager;
use crate::risk::RiskEngine;
use crate::types::BalanceInfo;

pub struct AppState {
    pub config: Config,
    pub exchange: Arc<dyn ExchangeClient>,
    pub candles: Arc<CandleBuffer>,
    pub order_books: Arc<OrderBookManager>,
    pub collector: Collector,
    pub decision_cache: DecisionCache,
    pub agent_deps: AgentDeps,
    pub risk: Arc<RiskEngine>,
    pub positions: Arc<PositionManager>,
    pub execution: ExecutionEngine,
    pub balances: RwLock<Vec<BalanceInfo>>,
    pub last_reconcile_error: RwLock<Option<String>>,
}

impl AppState {
    /// Current balance of the account's quote asset, cached from the last
    /// reconciliation pass.
    pub fn quote_balance(&self, asset: &str) -> f64 {
        self.balances
            .read()
            .iter()
            .find(|b| b.asset == asset)
            .map(|b| b.free)
            .unwrap_or(0.0)
    }
}
