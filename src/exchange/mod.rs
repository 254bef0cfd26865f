// =============================================================================
// Exchange client abstraction
// =============================================================================
//
// `spec.md` treats "the exchange SDK itself" as an external collaborator
// whose interface is specified only where the core consumes or produces
// data. `ExchangeClient` is that interface: the operations list from
// spec.md §6 (OHLCV history, order book top-N, ticker, funding rate / open
// interest, account balances, place/cancel orders, list open orders, fetch
// recent fills). `BinanceClient` is the one concrete implementation,
// shaped after the signed-request idiom the teacher already used for
// Binance spot.

pub mod binance;
pub mod rate_limit;

pub use binance::BinanceClient;
pub use rate_limit::RateLimitTracker;

use anyhow::Result;
use async_trait::async_trait;

use crate::market_data::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Limit,
    Market,
    StopLoss,
    StopLossLimit,
    TakeProfit,
    TakeProfitLimit,
}

impl OrderType {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderType::Limit => "LIMIT",
            OrderType::Market => "MARKET",
            OrderType::StopLoss => "STOP_LOSS",
            OrderType::StopLossLimit => "STOP_LOSS_LIMIT",
            OrderType::TakeProfit => "TAKE_PROFIT",
            OrderType::TakeProfitLimit => "TAKE_PROFIT_LIMIT",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub order_id: u64,
    pub client_order_id: Option<String>,
    pub status: String,
    pub filled_quantity: f64,
    pub raw: serde_json::Value,
}

/// The subset of exchange operations the core pipeline needs. A venue that
/// implements this trait is a valid collaborator regardless of its wire
/// protocol.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn get_klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Candle>>;
    async fn get_price(&self, symbol: &str) -> Result<f64>;
    async fn get_balance(&self, asset: &str) -> Result<f64>;
    async fn place_order(
        &self,
        symbol: &str,
        side: OrderSide,
        order_type: OrderType,
        quantity: f64,
        price: Option<f64>,
        stop_price: Option<f64>,
    ) -> Result<PlacedOrder>;
    async fn cancel_order(&self, symbol: &str, order_id: u64) -> Result<()>;
    async fn get_open_orders(&self, symbol: Option<&str>) -> Result<Vec<serde_json::Value>>;
    async fn lot_step(&self, symbol: &str) -> Result<f64>;
    async fn min_notional(&self, symbol: &str) -> Result<f64>;
}
