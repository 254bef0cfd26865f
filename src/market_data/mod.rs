pub mod candle_buffer;
pub mod collector;
pub mod correlation;
pub mod orderbook;
pub mod snapshot;

// Re-export the Candle struct for convenient access (e.g. `use crate::market_data::Candle`).
pub use candle_buffer::{Candle, CandleBuffer, CandleKey};
pub use collector::Collector;
pub use correlation::{btc_correlation, pearson_correlation};
pub use orderbook::{BookLevel, OrderBookManager, Pressure};
pub use snapshot::{Indicators, OhlcvBar, OrderBookSummary, Snapshot, MIN_OHLCV_BARS};
