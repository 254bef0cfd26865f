// =============================================================================
// Snapshot — the immutable per-symbol market state consumed by the pipeline
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::market_data::orderbook::{BookLevel, Pressure};

/// Minimum number of closed bars required before a snapshot is usable.
pub const MIN_OHLCV_BARS: usize = 200;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OhlcvBar {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Indicators {
    pub rsi: f64,
    pub ema_20: f64,
    pub ema_50: f64,
    pub ema_200: f64,
    pub macd_line: f64,
    pub macd_signal: f64,
    pub macd_histogram: f64,
    pub bb_upper: f64,
    pub bb_mid: f64,
    pub bb_lower: f64,
    pub atr: f64,
    pub atr_pct: f64,
    pub adx: f64,
    pub volume_mean_20: f64,
    pub volume_current: f64,
    pub volume_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookSummary {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub best_bid_wall_price: Option<f64>,
    pub best_ask_wall_price: Option<f64>,
    /// In [-1, 1].
    pub imbalance: f64,
    pub pressure: Pressure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub symbol: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub price: f64,
    pub ohlcv: Vec<OhlcvBar>,
    pub indicators: Indicators,
    pub order_book: OrderBookSummary,
    /// Null when the venue does not supply perpetual-futures funding data.
    pub funding_rate: Option<f64>,
    /// Null when the venue does not supply open-interest data.
    pub open_interest: Option<f64>,
    /// Null for BTC itself.
    pub btc_correlation: Option<f64>,
}

impl Snapshot {
    /// True when the snapshot has at least [`MIN_OHLCV_BARS`] bars, per
    /// the data-model invariant and the `data.insufficient_history` error.
    pub fn has_sufficient_history(&self) -> bool {
        self.ohlcv.len() >= MIN_OHLCV_BARS
    }
}
