// =============================================================================
// Order Book Manager — Real-time orderbook aggregation
// =============================================================================
//
// Tracks top-N bid/ask levels per symbol plus derived statistics: spread,
// aggregate imbalance, the largest-size level on each side (the "wall"), and
// a coarse pressure classification consumed by the snapshot assembler.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_tungstenite::connect_async;
use tracing::{error, info, warn};

/// A single price/quantity level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub quantity: f64,
}

/// Coarse order-book pressure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pressure {
    Bullish,
    Bearish,
    Neutral,
}

impl std::fmt::Display for Pressure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Pressure::Bullish => "bullish",
            Pressure::Bearish => "bearish",
            Pressure::Neutral => "neutral",
        };
        write!(f, "{s}")
    }
}

/// Imbalance magnitude above which the book is considered directional
/// rather than neutral.
const PRESSURE_THRESHOLD: f64 = 0.15;

/// Manages orderbook state for multiple symbols.
pub struct OrderBookManager {
    books: RwLock<HashMap<String, OrderBookState>>,
}

/// Orderbook state for a single symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookState {
    pub symbol: String,
    pub best_bid: f64,
    pub best_ask: f64,
    pub bid_depth: f64,
    pub ask_depth: f64,
    pub spread_bps: f64,
    /// Aggregate depth imbalance in [-1, 1]; positive favors bids.
    pub imbalance: f64,
    pub last_update_id: u64,
    /// Top-N bid levels, best first.
    pub bids: Vec<BookLevel>,
    /// Top-N ask levels, best first.
    pub asks: Vec<BookLevel>,
    /// Price of the largest single bid level ("wall"), if any.
    pub best_bid_wall_price: Option<f64>,
    /// Price of the largest single ask level ("wall"), if any.
    pub best_ask_wall_price: Option<f64>,
    pub pressure: Pressure,
}

impl OrderBookManager {
    pub fn new() -> Self {
        Self {
            books: RwLock::new(HashMap::new()),
        }
    }

    /// Update the orderbook state for a symbol from raw top-N levels.
    pub fn update_levels(
        &self,
        symbol: &str,
        bids: Vec<BookLevel>,
        asks: Vec<BookLevel>,
        update_id: u64,
    ) {
        let best_bid = bids.first().map(|l| l.price).unwrap_or(0.0);
        let best_ask = asks.first().map(|l| l.price).unwrap_or(0.0);
        let bid_depth: f64 = bids.iter().map(|l| l.quantity).sum();
        let ask_depth: f64 = asks.iter().map(|l| l.quantity).sum();

        let mid = (best_bid + best_ask) / 2.0;
        let spread_bps = if mid > 0.0 {
            ((best_ask - best_bid) / mid) * 10_000.0
        } else {
            0.0
        };

        let total_depth = bid_depth + ask_depth;
        let imbalance = if total_depth > 0.0 {
            (bid_depth - ask_depth) / total_depth
        } else {
            0.0
        };

        let best_bid_wall_price = bids
            .iter()
            .max_by(|a, b| a.quantity.total_cmp(&b.quantity))
            .map(|l| l.price);
        let best_ask_wall_price = asks
            .iter()
            .max_by(|a, b| a.quantity.total_cmp(&b.quantity))
            .map(|l| l.price);

        let pressure = if imbalance > PRESSURE_THRESHOLD {
            Pressure::Bullish
        } else if imbalance < -PRESSURE_THRESHOLD {
            Pressure::Bearish
        } else {
            Pressure::Neutral
        };

        let state = OrderBookState {
            symbol: symbol.to_string(),
            best_bid,
            best_ask,
            bid_depth,
            ask_depth,
            spread_bps,
            imbalance,
            last_update_id: update_id,
            bids,
            asks,
            best_bid_wall_price,
            best_ask_wall_price,
            pressure,
        };

        self.books.write().insert(symbol.to_string(), state);
    }

    /// Get the current orderbook state for a symbol.
    pub fn get(&self, symbol: &str) -> Option<OrderBookState> {
        self.books.read().get(symbol).cloned()
    }

    /// Get the spread in basis points for a symbol.
    pub fn spread_bps(&self, symbol: &str) -> Option<f64> {
        self.books.read().get(symbol).map(|s| s.spread_bps)
    }

    /// Get the orderbook imbalance for a symbol (-1 to +1).
    pub fn imbalance(&self, symbol: &str) -> Option<f64> {
        self.books.read().get(symbol).map(|s| s.imbalance)
    }

    /// Get all tracked symbols.
    pub fn symbols(&self) -> Vec<String> {
        self.books.read().keys().cloned().collect()
    }
}

impl Default for OrderBookManager {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Depth WebSocket stream
// ---------------------------------------------------------------------------

/// Connect to the Binance partial depth WebSocket stream for a single symbol
/// and feed orderbook updates into `manager`.
///
/// Uses the `@depth20@100ms` stream which provides the top 20 levels of the
/// orderbook at 100ms update intervals.
///
/// Runs until the stream disconnects or an error occurs, then returns so that
/// the caller can handle reconnection.
pub async fn run_depth_stream(symbol: &str, manager: &Arc<OrderBookManager>) -> Result<()> {
    let lower = symbol.to_lowercase();
    let url = format!("wss://stream.binance.com:9443/ws/{lower}@depth20@100ms");
    info!(url = %url, symbol = %symbol, "connecting to depth WebSocket");

    let (ws_stream, _response) = connect_async(&url)
        .await
        .context("failed to connect to depth WebSocket")?;

    info!(symbol = %symbol, "depth WebSocket connected");
    let (_write, mut read) = ws_stream.split();

    loop {
        match read.next().await {
            Some(Ok(msg)) => {
                if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                    match parse_depth_message(&text) {
                        Ok((bids, asks, update_id)) => {
                            manager.update_levels(symbol, bids, asks, update_id);
                        }
                        Err(e) => {
                            warn!(error = %e, "failed to parse depth message");
                        }
                    }
                }
            }
            Some(Err(e)) => {
                error!(symbol = %symbol, error = %e, "depth WebSocket read error");
                return Err(e.into());
            }
            None => {
                warn!(symbol = %symbol, "depth WebSocket stream ended");
                return Ok(());
            }
        }
    }
}

/// Parse a Binance partial-depth message into top-N bid/ask levels.
///
/// Expected shape:
/// ```json
/// {
///   "lastUpdateId": 12345,
///   "bids": [["37000.00", "1.5"], ...],
///   "asks": [["37001.00", "1.2"], ...]
/// }
/// ```
fn parse_depth_message(text: &str) -> Result<(Vec<BookLevel>, Vec<BookLevel>, u64)> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse depth JSON")?;

    let update_id = root["lastUpdateId"]
        .as_u64()
        .context("missing field lastUpdateId")?;

    let parse_levels = |arr: &serde_json::Value| -> Vec<BookLevel> {
        arr.as_array()
            .map(|levels| {
                levels
                    .iter()
                    .filter_map(|level| {
                        let price: f64 = level.get(0)?.as_str()?.parse().ok()?;
                        let quantity: f64 = level.get(1)?.as_str()?.parse().ok()?;
                        Some(BookLevel { price, quantity })
                    })
                    .collect()
            })
            .unwrap_or_default()
    };

    let bids = parse_levels(&root["bids"]);
    let asks = parse_levels(&root["asks"]);

    Ok((bids, asks, update_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn levels(prices_qty: &[(f64, f64)]) -> Vec<BookLevel> {
        prices_qty
            .iter()
            .map(|&(price, quantity)| BookLevel { price, quantity })
            .collect()
    }

    #[test]
    fn update_levels_computes_spread_and_imbalance() {
        let mgr = OrderBookManager::new();
        mgr.update_levels(
            "BTCUSDT",
            levels(&[(100.0, 5.0), (99.0, 3.0)]),
            levels(&[(101.0, 2.0), (102.0, 1.0)]),
            1,
        );
        let state = mgr.get("BTCUSDT").unwrap();
        assert!((state.best_bid - 100.0).abs() < 1e-9);
        assert!((state.best_ask - 101.0).abs() < 1e-9);
        assert!(state.spread_bps > 0.0);
        // bid_depth=8, ask_depth=3 -> imbalance = 5/11
        assert!((state.imbalance - (5.0 / 11.0)).abs() < 1e-9);
    }

    #[test]
    fn wall_detection_picks_largest_level() {
        let mgr = OrderBookManager::new();
        mgr.update_levels(
            "ETHUSDT",
            levels(&[(100.0, 1.0), (99.0, 50.0), (98.0, 2.0)]),
            levels(&[(101.0, 3.0), (102.0, 40.0)]),
            1,
        );
        let state = mgr.get("ETHUSDT").unwrap();
        assert_eq!(state.best_bid_wall_price, Some(99.0));
        assert_eq!(state.best_ask_wall_price, Some(102.0));
    }

    #[test]
    fn pressure_classification_thresholds() {
        let mgr = OrderBookManager::new();
        mgr.update_levels("A", levels(&[(100.0, 90.0)]), levels(&[(101.0, 10.0)]), 1);
        assert_eq!(mgr.get("A").unwrap().pressure, Pressure::Bullish);

        mgr.update_levels("B", levels(&[(100.0, 10.0)]), levels(&[(101.0, 90.0)]), 1);
        assert_eq!(mgr.get("B").unwrap().pressure, Pressure::Bearish);

        mgr.update_levels("C", levels(&[(100.0, 50.0)]), levels(&[(101.0, 50.0)]), 1);
        assert_eq!(mgr.get("C").unwrap().pressure, Pressure::Neutral);
    }

    #[test]
    fn empty_book_has_zero_spread_and_no_walls() {
        let mgr = OrderBookManager::new();
        mgr.update_levels("D", Vec::new(), Vec::new(), 1);
        let state = mgr.get("D").unwrap();
        assert_eq!(state.spread_bps, 0.0);
        assert_eq!(state.imbalance, 0.0);
        assert_eq!(state.best_bid_wall_price, None);
        assert_eq!(state.best_ask_wall_price, None);
        assert_eq!(state.pressure, Pressure::Neutral);
    }

    #[test]
    fn parse_depth_message_ok() {
        let json = r#"{
            "lastUpdateId": 42,
            "bids": [["100.00", "1.5"], ["99.00", "2.0"]],
            "asks": [["101.00", "1.2"], ["102.00", "0.8"]]
        }"#;
        let (bids, asks, id) = parse_depth_message(json).unwrap();
        assert_eq!(id, 42);
        assert_eq!(bids.len(), 2);
        assert_eq!(asks.len(), 2);
        assert!((bids[0].price - 100.0).abs() < 1e-9);
    }
}
