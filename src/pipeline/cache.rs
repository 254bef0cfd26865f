// =============================================================================
// Decision cache — LRU, fingerprint-keyed, bounded, short-TTL
// =============================================================================
//
// The key is a stable, low-resolution fingerprint of a Snapshot: two
// Snapshots that differ only in noise (a one-point RSI wobble, a penny of
// price) hash to the same bucket and reuse the Decision already paid for.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::market_data::Snapshot;
use crate::types::Decision;

/// Maximum number of live entries before the least-recently-used one is
/// evicted.
const MAX_ENTRIES: usize = 10_000;

/// Default time-to-live for a cached Decision.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// A low-resolution, behavior-preserving feature key. Two Snapshots with
/// identical fingerprints are treated as producing the same Decision.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    symbol: String,
    rsi_bucket: i32,
    price_vs_ema50: i8,
    price_vs_ema200: i8,
    macd_hist_sign: i8,
    adx_bucket: u8,
    volume_ratio_bucket: u8,
}

fn sign(x: f64) -> i8 {
    if x > 0.0 {
        1
    } else if x < 0.0 {
        -1
    } else {
        0
    }
}

fn adx_bucket(adx: f64) -> u8 {
    if adx < 20.0 {
        0
    } else if adx < 25.0 {
        1
    } else if adx < 50.0 {
        2
    } else {
        3
    }
}

fn volume_ratio_bucket(ratio: f64) -> u8 {
    if ratio < 0.3 {
        0
    } else if ratio < 1.0 {
        1
    } else if ratio < 1.5 {
        2
    } else {
        3
    }
}

impl Fingerprint {
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let ind = &snapshot.indicators;
        Self {
            symbol: snapshot.symbol.clone(),
            rsi_bucket: (ind.rsi / 5.0).round() as i32 * 5,
            price_vs_ema50: sign(snapshot.price - ind.ema_50),
            price_vs_ema200: sign(snapshot.price - ind.ema_200),
            macd_hist_sign: sign(ind.macd_histogram),
            adx_bucket: adx_bucket(ind.adx),
            volume_ratio_bucket: volume_ratio_bucket(ind.volume_ratio),
        }
    }
}

struct Entry {
    decision: Decision,
    inserted_at: Instant,
    last_used: Instant,
}

/// In-memory, bounded, TTL-expiring Decision cache keyed by [`Fingerprint`].
/// Reads and writes share one lock (fine-grained enough at this scale — the
/// cache holds at most [`MAX_ENTRIES`] small entries).
pub struct DecisionCache {
    entries: Mutex<HashMap<Fingerprint, Entry>>,
    ttl: Duration,
}

impl DecisionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Look up a Decision for this Snapshot's fingerprint. Expired entries
    /// are evicted lazily on access.
    pub fn get(&self, snapshot: &Snapshot) -> Option<Decision> {
        let key = Fingerprint::from_snapshot(snapshot);
        let mut entries = self.entries.lock();

        let hit = match entries.get_mut(&key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                entry.last_used = Instant::now();
                Some(entry.decision.clone())
            }
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        };

        if hit.is_some() {
            debug!(symbol = %snapshot.symbol, "cache_hit");
        }
        hit
    }

    /// Insert or refresh a Decision for this Snapshot's fingerprint,
    /// evicting the least-recently-used entry if the cache is at capacity.
    pub fn put(&self, snapshot: &Snapshot, decision: Decision) {
        let key = Fingerprint::from_snapshot(snapshot);
        let mut entries = self.entries.lock();

        if entries.len() >= MAX_ENTRIES && !entries.contains_key(&key) {
            if let Some(lru_key) = entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&lru_key);
            }
        }

        let now = Instant::now();
        entries.insert(
            key,
            Entry {
                decision,
                inserted_at: now,
                last_used: now,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DecisionCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::orderbook::Pressure;
    use crate::market_data::snapshot::{Indicators, OrderBookSummary};
    use crate::types::{Action, AgentKind};

    fn snapshot_with(symbol: &str, rsi: f64, price: f64, ema50: f64, ema200: f64, macd_hist: f64, adx: f64, vol_ratio: f64) -> Snapshot {
        Snapshot {
            symbol: symbol.to_string(),
            timestamp: chrono::Utc::now(),
            price,
            ohlcv: Vec::new(),
            indicators: Indicators {
                rsi,
                ema_20: price,
                ema_50: ema50,
                ema_200: ema200,
                macd_line: 0.0,
                macd_signal: 0.0,
                macd_histogram: macd_hist,
                bb_upper: price * 1.01,
                bb_mid: price,
                bb_lower: price * 0.99,
                atr: 1.0,
                atr_pct: 1.0,
                adx,
                volume_mean_20: 100.0,
                volume_current: 100.0,
                volume_ratio: vol_ratio,
            },
            order_book: OrderBookSummary {
                bids: Vec::new(),
                asks: Vec::new(),
                best_bid_wall_price: None,
                best_ask_wall_price: None,
                imbalance: 0.0,
                pressure: Pressure::Neutral,
            },
            funding_rate: None,
            open_interest: None,
            btc_correlation: None,
        }
    }

    fn dummy_decision() -> Decision {
        Decision {
            action: Action::Buy,
            confidence: 0.8,
            entry_price: Some(100.0),
            stop_loss: Some(95.0),
            take_profit: Some(110.0),
            agent: AgentKind::Trend,
            reasoning: "test".into(),
        }
    }

    #[test]
    fn miss_on_empty_cache() {
        let cache = DecisionCache::default();
        let snap = snapshot_with("BTCUSDT", 52.0, 50000.0, 49900.0, 49000.0, 0.5, 30.0, 1.0);
        assert!(cache.get(&snap).is_none());
    }

    #[test]
    fn hit_when_fingerprint_unchanged_across_small_rsi_drift() {
        let cache = DecisionCache::default();
        let snap1 = snapshot_with("BTCUSDT", 52.0, 50000.0, 49900.0, 49000.0, 0.5, 30.0, 1.0);
        cache.put(&snap1, dummy_decision());

        // RSI drifts 52 -> 53 but rounds to the same bucket (50); EMA
        // relations, ADX bucket, and MACD sign are all unchanged.
        let snap2 = snapshot_with("BTCUSDT", 53.0, 50010.0, 49900.0, 49000.0, 0.6, 31.0, 1.05);
        let cached = cache.get(&snap2).expect("expected cache hit");
        assert_eq!(cached.action, Action::Buy);
    }

    #[test]
    fn miss_when_macd_sign_flips() {
        let cache = DecisionCache::default();
        let snap1 = snapshot_with("BTCUSDT", 52.0, 50000.0, 49900.0, 49000.0, 0.5, 30.0, 1.0);
        cache.put(&snap1, dummy_decision());

        let snap2 = snapshot_with("BTCUSDT", 52.0, 50000.0, 49900.0, 49000.0, -0.5, 30.0, 1.0);
        assert!(cache.get(&snap2).is_none());
    }

    #[test]
    fn expired_entry_is_a_miss_and_is_evicted() {
        let cache = DecisionCache::new(Duration::from_millis(1));
        let snap = snapshot_with("BTCUSDT", 52.0, 50000.0, 49900.0, 49000.0, 0.5, 30.0, 1.0);
        cache.put(&snap, dummy_decision());
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(&snap).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn different_symbols_never_collide() {
        let cache = DecisionCache::default();
        let snap_btc = snapshot_with("BTCUSDT", 52.0, 50000.0, 49900.0, 49000.0, 0.5, 30.0, 1.0);
        cache.put(&snap_btc, dummy_decision());

        let snap_eth = snapshot_with("ETHUSDT", 52.0, 50000.0, 49900.0, 49000.0, 0.5, 30.0, 1.0);
        assert!(cache.get(&snap_eth).is_none());
    }

    #[test]
    fn adx_bucket_boundaries() {
        assert_eq!(adx_bucket(19.9), 0);
        assert_eq!(adx_bucket(20.0), 1);
        assert_eq!(adx_bucket(24.9), 1);
        assert_eq!(adx_bucket(25.0), 2);
        assert_eq!(adx_bucket(49.9), 2);
        assert_eq!(adx_bucket(50.0), 3);
    }

    #[test]
    fn volume_ratio_bucket_boundaries() {
        assert_eq!(volume_ratio_bucket(0.1), 0);
        assert_eq!(volume_ratio_bucket(0.3), 1);
        assert_eq!(volume_ratio_bucket(0.99), 1);
        assert_eq!(volume_ratio_bucket(1.0), 2);
        assert_eq!(volume_ratio_bucket(1.49), 2);
        assert_eq!(volume_ratio_bucket(1.5), 3);
    }
}
