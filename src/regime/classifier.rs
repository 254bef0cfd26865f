// =============================================================================
// Regime classifier — deterministic four-way cascade over a Snapshot
// =============================================================================
//
// `low_volatility` is listed in the taxonomy but is never actually reached
// here: any Snapshot whose ATR% falls below threshold is already rejected
// upstream by the volatility gate. The cascade below only ever returns
// `Trending`, `Reversal`, or `Ranging`; `low_volatility` is exposed for
// completeness and for tests that exercise the classifier directly.

use crate::market_data::Snapshot;
use crate::types::Regime;

/// ADX at/above which a directional move counts as a trend.
const TRENDING_ADX_MIN: f64 = 25.0;

/// Evaluate the cascade: `reversal` first (oversold/overbought dominates),
/// then `trending` (requires both a neutral-band RSI and ADX strength plus
/// an EMA-alignment condition), else `ranging`.
pub fn classify(snapshot: &Snapshot) -> Regime {
    let ind = &snapshot.indicators;

    if ind.rsi < 30.0 || ind.rsi > 70.0 {
        return Regime::Reversal;
    }

    let rsi_neutral = (30.0..=70.0).contains(&ind.rsi);
    let strong_adx = ind.adx >= TRENDING_ADX_MIN;

    let ema_cross_up = ind.ema_20 > ind.ema_50 && snapshot.price > ind.ema_20;
    let ema_cross_down = ind.ema_20 < ind.ema_50 && snapshot.price < ind.ema_20;
    let same_side_of_both_emas = (snapshot.price > ind.ema_50 && snapshot.price > ind.ema_200)
        || (snapshot.price < ind.ema_50 && snapshot.price < ind.ema_200);

    if rsi_neutral && strong_adx && (ema_cross_up || ema_cross_down || same_side_of_both_emas) {
        return Regime::Trending;
    }

    Regime::Ranging
}
