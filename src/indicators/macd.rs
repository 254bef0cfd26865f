// =============================================================================
// Moving Average Convergence Divergence (MACD)
// =============================================================================
//
// MACD line    = EMA(fast) - EMA(slow)
// Signal line  = EMA(signal_period) of the MACD line
// Histogram    = MACD line - Signal line
//
// Standard parameters are 12/26/9; the pre-filter and regime classifier
// treat the histogram's magnitude relative to ATR as a momentum gate.

use super::ema::calculate_ema;

/// MACD line, signal line and histogram for the most recent bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdResult {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Compute the latest MACD reading from a `closes` slice.
///
/// # Edge cases
/// - Fewer than `slow_period + signal_period` closes => `None`.
/// - Any non-finite intermediate value => `None`.
pub fn calculate_macd(
    closes: &[f64],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
) -> Option<MacdResult> {
    if fast_period == 0 || slow_period == 0 || signal_period == 0 {
        return None;
    }
    if slow_period <= fast_period {
        return None;
    }
    if closes.len() < slow_period + signal_period {
        return None;
    }

    let fast = calculate_ema(closes, fast_period);
    let slow = calculate_ema(closes, slow_period);
    if fast.is_empty() || slow.is_empty() {
        return None;
    }

    // Align the two series on their tails: `fast` starts `slow_period -
    // fast_period` bars earlier than `slow` because it needs fewer seed bars.
    let offset = slow_period - fast_period;
    if fast.len() <= offset {
        return None;
    }
    let macd_line: Vec<f64> = fast[offset..]
        .iter()
        .zip(slow.iter())
        .map(|(f, s)| f - s)
        .collect();

    if macd_line.len() < signal_period {
        return None;
    }

    let signal_series = calculate_ema(&macd_line, signal_period);
    let signal = *signal_series.last()?;
    let macd = *macd_line.last()?;
    let histogram = macd - signal;

    if !macd.is_finite() || !signal.is_finite() || !histogram.is_finite() {
        return None;
    }

    Some(MacdResult {
        macd,
        signal,
        histogram,
    })
}

/// Convenience wrapper using the standard 12/26/9 parameters.
pub fn calculate(closes: &[f64]) -> Option<MacdResult> {
    calculate_macd(closes, 12, 26, 9)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macd_insufficient_data() {
        let closes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        assert!(calculate(&closes).is_none());
    }

    #[test]
    fn macd_zero_period_guard() {
        let closes: Vec<f64> = (1..=100).map(|x| x as f64).collect();
        assert!(calculate_macd(&closes, 0, 26, 9).is_none());
        assert!(calculate_macd(&closes, 12, 0, 9).is_none());
        assert!(calculate_macd(&closes, 12, 26, 0).is_none());
    }

    #[test]
    fn macd_fast_must_be_shorter_than_slow() {
        let closes: Vec<f64> = (1..=100).map(|x| x as f64).collect();
        assert!(calculate_macd(&closes, 26, 12, 9).is_none());
    }

    #[test]
    fn macd_uptrend_is_positive() {
        let closes: Vec<f64> = (1..=200).map(|x| x as f64).collect();
        let r = calculate(&closes).unwrap();
        assert!(r.macd > 0.0, "macd should be positive in a steady uptrend");
    }

    #[test]
    fn macd_flat_market_is_near_zero() {
        let closes = vec![100.0; 200];
        let r = calculate(&closes).unwrap();
        assert!(r.macd.abs() < 1e-9);
        assert!(r.histogram.abs() < 1e-9);
    }

    #[test]
    fn macd_result_is_finite() {
        let closes: Vec<f64> = (1..=200)
            .map(|x| 100.0 + (x as f64 * 0.37).sin() * 5.0)
            .collect();
        let r = calculate(&closes).unwrap();
        assert!(r.macd.is_finite());
        assert!(r.signal.is_finite());
        assert!(r.histogram.is_finite());
    }
}
