// =============================================================================
// Volume SMA & Volume Ratio
// =============================================================================
//
// volume_mean_20 = SMA(volume, 20)
// volume_ratio   = current_volume / volume_mean_20
//
// The ratio is the signal consumed by the pre-filter (dead-market check)
// and the trend agent (breakout/pullback confirmation).

/// Simple moving average of `volumes` over `period` bars (the mean of the
/// *trailing* window ending at the last element, excluding the current bar
/// when `include_current` is false).
///
/// Returns `None` when there are fewer than `period` data points.
pub fn volume_sma(volumes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || volumes.len() < period {
        return None;
    }
    let window = &volumes[volumes.len() - period..];
    let sum: f64 = window.iter().sum();
    let mean = sum / period as f64;
    if mean.is_finite() {
        Some(mean)
    } else {
        None
    }
}

/// Ratio of the most recent volume bar to the trailing 20-bar mean
/// (computed over the bars *preceding* the current one).
///
/// Returns `None` when there is insufficient history or the mean is zero.
pub fn volume_ratio(volumes: &[f64], period: usize) -> Option<f64> {
    if volumes.is_empty() || period == 0 || volumes.len() <= period {
        return None;
    }
    let current = *volumes.last()?;
    let history = &volumes[..volumes.len() - 1];
    let mean = volume_sma(history, period)?;
    if mean == 0.0 {
        return None;
    }
    let ratio = current / mean;
    if ratio.is_finite() {
        Some(ratio)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_insufficient_data() {
        assert!(volume_sma(&[1.0, 2.0], 20).is_none());
    }

    #[test]
    fn sma_zero_period() {
        assert!(volume_sma(&[1.0, 2.0, 3.0], 0).is_none());
    }

    #[test]
    fn sma_basic() {
        let volumes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        let mean = volume_sma(&volumes, 20).unwrap();
        assert!((mean - 10.5).abs() < 1e-9);
    }

    #[test]
    fn ratio_insufficient_data() {
        assert!(volume_ratio(&[1.0; 10], 20).is_none());
    }

    #[test]
    fn ratio_spike_above_one() {
        let mut volumes = vec![100.0; 21];
        *volumes.last_mut().unwrap() = 300.0;
        let ratio = volume_ratio(&volumes, 20).unwrap();
        assert!((ratio - 3.0).abs() < 1e-9);
    }

    #[test]
    fn ratio_dead_market_below_one() {
        let mut volumes = vec![100.0; 21];
        *volumes.last_mut().unwrap() = 20.0;
        let ratio = volume_ratio(&volumes, 20).unwrap();
        assert!((ratio - 0.2).abs() < 1e-9);
    }

    #[test]
    fn ratio_zero_mean_guard() {
        let volumes = vec![0.0; 21];
        assert!(volume_ratio(&volumes, 20).is_none());
    }
}
