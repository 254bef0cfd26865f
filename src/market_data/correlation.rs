// =============================================================================
// BTC correlation — Pearson correlation of close-to-close returns
// =============================================================================

/// Pearson correlation coefficient between two equal-length return series,
/// clamped to [-1, 1]. Returns `None` when there is insufficient data or
/// either series has zero variance.
pub fn pearson_correlation(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.len() < 2 {
        return None;
    }

    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..a.len() {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }

    if var_a == 0.0 || var_b == 0.0 {
        return None;
    }

    let corr = cov / (var_a.sqrt() * var_b.sqrt());
    if !corr.is_finite() {
        return None;
    }

    Some(corr.clamp(-1.0, 1.0))
}

/// Convert a close-price series into a simple-return series (length n-1).
pub fn returns(closes: &[f64]) -> Vec<f64> {
    closes
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect()
}

/// Correlation between `symbol_closes` and `btc_closes` computed over
/// returns. `None` for BTC itself or on insufficient/degenerate data.
pub fn btc_correlation(symbol: &str, symbol_closes: &[f64], btc_closes: &[f64]) -> Option<f64> {
    if symbol.eq_ignore_ascii_case("BTCUSDT") || symbol.eq_ignore_ascii_case("BTC/USDT") {
        return None;
    }
    let len = symbol_closes.len().min(btc_closes.len());
    if len < 2 {
        return None;
    }
    let a = returns(&symbol_closes[symbol_closes.len() - len..]);
    let b = returns(&btc_closes[btc_closes.len() - len..]);
    pearson_correlation(&a, &b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfectly_correlated_series() {
        let a = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let b = vec![2.0, 4.0, 6.0, 8.0, 10.0];
        let corr = pearson_correlation(&a, &b).unwrap();
        assert!((corr - 1.0).abs() < 1e-9);
    }

    #[test]
    fn perfectly_anti_correlated_series() {
        let a = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let b = vec![5.0, 4.0, 3.0, 2.0, 1.0];
        let corr = pearson_correlation(&a, &b).unwrap();
        assert!((corr + 1.0).abs() < 1e-9);
    }

    #[test]
    fn zero_variance_returns_none() {
        let a = vec![1.0, 1.0, 1.0, 1.0];
        let b = vec![1.0, 2.0, 3.0, 4.0];
        assert!(pearson_correlation(&a, &b).is_none());
    }

    #[test]
    fn mismatched_length_returns_none() {
        assert!(pearson_correlation(&[1.0, 2.0], &[1.0]).is_none());
    }

    #[test]
    fn btc_itself_has_no_correlation() {
        let closes = vec![100.0; 30];
        assert!(btc_correlation("BTCUSDT", &closes, &closes).is_none());
    }

    #[test]
    fn returns_length_is_n_minus_one() {
        let closes = vec![100.0, 101.0, 99.0, 102.0];
        assert_eq!(returns(&closes).len(), 3);
    }
}
