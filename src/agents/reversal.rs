// =============================================================================
// Reversal agent — spec.md §4.5.2
// =============================================================================
//
// Four criteria:
//   1. RSI < 30 (oversold).
//   2. price at or within two bars of the lower Bollinger band.
//   3. a confirming candle: the latest close back above the lower band after
//      having touched/pierced it.
//   4. participation: volume_ratio >= min_volume_ratio OR order-book
//      imbalance >= +0.2 (buyers stepping in).
//
// Unlike the trend agent, this one never emits directly even at 4/4 — a
// reversal call is inherently the riskiest shape, so 3-or-4 criteria met
// always routes to the deep reasoner for a second opinion; <=2 is a flat HOLD.

use crate::agents::{consult_deep, count_met, AgentDeps, Criterion};
use crate::config::AiAgentsConfig;
use crate::market_data::Snapshot;
use crate::types::{Action, Decision};

pub async fn decide(snapshot: &Snapshot, config: &AiAgentsConfig, deps: &AgentDeps) -> Decision {
    let ind = &snapshot.indicators;

    let oversold = ind.rsi < 30.0;
    let near_lower_band = snapshot.price <= ind.bb_lower * 1.01;
    let confirming_close = touched_and_recovered(snapshot);
    let participation = ind.volume_ratio >= config.min_volume_ratio || snapshot.order_book.imbalance >= 0.2;

    let criteria = [
        Criterion { label: "RSI below 30 (oversold)", met: oversold },
        Criterion { label: "price at/near lower Bollinger band", met: near_lower_band },
        Criterion { label: "confirming candle closed back above band", met: confirming_close },
        Criterion { label: "volume or order-book participation", met: participation },
    ];

    let met = count_met(&criteria);

    if met >= 3 {
        return consult_deep(crate::types::AgentKind::Reversal, snapshot, Action::Buy, &criteria, deps).await;
    }

    Decision::hold_filtered(format!("reversal agent: only {met}/4 criteria met"))
}

/// A confirming reversal candle: within the last two closed bars the low
/// pierced or touched the lower band, and the latest close is back above it.
fn touched_and_recovered(snapshot: &Snapshot) -> bool {
    let ind = &snapshot.indicators;
    let recent = snapshot.ohlcv.iter().rev().take(2);
    let touched = recent.clone().any(|bar| bar.low <= ind.bb_lower);
    let recovered = snapshot.ohlcv.last().map(|bar| bar.close > ind.bb_lower).unwrap_or(false);
    touched && recovered
}
