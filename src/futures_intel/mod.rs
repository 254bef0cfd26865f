// =============================================================================
// Futures Intelligence Module
// =============================================================================
//
// Two independent REST collectors supply the optional fields of Snapshot
// (spec.md §3): funding rate and open interest. Both are null when the venue
// doesn't support perpetual futures for the symbol (e.g. a spot-only pair),
// or when the fetch fails — a missing optional field never blocks the
// pipeline, it just leaves the corresponding Snapshot field `None`.

pub mod funding_rate;
pub mod open_interest;

pub use funding_rate::{FundingRateMonitor, FundingState};
pub use open_interest::{OIState, OpenInterestTracker};
