// =============================================================================
// Regime classification — spec.md §4.4's deterministic four-way cascade
// =============================================================================

pub mod classifier;

pub use classifier::classify;
