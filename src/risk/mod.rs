// =============================================================================
// Risk module — sizing, ordered validation, and atomic state persistence
// =============================================================================

pub mod engine;
pub mod state;
pub mod store;

pub use engine::{RiskEngine, SizedOrder};
pub use state::RiskState;
pub use store::RiskStore;
