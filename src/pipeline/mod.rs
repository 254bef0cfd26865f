pub mod cache;
pub mod prefilter;

pub use cache::{DecisionCache, Fingerprint, DEFAULT_TTL};
pub use prefilter::{evaluate as prefilter_evaluate, reject_decision, volatility_gate, PrefilterVerdict, RejectReason};
