// =============================================================================
// Error Taxonomy
// =============================================================================
//
// Every error that crosses a component boundary is tagged with a stable
// identifier so metrics and tests can match on *kind* rather than message
// text. Call sites still use `anyhow::Result` for ad-hoc context chaining;
// `SathError` is the typed core that gets wrapped at the edges.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SathError {
    #[error("data.feed_unavailable: {0}")]
    DataFeedUnavailable(String),

    #[error("data.insufficient_history: need >= {needed} bars, have {have}")]
    DataInsufficientHistory { needed: usize, have: usize },

    #[error("llm.transport: {0}")]
    LlmTransport(String),

    #[error("llm.parse: {0}")]
    LlmParse(String),

    #[error("risk.reject.{kind}: {reason}")]
    RiskReject { kind: RiskRejectKind, reason: String },

    #[error("exec.slippage_abort: moved {moved_pct:.4}% against max {max_pct:.4}%")]
    ExecSlippageAbort { moved_pct: f64, max_pct: f64 },

    #[error("exec.exchange_error: {0}")]
    ExecExchangeError(String),

    #[error("state.persist_error: {0}")]
    StatePersistError(String),
}

impl SathError {
    /// Stable string identifier, suitable for metrics labels.
    pub fn identifier(&self) -> &'static str {
        match self {
            Self::DataFeedUnavailable(_) => "data.feed_unavailable",
            Self::DataInsufficientHistory { .. } => "data.insufficient_history",
            Self::LlmTransport(_) => "llm.transport",
            Self::LlmParse(_) => "llm.parse",
            Self::RiskReject { kind, .. } => kind.identifier(),
            Self::ExecSlippageAbort { .. } => "exec.slippage_abort",
            Self::ExecExchangeError(_) => "exec.exchange_error",
            Self::StatePersistError(_) => "state.persist_error",
        }
    }

    /// Whether the orchestrator should retry this error within the same
    /// cycle (per spec.md §7's propagation policy).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LlmTransport(_) | Self::ExecExchangeError(_))
    }

    /// Whether this error must escalate to the kill-switch.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::StatePersistError(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskRejectKind {
    KillSwitch,
    Confidence,
    Session,
    Rr,
    Balance,
    Correlation,
    Fees,
    MinSize,
}

impl RiskRejectKind {
    pub fn identifier(&self) -> &'static str {
        match self {
            Self::KillSwitch => "risk.reject.kill_switch",
            Self::Confidence => "risk.reject.confidence",
            Self::Session => "risk.reject.session",
            Self::Rr => "risk.reject.rr",
            Self::Balance => "risk.reject.balance",
            Self::Correlation => "risk.reject.correlation",
            Self::Fees => "risk.reject.fees",
            Self::MinSize => "risk.reject.min_size",
        }
    }
}

impl std::fmt::Display for RiskRejectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.identifier().trim_start_matches("risk.reject."))
    }
}
