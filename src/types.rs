// =============================================================================
// Shared types used across the Aurora trading engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Quote assets recognized when splitting an exchange symbol such as
/// "SOLUSDT" into its base ("SOL") and quote ("USDT") legs. Longest/most
/// specific match first so e.g. "BTCUSDT" isn't mis-split on a shorter
/// coincidental suffix.
const KNOWN_QUOTE_ASSETS: &[&str] = &["FDUSD", "BUSD", "USDT", "USDC", "BTC", "ETH", "BNB"];

/// Split an exchange symbol into `(base, quote)`. Falls back to
/// `(symbol, "")` for a symbol that doesn't end in any known quote asset.
pub fn split_symbol(symbol: &str) -> (&str, &str) {
    for quote in KNOWN_QUOTE_ASSETS {
        if let Some(base) = symbol.strip_suffix(quote) {
            if !base.is_empty() {
                return (base, quote);
            }
        }
    }
    (symbol, "")
}

/// Balance snapshot for a single asset from the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceInfo {
    pub asset: String,
    #[serde(default)]
    pub free: f64,
    #[serde(default)]
    pub locked: f64,
}

/// Whether the engine is actively trading, paused, or killed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingMode {
    Live,
    Paused,
    Killed,
}

impl Default for TradingMode {
    fn default() -> Self {
        Self::Paused
    }
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "Live"),
            Self::Paused => write!(f, "Paused"),
            Self::Killed => write!(f, "Killed"),
        }
    }
}

/// Whether we are running against real funds or simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountMode {
    Demo,
    Live,
}

impl Default for AccountMode {
    fn default() -> Self {
        Self::Demo
    }
}

impl std::fmt::Display for AccountMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Demo => write!(f, "Demo"),
            Self::Live => write!(f, "Live"),
        }
    }
}

/// Trade direction an agent recommends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
            Self::Hold => write!(f, "HOLD"),
        }
    }
}

/// Which agent produced a Decision. `Filter` marks pre-filter/volatility-gate
/// HOLDs that never reached an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Trend,
    Reversal,
    Range,
    Filter,
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trend => write!(f, "trend"),
            Self::Reversal => write!(f, "reversal"),
            Self::Range => write!(f, "range"),
            Self::Filter => write!(f, "filter"),
        }
    }
}

/// Market-behavior classification produced by the regime classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Regime {
    Trending,
    Reversal,
    Ranging,
    LowVolatility,
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trending => write!(f, "trending"),
            Self::Reversal => write!(f, "reversal"),
            Self::Ranging => write!(f, "ranging"),
            Self::LowVolatility => write!(f, "low_volatility"),
        }
    }
}

/// The terminal output of the decision pipeline for one Snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    pub confidence: f64,
    pub entry_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub agent: AgentKind,
    pub reasoning: String,
}

impl Decision {
    /// A HOLD Decision emitted by the pre-filter or volatility gate —
    /// confidence 0, no LLM consulted, no prices.
    pub fn hold_filtered(reason: impl Into<String>) -> Self {
        Self {
            action: Action::Hold,
            confidence: 0.0,
            entry_price: None,
            stop_loss: None,
            take_profit: None,
            agent: AgentKind::Filter,
            reasoning: reason.into(),
        }
    }

    pub fn is_actionable(&self) -> bool {
        self.action != Action::Hold
    }
}
