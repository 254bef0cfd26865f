// =============================================================================
// Configuration — typed view over the YAML config file
// =============================================================================
//
// Every tunable in the spec's key table lives here with a serde default, so
// that a partial or missing config file still produces a fully usable
// `Config`. Defaults differ between paper and live mode (tighter risk
// thresholds in live); `Config::load` applies the mode-appropriate defaults
// before overlaying whatever the file specifies, and `validate` enforces the
// invariants that must hold before the orchestrator starts.

use std::path::Path;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Paper,
    Live,
    Backtest,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Paper
    }
}

impl Mode {
    pub fn is_live(self) -> bool {
        matches!(self, Mode::Live)
    }
}

fn default_symbols() -> Vec<String> {
    vec!["BTCUSDT".to_string(), "ETHUSDT".to_string(), "SOLUSDT".to_string()]
}

fn default_scan_interval_s() -> u64 {
    120
}

fn default_ai_provider() -> String {
    "openai-compatible".to_string()
}

fn default_ai_model_fast() -> String {
    "fast-classifier".to_string()
}

fn default_ai_model_deep() -> String {
    "deep-reasoner".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiAgentsConfig {
    #[serde(default = "default_min_volatility_percent")]
    pub min_volatility_percent: f64,
    #[serde(default = "default_min_volume_ratio")]
    pub min_volume_ratio: f64,
    #[serde(default = "default_min_adx_trend")]
    pub min_adx_trend: f64,
}

fn default_min_volatility_percent() -> f64 {
    0.5
}
fn default_min_volume_ratio() -> f64 {
    0.3
}
fn default_min_adx_trend() -> f64 {
    20.0
}

impl Default for AiAgentsConfig {
    fn default() -> Self {
        Self {
            min_volatility_percent: default_min_volatility_percent(),
            min_volume_ratio: default_min_volume_ratio(),
            min_adx_trend: default_min_adx_trend(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KellyCriterionConfig {
    #[serde(default = "default_kelly_fraction")]
    pub fraction: f64,
    #[serde(default = "default_kelly_min_confidence")]
    pub min_confidence: f64,
}

fn default_kelly_fraction() -> f64 {
    0.25
}
fn default_kelly_min_confidence() -> f64 {
    0.55
}

impl Default for KellyCriterionConfig {
    fn default() -> Self {
        Self {
            fraction: default_kelly_fraction(),
            min_confidence: default_kelly_min_confidence(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtrStopsConfig {
    #[serde(default = "default_sl_multiplier")]
    pub sl_multiplier: f64,
    #[serde(default = "default_tp_multiplier")]
    pub tp_multiplier: f64,
    #[serde(default = "default_min_distance_percent")]
    pub min_distance_percent: f64,
}

fn default_sl_multiplier() -> f64 {
    1.5
}
fn default_tp_multiplier() -> f64 {
    2.7
}
fn default_min_distance_percent() -> f64 {
    0.4
}

impl Default for AtrStopsConfig {
    fn default() -> Self {
        Self {
            sl_multiplier: default_sl_multiplier(),
            tp_multiplier: default_tp_multiplier(),
            min_distance_percent: default_min_distance_percent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionFilterConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub avoid_hours_utc: Vec<u8>,
}

impl Default for SessionFilterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            avoid_hours_utc: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskManagementConfig {
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default_min_rr")]
    pub min_risk_reward_ratio: f64,
    #[serde(default = "default_max_risk_cap")]
    pub max_risk_cap: f64,
    #[serde(default = "default_max_daily_drawdown_pct")]
    pub max_daily_drawdown_pct: f64,
    #[serde(default = "default_max_consecutive_losses")]
    pub max_consecutive_losses: u32,
    #[serde(default = "default_min_profit_to_fees")]
    pub min_profit_to_fees: f64,
    #[serde(default = "default_fee_rate")]
    pub fee_rate: f64,
    #[serde(default)]
    pub kelly_criterion: KellyCriterionConfig,
    #[serde(default)]
    pub atr_stops: AtrStopsConfig,
    #[serde(default)]
    pub session_filter: SessionFilterConfig,
}

fn default_min_confidence() -> f64 {
    0.55
}
fn default_min_rr() -> f64 {
    1.8
}
fn default_max_risk_cap() -> f64 {
    0.03
}
fn default_max_daily_drawdown_pct() -> f64 {
    0.10
}
fn default_max_consecutive_losses() -> u32 {
    5
}
fn default_min_profit_to_fees() -> f64 {
    8.0
}
fn default_fee_rate() -> f64 {
    0.001
}

impl Default for RiskManagementConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            min_risk_reward_ratio: default_min_rr(),
            max_risk_cap: default_max_risk_cap(),
            max_daily_drawdown_pct: default_max_daily_drawdown_pct(),
            max_consecutive_losses: default_max_consecutive_losses(),
            min_profit_to_fees: default_min_profit_to_fees(),
            fee_rate: default_fee_rate(),
            kelly_criterion: KellyCriterionConfig::default(),
            atr_stops: AtrStopsConfig::default(),
            session_filter: SessionFilterConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailingStopConfig {
    #[serde(default = "default_activation_profit_percent")]
    pub activation_profit_percent: f64,
    #[serde(default = "default_trail_distance_percent")]
    pub trail_distance_percent: f64,
    #[serde(default = "default_min_profit_to_lock")]
    pub min_profit_to_lock: f64,
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
}

fn default_activation_profit_percent() -> f64 {
    2.0
}
fn default_trail_distance_percent() -> f64 {
    1.0
}
fn default_min_profit_to_lock() -> f64 {
    0.05
}
fn default_cooldown_seconds() -> u64 {
    15
}

impl Default for TrailingStopConfig {
    fn default() -> Self {
        Self {
            activation_profit_percent: default_activation_profit_percent(),
            trail_distance_percent: default_trail_distance_percent(),
            min_profit_to_lock: default_min_profit_to_lock(),
            cooldown_seconds: default_cooldown_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PositionManagementConfig {
    #[serde(default)]
    pub trailing_stop: TrailingStopConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderExecutionConfig {
    #[serde(default = "default_true")]
    pub use_limit_orders: bool,
    #[serde(default = "default_max_slippage_pct")]
    pub max_slippage_pct: f64,
    #[serde(default = "default_max_price_deviation_pct")]
    pub max_price_deviation_pct: f64,
    #[serde(default = "default_order_timeout_s")]
    pub order_timeout_s: u64,
}

fn default_max_slippage_pct() -> f64 {
    0.001
}
fn default_max_price_deviation_pct() -> f64 {
    0.002
}
fn default_order_timeout_s() -> u64 {
    30
}

impl Default for OrderExecutionConfig {
    fn default() -> Self {
        Self {
            use_limit_orders: true,
            max_slippage_pct: default_max_slippage_pct(),
            max_price_deviation_pct: default_max_price_deviation_pct(),
            order_timeout_s: default_order_timeout_s(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mode: Mode,
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
    #[serde(default = "default_scan_interval_s")]
    pub scan_interval_s: u64,
    #[serde(default = "default_ai_provider")]
    pub ai_provider: String,
    #[serde(default = "default_ai_model_fast")]
    pub ai_model_fast: String,
    #[serde(default = "default_ai_model_deep")]
    pub ai_model_deep: String,
    #[serde(default = "default_true")]
    pub ai_use_hybrid_analysis: bool,
    #[serde(default)]
    pub ai_agents: AiAgentsConfig,
    #[serde(default)]
    pub risk_management: RiskManagementConfig,
    #[serde(default)]
    pub position_management: PositionManagementConfig,
    #[serde(default)]
    pub order_execution: OrderExecutionConfig,
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    #[serde(default = "default_shutdown_grace_s")]
    pub shutdown_grace_s: u64,
    #[serde(default = "default_starting_capital")]
    pub starting_capital: f64,
}

fn default_worker_pool_size() -> usize {
    4
}
fn default_shutdown_grace_s() -> u64 {
    10
}
fn default_starting_capital() -> f64 {
    1000.0
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            symbols: default_symbols(),
            scan_interval_s: default_scan_interval_s(),
            ai_provider: default_ai_provider(),
            ai_model_fast: default_ai_model_fast(),
            ai_model_deep: default_ai_model_deep(),
            ai_use_hybrid_analysis: true,
            ai_agents: AiAgentsConfig::default(),
            risk_management: RiskManagementConfig::default(),
            position_management: PositionManagementConfig::default(),
            order_execution: OrderExecutionConfig::default(),
            worker_pool_size: default_worker_pool_size(),
            shutdown_grace_s: default_shutdown_grace_s(),
            starting_capital: default_starting_capital(),
        }
    }
}

impl Config {
    /// Load from an optional YAML file, applying mode-appropriate defaults
    /// first. A missing path yields a fully-defaulted paper-mode config.
    pub fn load(path: Option<impl AsRef<Path>>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let p = p.as_ref();
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("failed to read config from {}", p.display()))?;
                let config: Config = serde_yaml::from_str(&content)
                    .with_context(|| format!("failed to parse config from {}", p.display()))?;
                config
            }
            None => Config::default(),
        };

        config.apply_mode_defaults_if_unset();
        config.validate()?;

        info!(
            mode = ?config.mode,
            symbols = ?config.symbols,
            scan_interval_s = config.scan_interval_s,
            "configuration loaded"
        );

        Ok(config)
    }

    /// Live mode tightens a handful of thresholds relative to paper mode,
    /// per spec.md's per-mode default callouts. Applied only when the
    /// caller hasn't already overridden them in the file (we treat the
    /// paper-mode constant as "unset").
    fn apply_mode_defaults_if_unset(&mut self) {
        if !self.mode.is_live() {
            return;
        }
        if (self.risk_management.min_confidence - default_min_confidence()).abs() < f64::EPSILON {
            self.risk_management.min_confidence = 0.70;
        }
        if (self.ai_agents.min_adx_trend - default_min_adx_trend()).abs() < f64::EPSILON {
            self.ai_agents.min_adx_trend = 25.0;
        }
        if self.scan_interval_s == default_scan_interval_s() {
            self.scan_interval_s = 180;
        }
    }

    /// Validate invariants that must hold before the orchestrator starts.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.symbols.is_empty(), "config: symbols[] must not be empty");
        ensure!(self.scan_interval_s >= 60, "config: scan_interval_s must be >= 60s (non-goal: no HFT)");
        ensure!(
            self.risk_management.kelly_criterion.fraction > 0.0
                && self.risk_management.kelly_criterion.fraction <= 1.0,
            "config: kelly fraction must be in (0, 1]"
        );
        ensure!(
            self.position_management.trailing_stop.trail_distance_percent
                < self.position_management.trailing_stop.activation_profit_percent,
            "config: trail_distance_percent must be strictly less than activation_profit_percent \
             (profit-lock invariant)"
        );
        ensure!(
            self.risk_management.min_risk_reward_ratio >= 1.0,
            "config: min_risk_reward_ratio must be >= 1.0"
        );
        ensure!(self.worker_pool_size > 0, "config: worker_pool_size must be > 0");
        Ok(())
    }
}
