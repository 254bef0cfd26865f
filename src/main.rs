// =============================================================================
// sath — autonomous spot-market trading engine, entry point
// =============================================================================
//
// Wires the collaborators spec.md treats as external (exchange SDK, YAML
// config, LLM provider) to the core subsystems, then hands control to the
// orchestrator. The engine starts in paper mode regardless of what the
// config file says for `mode` unless `SATH_MODE=live` is set explicitly --
// switching to live trading is a deliberate operator action, never a config
// file default.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use sath::agents::AgentDeps;
use sath::app_state::AppState;
use sath::config::{Config, Mode};
use sath::exchange::{BinanceClient, ExchangeClient};
use sath::execution::ExecutionEngine;
use sath::llm::{CircuitBreaker, HttpLlmProvider, LlmProvider, TokenBucket};
use sath::market_data::{CandleBuffer, Collector, OrderBookManager};
use sath::orchestrator;
use sath::pipeline::DecisionCache;
use sath::position_engine::PositionManager;
use sath::risk::{RiskEngine, RiskStore};
use sath::types::BalanceInfo;

/// The OHLCV bar interval the whole pipeline (indicators, regime, agents)
/// reasons over. Not config-driven in this engine: changing timeframes
/// changes how every threshold in the config should be read, so it is a
/// build-time choice rather than an operator knob.
const BAR_INTERVAL: &str = "5m";

const LLM_CALLS_PER_MINUTE: u32 = 20;
const LLM_CIRCUIT_BREAKER_THRESHOLD: u32 = 5;
const LLM_CIRCUIT_BREAKER_COOLDOWN: Duration = Duration::from_secs(120);
const RECONCILE_INTERVAL_S: u64 = 60;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("sath starting up");

    let config_path = std::env::var("SATH_CONFIG").ok();
    let mut config = Config::load(config_path.as_deref())?;

    if std::env::var("SATH_MODE").as_deref() != Ok("live") {
        config.mode = Mode::Paper;
    }

    info!(
        mode = ?config.mode,
        symbols = ?config.symbols,
        scan_interval_s = config.scan_interval_s,
        worker_pool_size = config.worker_pool_size,
        "configuration loaded"
    );

    // ── Exchange client ──────────────────────────────────────────────────
    let api_key = std::env::var("BINANCE_API_KEY").unwrap_or_default();
    let api_secret = std::env::var("BINANCE_API_SECRET").unwrap_or_default();
    let exchange: Arc<dyn ExchangeClient> = Arc::new(BinanceClient::new(api_key, api_secret));

    // ── Market data: buffers fed by always-on websocket streams ──────────
    let candles = Arc::new(CandleBuffer::new(500));
    let order_books = Arc::new(OrderBookManager::new());

    for symbol in &config.symbols {
        spawn_kline_stream(symbol.clone(), candles.clone());
        spawn_depth_stream(symbol.clone(), order_books.clone());
    }
    info!(count = config.symbols.len(), "market data streams launched");

    let collector = Collector::new(candles.clone(), order_books.clone(), BAR_INTERVAL);

    // ── LLM provider + shared budget guards ──────────────────────────────
    let llm_base_url = std::env::var("SATH_LLM_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
    let llm_api_key = std::env::var("SATH_LLM_API_KEY").unwrap_or_default();
    let llm: Arc<dyn LlmProvider> = Arc::new(HttpLlmProvider::new(
        llm_base_url,
        llm_api_key,
        config.ai_model_fast.as_str(),
        config.ai_model_deep.as_str(),
    ));
    let agent_deps = AgentDeps {
        llm,
        deep_breaker: Arc::new(CircuitBreaker::new(LLM_CIRCUIT_BREAKER_THRESHOLD, LLM_CIRCUIT_BREAKER_COOLDOWN)),
        token_bucket: Arc::new(TokenBucket::new(LLM_CALLS_PER_MINUTE)),
    };

    // ── Risk engine: sqlite-backed, migrates any legacy JSON snapshot once ─
    let risk_store = Arc::new(RiskStore::connect("sqlite://data/risk_state.db").await?);
    let risk = Arc::new(
        RiskEngine::new(
            risk_store,
            config.risk_management.clone(),
            config.starting_capital,
            Path::new("runtime_config.json"),
        )
        .await?,
    );

    // ── Position manager + execution gateway ─────────────────────────────
    let positions = Arc::new(PositionManager::new(config.position_management.trailing_stop.clone()));
    let execution = ExecutionEngine::new(exchange.clone(), risk.clone(), positions.clone(), config.order_execution.clone(), config.mode);

    let decision_cache = DecisionCache::new(sath::pipeline::DEFAULT_TTL);

    let state = Arc::new(AppState {
        config,
        exchange: exchange.clone(),
        candles,
        order_books,
        collector,
        decision_cache,
        agent_deps,
        risk: risk.clone(),
        positions: positions.clone(),
        execution,
        balances: RwLock::new(Vec::<BalanceInfo>::new()),
        last_reconcile_error: RwLock::new(None),
    });

    spawn_reconciliation_loop(state.clone());

    info!("all subsystems running, entering orchestrator loop");
    orchestrator::run(state).await
}

/// Reconnect-loop wrapper around the kline websocket stream, matching the
/// teacher's always-retry-with-backoff idiom for market data feeds.
fn spawn_kline_stream(symbol: String, candles: Arc<CandleBuffer>) {
    tokio::spawn(async move {
        loop {
            if let Err(e) = sath::market_data::candle_buffer::run_kline_stream(&symbol, BAR_INTERVAL, &candles).await {
                error!(symbol = %symbol, error = %e, "kline stream error, reconnecting in 5s");
            }
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    });
}

fn spawn_depth_stream(symbol: String, order_books: Arc<OrderBookManager>) {
    tokio::spawn(async move {
        loop {
            if let Err(e) = sath::market_data::orderbook::run_depth_stream(&symbol, &order_books).await {
                error!(symbol = %symbol, error = %e, "depth stream error, reconnecting in 5s");
            }
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    });
}

/// Periodic reconciliation pass (spec.md §4.8): repairs local position state
/// against the exchange and refreshes the cached per-asset balances that
/// sizing reads from. Live mode only -- paper mode has no exchange-side
/// brackets to drift from.
fn spawn_reconciliation_loop(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(RECONCILE_INTERVAL_S));
        loop {
            interval.tick().await;
            if !state.config.mode.is_live() {
                continue;
            }

            match sath::reconcile::reconcile_once(&state.exchange, &state.positions, &state.balances, &state.config.symbols).await {
                Ok(result) => {
                    *state.last_reconcile_error.write() = None;
                    if result.orders_adopted > 0 || result.positions_closed_as_orphaned > 0 {
                        info!(?result, "reconciliation repaired drift");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "reconciliation pass failed");
                    *state.last_reconcile_error.write() = Some(e.to_string());
                }
            }
        }
    });
}

