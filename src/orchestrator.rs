// =============================================================================
// Orchestrator — cycle timer, bounded fan-out, serialized risk/execution
// =============================================================================
//
// spec.md §4.9 / §5: a single cycle timer drives the whole engine. Per
// symbol, collection through agent dispatch (L1-L5) run in parallel across a
// bounded worker pool sized by `config.worker_pool_size`; the resulting
// Decisions are then drained serially through the risk engine and execution
// gateway (L6/L7) so that portfolio-wide invariants -- exposure, balance
// accounting -- only ever see one mutation at a time. The position
// manager's trailing-stop/exit tick (always-on control loop, §4.8) closes
// out each cycle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::agents;
use crate::app_state::AppState;
use crate::exchange::{OrderSide, OrderType};
use crate::execution::ExecutionOutcome;
use crate::market_data::Snapshot;
use crate::pipeline::{prefilter_evaluate, reject_decision, volatility_gate};
use crate::position_engine::{OcoIds, TrailUpdate};
use crate::reconcile::reconcile_once;
use crate::regime;
use crate::types::{split_symbol, Action, Decision};

/// Outcome of running the hybrid decision pipeline (L1-L5) for one symbol.
/// `snapshot` is `None` when collection itself failed -- there is nothing
/// for Risk/Execution to act on in that case.
struct PipelineResult {
    symbol: String,
    decision: Decision,
    snapshot: Option<Snapshot>,
}

/// Run the engine forever: one cycle every `config.scan_interval_s`, until
/// SIGTERM/Ctrl-C requests a graceful drain (spec.md §5).
pub async fn run(state: Arc<AppState>) -> anyhow::Result<()> {
    if let Err(e) = reconcile_once(&state.exchange, &state.positions, &state.balances, &state.config.symbols).await {
        warn!(error = %e, "startup reconciliation failed, continuing with local state");
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(state.config.scan_interval_s));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut in_flight: Option<tokio::task::JoinHandle<()>> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Some(prev) = in_flight.take() {
                    if !prev.is_finished() {
                        warn!("previous cycle still running when the next tick fired; skipping this tick");
                        in_flight = Some(prev);
                        continue;
                    }
                }
                let st = state.clone();
                in_flight = Some(tokio::spawn(async move {
                    if let Err(e) = run_cycle(st).await {
                        error!(error = %e, "cycle failed");
                    }
                }));
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("shutdown signal received, draining in-flight cycle");
                if let Some(handle) = in_flight.take() {
                    let grace = Duration::from_secs(state.config.shutdown_grace_s);
                    if tokio::time::timeout(grace, handle).await.is_err() {
                        warn!(
                            grace_s = state.config.shutdown_grace_s,
                            "grace deadline elapsed; half-open trades remain on the exchange, to be reconciled at next start"
                        );
                    }
                }
                break;
            }
        }
    }

    info!("aurora-sath shut down cleanly");
    Ok(())
}

/// One full cycle: fan out L1-L5 over the watchlist, drain L6/L7 serially,
/// then run the position manager's tick.
async fn run_cycle(state: Arc<AppState>) -> anyhow::Result<()> {
    info!(symbols = state.config.symbols.len(), "cycle_start");

    let semaphore = Arc::new(Semaphore::new(state.config.worker_pool_size));
    let mut set = JoinSet::new();
    for symbol in state.config.symbols.clone() {
        let st = state.clone();
        let sem = semaphore.clone();
        set.spawn(async move {
            let _permit = sem.acquire_owned().await.expect("worker pool semaphore closed");
            pipeline_for_symbol(&st, &symbol).await
        });
    }

    let mut results = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(e) => error!(error = %e, "pipeline worker panicked"),
        }
    }

    // Serialized Risk + Execution drain: the single point that enforces
    // portfolio-wide invariants (exposure, balance accounting). Order across
    // symbols is whatever the fan-out above settled in -- spec.md §5 only
    // requires collection/decision to be unordered, not this stage.
    for result in &results {
        handle_decision(&state, result).await;
    }

    position_tick(&state).await;

    info!("heartbeat");
    Ok(())
}

/// L1-L5 for a single symbol: collect, pre-filter, cache lookup, classify,
/// dispatch to the regime's agent.
async fn pipeline_for_symbol(state: &AppState, symbol: &str) -> PipelineResult {
    let snapshot = match state.collector.collect(symbol).await {
        Ok(s) => s,
        Err(e) => {
            warn!(symbol, error = %e, "market data collection failed, skipping this cycle");
            return PipelineResult {
                symbol: symbol.to_string(),
                decision: Decision::hold_filtered(format!("{}: {e}", e.identifier())),
                snapshot: None,
            };
        }
    };

    let min_vol = state.config.ai_agents.min_volatility_percent;

    if let Some(decision) = reject_decision(prefilter_evaluate(&snapshot, min_vol)) {
        info!(symbol, reason = %decision.reasoning, "prefilter_reject");
        return PipelineResult { symbol: symbol.to_string(), decision, snapshot: Some(snapshot) };
    }
    if let Some(decision) = reject_decision(volatility_gate(&snapshot, min_vol)) {
        info!(symbol, reason = %decision.reasoning, "prefilter_reject");
        return PipelineResult { symbol: symbol.to_string(), decision, snapshot: Some(snapshot) };
    }

    if let Some(cached) = state.decision_cache.get(&snapshot) {
        info!(symbol, "cache_hit");
        return PipelineResult { symbol: symbol.to_string(), decision: cached, snapshot: Some(snapshot) };
    }

    let regime = regime::classify(&snapshot);
    info!(symbol, %regime, "regime_classified");

    let decision = agents::decide(
        regime,
        &snapshot,
        &state.config.ai_agents,
        &state.config.risk_management.atr_stops,
        &state.agent_deps,
    )
    .await;
    state.decision_cache.put(&snapshot, decision.clone());
    info!(
        symbol,
        action = %decision.action,
        confidence = decision.confidence,
        agent = %decision.agent,
        "decision"
    );

    PipelineResult { symbol: symbol.to_string(), decision, snapshot: Some(snapshot) }
}

/// L6/L7: size, re-verify, and route one Decision, using the cached exchange
/// balance of whichever asset this side of the trade actually spends --
/// quote for BUY, base for SELL (spec.md §4.6's fix for the historic
/// insufficient-balance bug class).
async fn handle_decision(state: &AppState, result: &PipelineResult) {
    let Some(snapshot) = &result.snapshot else {
        return;
    };
    if !result.decision.is_actionable() {
        return;
    }
    if state.risk.is_killed() {
        info!(symbol = %result.symbol, "risk_reject(kill_switch)");
        return;
    }

    let (base, quote) = split_symbol(&result.symbol);
    let balance_asset = match result.decision.action {
        Action::Buy => quote,
        Action::Sell | Action::Hold => base,
    };
    let account_balance = state.quote_balance(balance_asset);

    let outcome = state.execution.execute(&result.decision, snapshot, account_balance).await;
    match outcome {
        ExecutionOutcome::Placed { position_id, order_id } => {
            info!(symbol = %result.symbol, %position_id, order_id, "order_placed");
            info!(symbol = %result.symbol, %position_id, "position_opened");
        }
        ExecutionOutcome::Simulated { position_id } => {
            info!(symbol = %result.symbol, %position_id, "order_placed (paper)");
            info!(symbol = %result.symbol, %position_id, "position_opened");
        }
        ExecutionOutcome::RiskRejected { reason } => {
            info!(symbol = %result.symbol, reason, "risk_reject");
        }
        ExecutionOutcome::Aborted { reason } => {
            warn!(symbol = %result.symbol, reason, "order_aborted_slippage");
        }
    }
}

/// The always-on control loop (§4.8): refresh prices, move trailing stops
/// forward, close anything that hit its SL/TP, and feed realized PnL back
/// into the risk engine's kill-switch accounting.
async fn position_tick(state: &AppState) {
    let open = state.positions.get_open_positions();
    for pos in &open {
        match state.exchange.get_price(&pos.symbol).await {
            Ok(price) => state.positions.update_price(&pos.symbol, price),
            Err(e) => warn!(symbol = %pos.symbol, error = %e, "failed to refresh price for position tick"),
        }
    }

    for update in state.positions.evaluate_trailing_stops() {
        cancel_and_replace_stop(state, &update).await;
        info!(position_id = %update.position_id, new_stop_loss = update.new_stop_loss, "trailing_updated");
    }

    for (position_id, reason) in state.positions.check_exits() {
        let Some(pos) = state.positions.get_open_positions().into_iter().find(|p| p.id == position_id) else {
            continue;
        };
        let close_price = pos.current_price;
        if let Some(pnl) = state.positions.close_position(&position_id, &reason, close_price) {
            info!(%position_id, reason, pnl, "position_closed");
            if let Err(e) = state.risk.record_trade_result(pnl).await {
                error!(error = %e, "failed to persist risk state after trade close");
                if let Err(e) = state.risk.kill("state.persist_error after trade close").await {
                    error!(error = %e, "failed to persist kill-switch activation");
                }
            }
        }
    }
}

/// Cancel the stale exchange-side stop-loss order and place the trailed
/// replacement, recording its new order ID on the Position. A no-op in
/// paper mode, where there is no resting exchange order to begin with.
async fn cancel_and_replace_stop(state: &AppState, update: &TrailUpdate) {
    if !state.config.mode.is_live() {
        return;
    }
    let Some(pos) = state.positions.get_open_positions().into_iter().find(|p| p.id == update.position_id) else {
        return;
    };

    if let Some(old_sl) = pos.oco_ids.stop_loss_order_id {
        if let Err(e) = state.exchange.cancel_order(&pos.symbol, old_sl).await {
            warn!(symbol = %pos.symbol, order_id = old_sl, error = %e, "failed to cancel stale stop-loss order");
        }
    }

    let exit_side = match pos.side {
        Action::Buy => OrderSide::Sell,
        _ => OrderSide::Buy,
    };
    let replacement = state
        .exchange
        .place_order(
            &pos.symbol,
            exit_side,
            OrderType::StopLossLimit,
            pos.quantity,
            Some(update.new_stop_loss),
            Some(update.new_stop_loss),
        )
        .await;

    match replacement {
        Ok(order) => state.positions.set_oco_ids(
            &update.position_id,
            OcoIds { stop_loss_order_id: Some(order.order_id), take_profit_order_id: pos.oco_ids.take_profit_order_id },
        ),
        Err(e) => warn!(symbol = %pos.symbol, error = %e, "failed to place replacement stop-loss order"),
    }
}

