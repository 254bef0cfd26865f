// =============================================================================
// Risk state — the persisted counters the engine validates against
// =============================================================================
//
// One row, one session: `id` is always "default" (spot.md's scope is a
// single account, not multi-tenant). `recent_results` feeds the Kelly
// blend (engine.rs); everything else feeds the ordered validation chain.

use std::collections::VecDeque;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// How many closed trades the empirical win-rate blend looks back over.
pub const KELLY_HISTORY_WINDOW: usize = 50;

/// A trade result must be fed at least this many times before its empirical
/// win-rate is blended into Kelly sizing; below that sample size we trust
/// the agent's raw confidence alone (spec.md §4.6).
pub const KELLY_MIN_SAMPLE: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskState {
    pub id: String,
    pub starting_capital: f64,
    pub daily_start_equity: f64,
    pub peak_equity: f64,
    pub daily_pnl: f64,
    pub max_drawdown_today: f64,
    pub consecutive_losses: u32,
    pub daily_trades_count: u32,
    pub daily_wins: u32,
    pub daily_losses: u32,
    pub reference_date: NaiveDate,
    pub killed: bool,
    #[serde(default)]
    pub recent_results: VecDeque<f64>,
    pub updated_at: i64,
}

impl RiskState {
    pub fn fresh(starting_capital: f64) -> Self {
        let now = Utc::now();
        Self {
            id: "default".to_string(),
            starting_capital,
            daily_start_equity: starting_capital,
            peak_equity: starting_capital,
            daily_pnl: 0.0,
            max_drawdown_today: 0.0,
            consecutive_losses: 0,
            daily_trades_count: 0,
            daily_wins: 0,
            daily_losses: 0,
            reference_date: now.date_naive(),
            killed: false,
            recent_results: VecDeque::with_capacity(KELLY_HISTORY_WINDOW),
            updated_at: now.timestamp(),
        }
    }

    pub fn current_equity(&self) -> f64 {
        self.daily_start_equity + self.daily_pnl
    }

    pub fn daily_loss_pct(&self) -> f64 {
        if self.daily_start_equity <= 0.0 {
            return 0.0;
        }
        (-self.daily_pnl / self.daily_start_equity).max(0.0)
    }

    /// Record a closed trade's realized PnL in currency units. Rolls the
    /// win/loss streak, the drawdown-from-peak tracker, and the bounded
    /// history used for Kelly's empirical win-rate blend.
    pub fn record_trade(&mut self, pnl: f64) {
        self.daily_pnl += pnl;
        self.daily_trades_count += 1;

        if pnl >= 0.0 {
            self.daily_wins += 1;
            self.consecutive_losses = 0;
        } else {
            self.daily_losses += 1;
            self.consecutive_losses += 1;
        }

        let equity = self.current_equity();
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        let drawdown = if self.peak_equity > 0.0 {
            (self.peak_equity - equity) / self.peak_equity
        } else {
            0.0
        };
        if drawdown > self.max_drawdown_today {
            self.max_drawdown_today = drawdown;
        }

        if self.recent_results.len() == KELLY_HISTORY_WINDOW {
            self.recent_results.pop_front();
        }
        self.recent_results.push_back(pnl);

        self.updated_at = Utc::now().timestamp();
    }

    /// Empirical win rate over the trailing window, or `None` below
    /// [`KELLY_MIN_SAMPLE`].
    pub fn empirical_win_rate(&self) -> Option<f64> {
        if self.recent_results.len() < KELLY_MIN_SAMPLE {
            return None;
        }
        let wins = self.recent_results.iter().filter(|p| **p >= 0.0).count();
        Some(wins as f64 / self.recent_results.len() as f64)
    }

    /// Roll daily counters over at UTC midnight; a tripped kill-switch
    /// survives the roll (it requires an explicit clear, not a new day).
    pub fn maybe_roll_day(&mut self) {
        let today = Utc::now().date_naive();
        if self.reference_date == today {
            return;
        }
        self.reference_date = today;
        self.daily_start_equity = self.current_equity();
        self.peak_equity = self.daily_start_equity;
        self.daily_pnl = 0.0;
        self.max_drawdown_today = 0.0;
        self.daily_trades_count = 0;
        self.daily_wins = 0;
        self.daily_losses = 0;
        self.consecutive_losses = 0;
        self.updated_at = Utc::now().timestamp();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_a_loss_increments_the_streak() {
        let mut s = RiskState::fresh(1000.0);
        s.record_trade(-10.0);
        s.record_trade(-5.0);
        assert_eq!(s.consecutive_losses, 2);
        assert_eq!(s.daily_losses, 2);
    }

    #[test]
    fn a_win_resets_the_loss_streak() {
        let mut s = RiskState::fresh(1000.0);
        s.record_trade(-10.0);
        s.record_trade(5.0);
        assert_eq!(s.consecutive_losses, 0);
        assert_eq!(s.daily_wins, 1);
    }

    #[test]
    fn empirical_win_rate_is_none_below_min_sample() {
        let mut s = RiskState::fresh(1000.0);
        for _ in 0..5 {
            s.record_trade(1.0);
        }
        assert!(s.empirical_win_rate().is_none());
    }

    #[test]
    fn empirical_win_rate_after_min_sample() {
        let mut s = RiskState::fresh(1000.0);
        for _ in 0..7 {
            s.record_trade(1.0);
        }
        for _ in 0..3 {
            s.record_trade(-1.0);
        }
        assert_eq!(s.empirical_win_rate(), Some(0.7));
    }

    #[test]
    fn drawdown_tracks_peak_not_starting_capital() {
        let mut s = RiskState::fresh(1000.0);
        s.record_trade(100.0); // equity 1100, new peak
        s.record_trade(-200.0); // equity 900, drawdown from 1100
        let expected = (1100.0 - 900.0) / 1100.0;
        assert!((s.max_drawdown_today - expected).abs() < 1e-9);
    }
}
