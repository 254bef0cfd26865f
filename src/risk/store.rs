// =============================================================================
// Risk state persistence — sqlite, atomic upsert, one-time legacy migration
// =============================================================================
//
// Grounded on the sibling example's `SqliteRiskStateRepository`: a single
// `risk_state` row, connected over a WAL-mode pool, upserted as serialized
// numbers (sqlite has no native decimal type). We store plain `f64` as TEXT
// rather than `rust_decimal` since nothing upstream in this crate uses
// fixed-point money types.

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{info, warn};

use crate::risk::state::RiskState;

pub struct RiskStore {
    pool: SqlitePool,
}

impl RiskStore {
    pub async fn connect(db_url: &str) -> Result<Self> {
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .context("failed to create risk state database directory")?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid risk state database url: {db_url}"))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("failed to connect to risk state database")?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS risk_state (
                id TEXT PRIMARY KEY,
                starting_capital TEXT NOT NULL,
                daily_start_equity TEXT NOT NULL,
                peak_equity TEXT NOT NULL,
                daily_pnl TEXT NOT NULL,
                max_drawdown_today TEXT NOT NULL,
                consecutive_losses INTEGER NOT NULL,
                daily_trades_count INTEGER NOT NULL,
                daily_wins INTEGER NOT NULL,
                daily_losses INTEGER NOT NULL,
                reference_date TEXT NOT NULL,
                killed INTEGER NOT NULL,
                recent_results_json TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create risk_state table")?;
        Ok(())
    }

    /// Atomic upsert of the singleton row, inside an explicit transaction so
    /// a crash mid-write can never leave a half-updated counter set.
    pub async fn save(&self, state: &RiskState) -> Result<()> {
        let recent_results_json =
            serde_json::to_string(&state.recent_results).context("failed to serialize recent_results")?;

        let mut tx = self.pool.begin().await.context("failed to open risk state transaction")?;

        sqlx::query(
            r#"
            INSERT INTO risk_state (
                id, starting_capital, daily_start_equity, peak_equity, daily_pnl,
                max_drawdown_today, consecutive_losses, daily_trades_count, daily_wins,
                daily_losses, reference_date, killed, recent_results_json, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT(id) DO UPDATE SET
                starting_capital = excluded.starting_capital,
                daily_start_equity = excluded.daily_start_equity,
                peak_equity = excluded.peak_equity,
                daily_pnl = excluded.daily_pnl,
                max_drawdown_today = excluded.max_drawdown_today,
                consecutive_losses = excluded.consecutive_losses,
                daily_trades_count = excluded.daily_trades_count,
                daily_wins = excluded.daily_wins,
                daily_losses = excluded.daily_losses,
                reference_date = excluded.reference_date,
                killed = excluded.killed,
                recent_results_json = excluded.recent_results_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&state.id)
        .bind(state.starting_capital.to_string())
        .bind(state.daily_start_equity.to_string())
        .bind(state.peak_equity.to_string())
        .bind(state.daily_pnl.to_string())
        .bind(state.max_drawdown_today.to_string())
        .bind(state.consecutive_losses as i64)
        .bind(state.daily_trades_count as i64)
        .bind(state.daily_wins as i64)
        .bind(state.daily_losses as i64)
        .bind(state.reference_date.to_string())
        .bind(state.killed as i64)
        .bind(recent_results_json)
        .bind(state.updated_at)
        .execute(&mut *tx)
        .await
        .context("failed to upsert risk state")?;

        tx.commit().await.context("failed to commit risk state transaction")?;
        Ok(())
    }

    pub async fn load(&self, id: &str) -> Result<Option<RiskState>> {
        let row = sqlx::query(
            r#"
            SELECT starting_capital, daily_start_equity, peak_equity, daily_pnl,
                   max_drawdown_today, consecutive_losses, daily_trades_count, daily_wins,
                   daily_losses, reference_date, killed, recent_results_json, updated_at
            FROM risk_state WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load risk state")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let reference_date: String = row.try_get("reference_date")?;
        let recent_results_json: String = row.try_get("recent_results_json")?;

        Ok(Some(RiskState {
            id: id.to_string(),
            starting_capital: row.try_get::<String, _>("starting_capital")?.parse().unwrap_or(0.0),
            daily_start_equity: row.try_get::<String, _>("daily_start_equity")?.parse().unwrap_or(0.0),
            peak_equity: row.try_get::<String, _>("peak_equity")?.parse().unwrap_or(0.0),
            daily_pnl: row.try_get::<String, _>("daily_pnl")?.parse().unwrap_or(0.0),
            max_drawdown_today: row.try_get::<String, _>("max_drawdown_today")?.parse().unwrap_or(0.0),
            consecutive_losses: row.try_get::<i64, _>("consecutive_losses")? as u32,
            daily_trades_count: row.try_get::<i64, _>("daily_trades_count")? as u32,
            daily_wins: row.try_get::<i64, _>("daily_wins")? as u32,
            daily_losses: row.try_get::<i64, _>("daily_losses")? as u32,
            reference_date: reference_date.parse::<NaiveDate>().unwrap_or_else(|_| chrono::Utc::now().date_naive()),
            killed: row.try_get::<i64, _>("killed")? != 0,
            recent_results: serde_json::from_str(&recent_results_json).unwrap_or_default(),
            updated_at: row.try_get("updated_at")?,
        }))
    }

    /// One-shot migration from the teacher's flat-file JSON config store: if
    /// the sqlite row doesn't exist yet but a legacy JSON snapshot is present
    /// on disk, adopt it as the initial state instead of starting fresh.
    pub async fn migrate_legacy_json(&self, legacy_path: &Path, starting_capital: f64) -> Result<RiskState> {
        if let Some(existing) = self.load("default").await? {
            return Ok(existing);
        }

        if legacy_path.exists() {
            match std::fs::read_to_string(legacy_path) {
                Ok(content) => match serde_json::from_str::<LegacyRiskSnapshot>(&content) {
                    Ok(legacy) => {
                        info!(path = %legacy_path.display(), "migrating legacy risk state json into sqlite");
                        let mut state = RiskState::fresh(starting_capital);
                        state.daily_pnl = legacy.daily_pnl;
                        state.consecutive_losses = legacy.consecutive_losses;
                        state.daily_trades_count = legacy.daily_trades_count;
                        self.save(&state).await?;
                        if let Err(e) = std::fs::remove_file(legacy_path) {
                            warn!(path = %legacy_path.display(), error = %e, "migrated legacy risk state json but failed to delete it");
                        }
                        return Ok(state);
                    }
                    Err(e) => warn!(error = %e, "legacy risk state json present but unparseable, starting fresh"),
                },
                Err(e) => warn!(error = %e, "failed to read legacy risk state json, starting fresh"),
            }
        }

        let fresh = RiskState::fresh(starting_capital);
        self.save(&fresh).await?;
        Ok(fresh)
    }
}

#[derive(Deserialize)]
struct LegacyRiskSnapshot {
    #[serde(default)]
    daily_pnl: f64,
    #[serde(default)]
    consecutive_losses: u32,
    #[serde(default)]
    daily_trades_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_load_save_is_a_fixed_point() {
        let store = RiskStore::connect("sqlite::memory:").await.unwrap();
        let mut state = RiskState::fresh(1000.0);
        state.record_trade(42.5);
        store.save(&state).await.unwrap();

        let loaded = store.load("default").await.unwrap().expect("row should exist");
        assert_eq!(loaded.daily_pnl, state.daily_pnl);
        assert_eq!(loaded.consecutive_losses, state.consecutive_losses);
        assert_eq!(loaded.recent_results, state.recent_results);

        store.save(&loaded).await.unwrap();
        let reloaded = store.load("default").await.unwrap().unwrap();
        assert_eq!(reloaded.daily_pnl, loaded.daily_pnl);
        assert_eq!(reloaded.updated_at, loaded.updated_at);
    }

    #[tokio::test]
    async fn load_of_missing_row_is_none() {
        let store = RiskStore::connect("sqlite::memory:").await.unwrap();
        assert!(store.load("default").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn legacy_migration_runs_once() {
        let dir = std::env::temp_dir().join(format!("sath-legacy-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let legacy_path = dir.join("risk_state.json");
        std::fs::write(
            &legacy_path,
            r#"{"daily_pnl": -12.5, "consecutive_losses": 2, "daily_trades_count": 6}"#,
        )
        .unwrap();

        let store = RiskStore::connect("sqlite::memory:").await.unwrap();
        let first = store.migrate_legacy_json(&legacy_path, 500.0).await.unwrap();
        assert_eq!(first.daily_pnl, -12.5);
        assert_eq!(first.consecutive_losses, 2);
        assert!(!legacy_path.exists(), "legacy json must be deleted after a successful migration");

        // Running it again must not re-adopt the file (idempotent): it sees
        // the sqlite row already exists and returns that instead.
        let second = store.migrate_legacy_json(&legacy_path, 999.0).await.unwrap();
        assert_eq!(second.daily_pnl, first.daily_pnl);
        assert_eq!(second.starting_capital, first.starting_capital);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn legacy_migration_with_no_file_starts_fresh() {
        let store = RiskStore::connect("sqlite::memory:").await.unwrap();
        let path = std::env::temp_dir().join(format!("sath-no-legacy-{}.json", uuid::Uuid::new_v4()));
        let state = store.migrate_legacy_json(&path, 250.0).await.unwrap();
        assert_eq!(state.starting_capital, 250.0);
        assert_eq!(state.daily_pnl, 0.0);
    }
}
