//! SQLite persistence for finished backtest runs.
//!
//! Records:
//! - Run parameters and headline metrics
//! - Closed trades per run

use crate::backtest::BacktestResult;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// A saved run, as listed by `recent_runs`.
#[derive(Debug, Clone, Serialize)]
pub struct StoredRun {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub start_date: String,
    pub end_date: String,
    pub window_size: usize,
    pub rebalance_frequency: usize,
    pub instruments: Vec<String>,
    pub initial_equity: Decimal,
    pub final_equity: Decimal,
    pub total_return_pct: Decimal,
    pub sharpe_ratio: f64,
    pub max_drawdown: Decimal,
    pub rebalances: usize,
    pub trade_count: usize,
}

/// A closed trade belonging to a saved run.
#[derive(Debug, Clone, Serialize)]
pub struct StoredTrade {
    pub instrument: String,
    pub quantity: u64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub opened_on: NaiveDate,
    pub closed_on: NaiveDate,
    pub profit: f64,
}

/// SQLite-backed store of backtest runs.
pub struct RunStore {
    conn: Connection,
}

impl RunStore {
    /// Open the store, initializing the database if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database at {:?}", db_path))?;

        let store = Self { conn };
        store.init_schema()?;

        debug!("Run store initialized at {:?}", db_path);
        Ok(store)
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at TEXT NOT NULL,
                start_date TEXT NOT NULL,
                end_date TEXT NOT NULL,
                window_size INTEGER NOT NULL,
                rebalance_frequency INTEGER NOT NULL,
                instruments TEXT NOT NULL,
                initial_equity TEXT NOT NULL,
                final_equity TEXT NOT NULL,
                total_return_pct TEXT NOT NULL,
                sharpe_ratio REAL NOT NULL,
                max_drawdown TEXT NOT NULL,
                rebalances INTEGER NOT NULL,
                trade_count INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id INTEGER NOT NULL REFERENCES runs(id),
                instrument TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                entry_price REAL NOT NULL,
                exit_price REAL NOT NULL,
                opened_on TEXT NOT NULL,
                closed_on TEXT NOT NULL,
                profit REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_trades_run ON trades(run_id);
            "#,
        )?;

        Ok(())
    }

    /// Save a finished run and its trades. Returns the run id.
    pub fn save_run(&self, result: &BacktestResult) -> Result<i64> {
        let tx = self.conn.unchecked_transaction()?;
        let m = &result.metrics;

        tx.execute(
            r#"
            INSERT INTO runs (created_at, start_date, end_date, window_size, rebalance_frequency,
                              instruments, initial_equity, final_equity, total_return_pct,
                              sharpe_ratio, max_drawdown, rebalances, trade_count)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                Utc::now().to_rfc3339(),
                result.start_date.to_string(),
                result.end_date.to_string(),
                result.config.strategy.window_size as i64,
                result.config.strategy.rebalance_frequency as i64,
                result.instruments.join(","),
                m.initial_equity.to_string(),
                m.final_equity.to_string(),
                m.total_return_pct.round_dp(4).to_string(),
                m.sharpe_ratio,
                m.max_drawdown.round_dp(6).to_string(),
                m.rebalances as i64,
                result.trades.len() as i64,
            ],
        )?;
        let run_id = tx.last_insert_rowid();

        for trade in &result.trades {
            tx.execute(
                r#"
                INSERT INTO trades (run_id, instrument, quantity, entry_price, exit_price,
                                    opened_on, closed_on, profit)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    run_id,
                    trade.instrument,
                    trade.quantity as i64,
                    trade.entry_price,
                    trade.exit_price,
                    trade.opened_on.to_string(),
                    trade.closed_on.to_string(),
                    trade.profit,
                ],
            )?;
        }

        tx.commit()?;

        info!(run_id, trades = result.trades.len(), "Run saved to database");
        Ok(run_id)
    }

    /// Most recent runs, newest first.
    pub fn recent_runs(&self, limit: usize) -> Result<Vec<StoredRun>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, created_at, start_date, end_date, window_size, rebalance_frequency,
                   instruments, initial_equity, final_equity, total_return_pct,
                   sharpe_ratio, max_drawdown, rebalances, trade_count
            FROM runs
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;

        let runs: Vec<StoredRun> = stmt
            .query_map([limit as i64], |row| {
                let created_at: String = row.get(1)?;
                let instruments: String = row.get(6)?;
                Ok(StoredRun {
                    id: row.get(0)?,
                    created_at: DateTime::parse_from_rfc3339(&created_at)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    start_date: row.get(2)?,
                    end_date: row.get(3)?,
                    window_size: row.get::<_, i64>(4)? as usize,
                    rebalance_frequency: row.get::<_, i64>(5)? as usize,
                    instruments: instruments
                        .split(',')
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect(),
                    initial_equity: Decimal::from_str(&row.get::<_, String>(7)?).unwrap_or_default(),
                    final_equity: Decimal::from_str(&row.get::<_, String>(8)?).unwrap_or_default(),
                    total_return_pct: Decimal::from_str(&row.get::<_, String>(9)?)
                        .unwrap_or_default(),
                    sharpe_ratio: row.get(10)?,
                    max_drawdown: Decimal::from_str(&row.get::<_, String>(11)?).unwrap_or_default(),
                    rebalances: row.get::<_, i64>(12)? as usize,
                    trade_count: row.get::<_, i64>(13)? as usize,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(runs)
    }

    /// Trades recorded for a run, in closing order.
    pub fn trades_for_run(&self, run_id: i64) -> Result<Vec<StoredTrade>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT instrument, quantity, entry_price, exit_price, opened_on, closed_on, profit
            FROM trades
            WHERE run_id = ?1
            ORDER BY id
            "#,
        )?;

        let trades: Vec<StoredTrade> = stmt
            .query_map([run_id], |row| {
                let opened_on: String = row.get(4)?;
                let closed_on: String = row.get(5)?;
                Ok(StoredTrade {
                    instrument: row.get(0)?,
                    quantity: row.get::<_, i64>(1)? as u64,
                    entry_price: row.get(2)?,
                    exit_price: row.get(3)?,
                    opened_on: NaiveDate::from_str(&opened_on).unwrap_or(NaiveDate::MIN),
                    closed_on: NaiveDate::from_str(&closed_on).unwrap_or(NaiveDate::MIN),
                    profit: row.get(6)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(trades)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::{BacktestConfig, BacktestEngine, CsvDataLoader};
    use crate::config::Config;
    use crate::market::{Bar, Quote};
    use chrono::Duration;

    fn result() -> BacktestResult {
        let start = NaiveDate::from_ymd_opt(2016, 1, 4).unwrap();
        let bars = (0..60)
            .map(|t| {
                let phase = (t as f64 / 2.0).sin();
                Bar::new(start + Duration::days(t))
                    .with_quote("AAA", Quote::flat(30.0 + 3.0 * phase))
                    .with_quote("BBB", Quote::flat(30.0 - 3.0 * phase))
            })
            .collect();

        let mut config = Config::default();
        config.strategy.window_size = 2;
        config.strategy.rebalance_frequency = 1;

        BacktestEngine::new(CsvDataLoader::from_bars(bars), config, BacktestConfig::default())
            .run()
            .unwrap()
    }

    #[test]
    fn test_save_and_list_runs() {
        let store = RunStore::new(":memory:").unwrap();
        let result = result();

        let first = store.save_run(&result).unwrap();
        let second = store.save_run(&result).unwrap();
        assert!(second > first);

        let runs = store.recent_runs(10).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, second);
        assert_eq!(runs[0].window_size, 2);
        assert_eq!(runs[0].instruments, vec!["AAA", "BBB"]);
        assert_eq!(runs[0].final_equity, result.metrics.final_equity);
        assert_eq!(runs[0].trade_count, result.trades.len());

        assert_eq!(store.recent_runs(1).unwrap().len(), 1);
    }

    #[test]
    fn test_trades_for_run() {
        let store = RunStore::new(":memory:").unwrap();
        let result = result();
        let run_id = store.save_run(&result).unwrap();

        let trades = store.trades_for_run(run_id).unwrap();
        assert_eq!(trades.len(), result.trades.len());
        for (stored, original) in trades.iter().zip(&result.trades) {
            assert_eq!(stored.instrument, original.instrument);
            assert_eq!(stored.quantity, original.quantity);
            assert_eq!(stored.closed_on, original.closed_on);
        }

        assert!(store.trades_for_run(run_id + 1).unwrap().is_empty());
    }
}
