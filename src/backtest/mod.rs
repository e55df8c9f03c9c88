//! Backtesting module for evaluating allocation parameters.
//!
//! This module provides:
//! - Historical bar loading from per-instrument CSV files
//! - Bar-by-bar simulation against a simulated broker
//! - Parameter sweep over window sizes and rebalance frequencies
//! - Performance metrics calculation
//!
//! # Example
//!
//! ```rust,ignore
//! use anticor_allocator::backtest::{BacktestConfig, BacktestEngine, CsvDataLoader};
//!
//! let loader = CsvDataLoader::from_dir("data")?;
//! let engine = BacktestEngine::new(loader, Config::default(), BacktestConfig::default());
//!
//! let result = engine.run()?;
//! println!("Return: {:.2}%", result.metrics.total_return_pct);
//! ```

mod data;
mod engine;
mod metrics;
mod runner;

pub use data::{parse_daily_csv, CsvDataLoader, DataLoader};
pub use engine::{BacktestEngine, BacktestResult, PositionSnapshot};
pub use metrics::{
    BacktestMetrics, Distribution, EquityPoint, TradeRecord, TradeStats, TRADING_DAYS_PER_YEAR,
};
pub use runner::{ParameterSpace, SweepResults, SweepRunner};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Configuration for a backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// First bar to trade; earlier bars only seed the weights.
    /// Defaults to the first available bar.
    pub start: Option<NaiveDate>,

    /// Last bar to trade. Defaults to the last available bar.
    pub end: Option<NaiveDate>,

    /// Whether to keep every equity point in the result
    pub record_equity_curve: bool,

    /// Annual risk-free rate for the Sharpe ratio
    pub risk_free_rate: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            start: None,
            end: None,
            record_equity_curve: true,
            risk_free_rate: 0.05,
        }
    }
}
