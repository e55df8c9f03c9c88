//! Configuration management for the anticor allocator.
//!
//! Loads settings from environment variables and config files.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Allocation algorithm parameters
    #[serde(default)]
    pub strategy: StrategyConfig,
    /// Simulated account settings
    #[serde(default)]
    pub broker: BrokerConfig,
    /// Historical data locations and retrieval
    #[serde(default)]
    pub data: DataConfig,
    /// Backtest run storage
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Length of each of the two comparison windows
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Bars between rebalances once warmed up
    #[serde(default = "default_rebalance_frequency")]
    pub rebalance_frequency: usize,
    /// Feed adjusted closes into the price window
    #[serde(default)]
    pub use_adjusted_values: bool,
    /// Ask the broker to fill entries at adjusted prices
    #[serde(default = "default_fill_with_adjusted_values")]
    pub fill_with_adjusted_values: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Starting cash
    #[serde(default = "default_initial_cash")]
    pub initial_cash: Decimal,
    /// Flat commission charged on every fill
    #[serde(default = "default_commission_per_trade")]
    pub commission_per_trade: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Directory of per-instrument CSV files; defines the instrument universe
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Symbol list used when fetching history
    #[serde(default = "default_symbols_file")]
    pub symbols_file: String,
    /// Calendar years to fetch
    #[serde(default = "default_years")]
    pub years: Vec<i32>,
    /// Base URL of the historical price service
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database for finished runs
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

// Default value functions
fn default_window_size() -> usize {
    9
}

fn default_rebalance_frequency() -> usize {
    10
}

fn default_fill_with_adjusted_values() -> bool {
    true
}

fn default_initial_cash() -> Decimal {
    Decimal::new(10000, 0) // $10,000
}

fn default_commission_per_trade() -> Decimal {
    Decimal::new(6, 0) // $6 per fill
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_symbols_file() -> String {
    "atleast20.txt".to_string()
}

fn default_years() -> Vec<i32> {
    vec![2016]
}

fn default_base_url() -> String {
    "https://query1.finance.yahoo.com".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_db_path() -> String {
    "data/runs.db".to_string()
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("anticor").required(false))
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .prefix("ANTICOR")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.strategy.window_size >= 2,
            "window_size must be at least 2"
        );

        anyhow::ensure!(
            self.strategy.rebalance_frequency >= 1,
            "rebalance_frequency must be at least 1"
        );

        anyhow::ensure!(
            self.broker.initial_cash > Decimal::ZERO,
            "initial_cash must be positive"
        );

        anyhow::ensure!(
            self.broker.commission_per_trade >= Decimal::ZERO,
            "commission_per_trade must not be negative"
        );

        anyhow::ensure!(!self.data.data_dir.is_empty(), "data_dir must be set");

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            strategy: StrategyConfig::default(),
            broker: BrokerConfig::default(),
            data: DataConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            rebalance_frequency: default_rebalance_frequency(),
            use_adjusted_values: false,
            fill_with_adjusted_values: default_fill_with_adjusted_values(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            initial_cash: default_initial_cash(),
            commission_per_trade: default_commission_per_trade(),
        }
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            symbols_file: default_symbols_file(),
            years: default_years(),
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}
