//! # Anticor Allocator
//!
//! Online portfolio allocation by windowed anti-correlation, with chunked
//! rebalancing, FIFO lot exits and a daily-bar backtester.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `error`: Typed errors of the allocation core
//! - `market`: Quotes and bars shared across modules
//! - `strategy`: Price window, anticor engine, rebalancer and driver
//! - `broker`: Broker seam, order events and the simulated broker
//! - `backtest`: Bar feed, simulation engine, metrics and parameter sweeps
//! - `history`: Historical daily price retrieval
//! - `persistence`: SQLite record of finished backtest runs
//! - `utils`: Shared utilities and decimal arithmetic

pub mod backtest;
pub mod broker;
pub mod config;
pub mod error;
pub mod history;
pub mod market;
pub mod persistence;
pub mod strategy;
pub mod utils;

pub use config::Config;
pub use error::AllocationError;
