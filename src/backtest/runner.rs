//! Parameter sweep runner for backtesting optimization.
//!
//! Runs every window size and rebalance frequency combination in parallel.

use crate::backtest::{BacktestConfig, BacktestEngine, BacktestResult, DataLoader};
use crate::config::Config;
use anyhow::Result;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Defines the parameter space to explore during optimization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpace {
    pub window_sizes: Vec<usize>,
    pub rebalance_frequencies: Vec<usize>,
}

impl Default for ParameterSpace {
    fn default() -> Self {
        Self {
            window_sizes: vec![5, 9, 15, 20],
            rebalance_frequencies: vec![1, 5, 10, 20],
        }
    }
}

impl ParameterSpace {
    /// Create a minimal parameter space for quick testing.
    pub fn minimal() -> Self {
        Self {
            window_sizes: vec![9],
            rebalance_frequencies: vec![10],
        }
    }

    /// Count total number of combinations.
    pub fn combination_count(&self) -> usize {
        self.window_sizes.len() * self.rebalance_frequencies.len()
    }

    /// Generate all config combinations.
    pub fn generate_configs(&self, base_config: &Config) -> Vec<Config> {
        let mut configs = Vec::with_capacity(self.combination_count());

        for &window_size in &self.window_sizes {
            for &rebalance_frequency in &self.rebalance_frequencies {
                let mut config = base_config.clone();
                config.strategy.window_size = window_size;
                config.strategy.rebalance_frequency = rebalance_frequency;
                configs.push(config);
            }
        }

        configs
    }

    /// Describe a config's parameter values.
    pub fn describe_config(config: &Config) -> String {
        format!(
            "window={} freq={}",
            config.strategy.window_size, config.strategy.rebalance_frequency
        )
    }
}

/// Results from a parameter sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepResults {
    /// All individual run results
    pub runs: Vec<(Config, BacktestResult)>,

    /// Best config by Sharpe ratio
    pub best_by_sharpe: Option<usize>,

    /// Best config by total return
    pub best_by_return: Option<usize>,

    /// Total combinations tested
    pub total_combinations: usize,

    /// Successful runs
    pub successful_runs: usize,

    /// Failed runs
    pub failed_runs: usize,
}

impl SweepResults {
    /// Get the best result by Sharpe ratio.
    pub fn best_sharpe(&self) -> Option<&(Config, BacktestResult)> {
        self.best_by_sharpe.map(|i| &self.runs[i])
    }

    /// Get the best result by total return.
    pub fn best_return(&self) -> Option<&(Config, BacktestResult)> {
        self.best_by_return.map(|i| &self.runs[i])
    }

    /// Export results to CSV.
    pub fn to_csv(&self, path: &str) -> Result<()> {
        use std::io::Write;
        let mut file = std::fs::File::create(path)?;

        writeln!(
            file,
            "window_size,rebalance_frequency,final_equity,total_return_pct,sharpe_ratio,max_dd_pct,longest_dd_days,rebalances,trades,commission"
        )?;

        for (config, result) in &self.runs {
            let m = &result.metrics;
            writeln!(
                file,
                "{},{},{},{},{:.4},{},{},{},{},{}",
                config.strategy.window_size,
                config.strategy.rebalance_frequency,
                m.final_equity,
                m.total_return_pct.round_dp(4),
                m.sharpe_ratio,
                (m.max_drawdown * dec!(100)).round_dp(4),
                m.longest_drawdown_days,
                m.rebalances,
                m.trades.count,
                m.total_commission,
            )?;
        }

        Ok(())
    }

    /// Generate a summary comparison table.
    pub fn summary(&self) -> String {
        let mut s = String::new();

        s.push_str("═══════════════════════════════════════════════════════════════\n");
        s.push_str("PARAMETER SWEEP RESULTS\n");
        s.push_str("═══════════════════════════════════════════════════════════════\n");
        s.push_str(&format!(
            "Total: {} | Successful: {} | Failed: {}\n\n",
            self.total_combinations, self.successful_runs, self.failed_runs
        ));

        if let Some((config, result)) = self.best_sharpe() {
            s.push_str("BEST BY SHARPE RATIO:\n");
            s.push_str(&format!("  Config: {}\n", ParameterSpace::describe_config(config)));
            s.push_str(&format!(
                "  Sharpe: {:.3} | Return: {:.2}% | MaxDD: {:.2}%\n\n",
                result.metrics.sharpe_ratio,
                result.metrics.total_return_pct,
                result.metrics.max_drawdown * dec!(100)
            ));
        }

        if let Some((config, result)) = self.best_return() {
            s.push_str("BEST BY RETURN:\n");
            s.push_str(&format!("  Config: {}\n", ParameterSpace::describe_config(config)));
            s.push_str(&format!(
                "  Return: {:.2}% | Sharpe: {:.3} | MaxDD: {:.2}%\n",
                result.metrics.total_return_pct,
                result.metrics.sharpe_ratio,
                result.metrics.max_drawdown * dec!(100)
            ));
        }

        s.push_str("═══════════════════════════════════════════════════════════════\n");

        s
    }
}

/// Parameter sweep runner for parallel backtesting.
pub struct SweepRunner {
    parameter_space: ParameterSpace,
    base_config: Config,
    backtest_config: BacktestConfig,
    parallelism: usize,
}

impl SweepRunner {
    /// Create a new sweep runner.
    pub fn new(
        parameter_space: ParameterSpace,
        base_config: Config,
        backtest_config: BacktestConfig,
        parallelism: usize,
    ) -> Self {
        Self {
            parameter_space,
            base_config,
            backtest_config,
            parallelism: parallelism.max(1),
        }
    }

    /// Run the parameter sweep.
    ///
    /// Each backtest is CPU-bound and runs on the blocking pool; the
    /// semaphore bounds how many run at once.
    pub async fn run<D: DataLoader + Clone + 'static>(&self, data_loader: D) -> Result<SweepResults> {
        let configs = self.parameter_space.generate_configs(&self.base_config);
        let total_combinations = configs.len();

        info!(
            "Starting parameter sweep with {} combinations, parallelism={}",
            total_combinations, self.parallelism
        );

        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let data_loader = Arc::new(data_loader);

        let mut handles = Vec::with_capacity(configs.len());

        for (i, config) in configs.into_iter().enumerate() {
            let sem = semaphore.clone();
            let loader = data_loader.clone();
            let bt_config = self.backtest_config.clone();

            let handle = tokio::spawn(async move {
                let Ok(_permit) = sem.acquire_owned().await else {
                    return None;
                };

                info!(
                    "[{}/{}] Testing: {}",
                    i + 1,
                    total_combinations,
                    ParameterSpace::describe_config(&config)
                );

                let run_config = config.clone();
                let outcome = tokio::task::spawn_blocking(move || {
                    BacktestEngine::new((*loader).clone(), run_config, bt_config).run()
                })
                .await;

                match outcome {
                    Ok(Ok(result)) => {
                        info!(
                            "[{}/{}] Complete: Sharpe={:.3} Return={:.2}%",
                            i + 1,
                            total_combinations,
                            result.metrics.sharpe_ratio,
                            result.metrics.total_return_pct
                        );
                        Some((config, result))
                    }
                    Ok(Err(e)) => {
                        warn!("[{}/{}] Failed: {:#}", i + 1, total_combinations, e);
                        None
                    }
                    Err(e) => {
                        warn!("[{}/{}] Task panicked: {}", i + 1, total_combinations, e);
                        None
                    }
                }
            });

            handles.push(handle);
        }

        // Collect results in submission order
        let mut runs = Vec::new();
        let mut failed_runs = 0;

        for handle in handles {
            match handle.await {
                Ok(Some((config, result))) => runs.push((config, result)),
                Ok(None) => failed_runs += 1,
                Err(e) => {
                    warn!("Task panicked: {}", e);
                    failed_runs += 1;
                }
            }
        }

        let best_by_sharpe = runs
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                a.1.metrics
                    .sharpe_ratio
                    .partial_cmp(&b.1.metrics.sharpe_ratio)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(i, _)| i);

        let best_by_return = runs
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.1.metrics.total_return_pct.cmp(&b.1.metrics.total_return_pct))
            .map(|(i, _)| i);

        Ok(SweepResults {
            runs,
            best_by_sharpe,
            best_by_return,
            total_combinations,
            successful_runs: total_combinations - failed_runs,
            failed_runs,
        })
    }
}
