//! Backtesting simulation engine.
//!
//! Replays historical bars through the strategy driver and a simulated broker.

use crate::backtest::metrics::{BacktestMetrics, EquityPoint, TradeRecord};
use crate::backtest::{BacktestConfig, DataLoader};
use crate::broker::{Broker, SimulatedBroker};
use crate::config::Config;
use crate::strategy::{StrategyDriver, TickOutcome};
use crate::utils::dec_to_f64;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Holdings of one instrument at the end of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub instrument: String,
    pub weight: f64,
    /// Shares held by the broker
    pub shares: u64,
    /// Shares tracked in the lot ledger, including lots still exiting
    pub ledger_quantity: u64,
    pub open_lots: usize,
}

/// Complete result of a backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub config: Config,
    pub backtest_config: BacktestConfig,
    pub instruments: Vec<String>,
    pub metrics: BacktestMetrics,
    pub equity_curve: Vec<EquityPoint>,
    pub trades: Vec<TradeRecord>,
    pub positions: Vec<PositionSnapshot>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub bars_processed: usize,
    pub priming_steps: usize,
}

impl BacktestResult {
    /// Export equity curve to CSV.
    pub fn equity_to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        use std::io::Write;
        let path = path.as_ref();
        let mut file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        writeln!(file, "date,cash,holdings_value,total_equity,drawdown,open_lots")?;

        for point in &self.equity_curve {
            writeln!(
                file,
                "{},{},{},{},{},{}",
                point.date,
                point.cash,
                point.holdings_value,
                point.total_equity,
                point.drawdown,
                point.open_lots,
            )?;
        }

        Ok(())
    }

    /// Export closed trades to CSV.
    pub fn trades_to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        use std::io::Write;
        let path = path.as_ref();
        let mut file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        writeln!(
            file,
            "instrument,quantity,entry_price,exit_price,opened_on,closed_on,profit,return_pct"
        )?;

        for trade in &self.trades {
            writeln!(
                file,
                "{},{},{},{},{},{},{:.2},{:.4}",
                trade.instrument,
                trade.quantity,
                trade.entry_price,
                trade.exit_price,
                trade.opened_on,
                trade.closed_on,
                trade.profit,
                trade.return_pct,
            )?;
        }

        Ok(())
    }

    /// Serialize the whole result as pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize backtest result")
    }

    /// Write the result JSON to a file.
    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_json()?)
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Get a summary string.
    pub fn summary(&self) -> String {
        let allocation: Vec<String> = self
            .positions
            .iter()
            .filter(|p| p.shares > 0 || p.weight > 0.01)
            .map(|p| format!("  {:<8} weight {:>6.2}%  shares {}", p.instrument, p.weight * 100.0, p.shares))
            .collect();

        format!(
            "{}\n\nBacktest Period: {} to {}\nInstruments: {}\nBars: {} (priming steps: {})\nWindow: {} | Rebalance every {} bars\n\nFinal allocation:\n{}",
            self.metrics.summary(),
            self.start_date,
            self.end_date,
            self.instruments.len(),
            self.bars_processed,
            self.priming_steps,
            self.config.strategy.window_size,
            self.config.strategy.rebalance_frequency,
            allocation.join("\n"),
        )
    }
}

/// The backtesting simulation engine.
pub struct BacktestEngine<D: DataLoader> {
    data_loader: D,
    config: Config,
    backtest_config: BacktestConfig,
}

impl<D: DataLoader> BacktestEngine<D> {
    /// Create a new backtest engine.
    pub fn new(data_loader: D, config: Config, backtest_config: BacktestConfig) -> Self {
        Self {
            data_loader,
            config,
            backtest_config,
        }
    }

    /// Run the full simulation.
    ///
    /// Each bar is handled in three steps: orders submitted on the previous
    /// bar fill at this bar's open, the driver sees the bar, then equity is
    /// recorded at the close.
    pub fn run(&self) -> Result<BacktestResult> {
        let instruments = self.data_loader.instruments();
        anyhow::ensure!(!instruments.is_empty(), "No instruments available");

        let (first, last) = self
            .data_loader
            .available_range()
            .context("No historical data available")?;
        let start = self.backtest_config.start.unwrap_or(first).max(first);
        let end = self.backtest_config.end.unwrap_or(last).min(last);
        anyhow::ensure!(start <= end, "Backtest start {} is after end {}", start, end);

        let mut driver = StrategyDriver::new(instruments.clone(), &self.config.strategy)?;
        let priming_steps = match start.pred_opt() {
            Some(prior) if prior >= first => {
                let history = self.data_loader.load_bars(first, prior)?;
                driver.prime(&history)
            }
            _ => 0,
        };

        let bars = self.data_loader.load_bars(start, end)?;
        anyhow::ensure!(!bars.is_empty(), "No bars between {} and {}", start, end);

        info!(
            instruments = instruments.len(),
            bars = bars.len(),
            %start,
            %end,
            window_size = self.config.strategy.window_size,
            rebalance_frequency = self.config.strategy.rebalance_frequency,
            "Starting backtest"
        );

        let mut broker = SimulatedBroker::from_config(&self.config.broker);
        let commission = dec_to_f64(broker.commission_per_trade());

        let mut equity_curve = Vec::with_capacity(bars.len());
        let mut trades = Vec::new();
        let mut peak_equity = broker.initial_cash();
        let mut rebalances = 0;
        let mut skipped = 0;

        for bar in &bars {
            for event in broker.process_bar(bar) {
                if let Some(closed) = driver.on_order_event(event, &mut broker)? {
                    trades.push(TradeRecord::from_closed(closed, commission));
                }
            }

            match driver.on_bar(bar, &mut broker)? {
                TickOutcome::Rebalanced { .. } => rebalances += 1,
                TickOutcome::Skipped { .. } => skipped += 1,
                TickOutcome::WarmingUp { .. } | TickOutcome::Holding { .. } => {}
            }

            let cash = broker.cash_balance();
            let holdings = broker.holdings_value();
            peak_equity = peak_equity.max(cash + holdings);
            let open_lots = (0..instruments.len())
                .map(|i| driver.ledger().open_lots(i).count())
                .sum();
            equity_curve.push(EquityPoint::new(bar.date, cash, holdings, open_lots, peak_equity));
        }

        let positions: Vec<PositionSnapshot> = instruments
            .iter()
            .enumerate()
            .map(|(i, instrument)| PositionSnapshot {
                instrument: instrument.clone(),
                weight: driver.weights()[i],
                shares: broker.shares(instrument),
                ledger_quantity: driver.ledger().total_quantity(i),
                open_lots: driver.ledger().open_lots(i).count(),
            })
            .collect();

        for position in positions.iter().filter(|p| p.shares != p.ledger_quantity) {
            warn!(
                instrument = %position.instrument,
                shares = position.shares,
                ledger = position.ledger_quantity,
                "Lot ledger out of sync with broker"
            );
        }
        if driver.pending_exits() > 0 || driver.pending_entries() > 0 {
            warn!(
                entries = driver.pending_entries(),
                exits = driver.pending_exits(),
                "Orders still pending at end of run"
            );
        }

        let metrics = BacktestMetrics::calculate(
            &equity_curve,
            broker.initial_cash(),
            broker.total_commission(),
            self.backtest_config.risk_free_rate,
            rebalances,
            skipped,
            &trades,
        );

        info!(
            final_equity = %metrics.final_equity,
            return_pct = %metrics.total_return_pct.round_dp(2),
            sharpe = metrics.sharpe_ratio,
            trades = trades.len(),
            "Backtest complete"
        );

        if !self.backtest_config.record_equity_curve {
            equity_curve.clear();
        }

        Ok(BacktestResult {
            config: self.config.clone(),
            backtest_config: self.backtest_config.clone(),
            instruments,
            metrics,
            equity_curve,
            trades,
            positions,
            start_date: start,
            end_date: end,
            bars_processed: bars.len(),
            priming_steps,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::CsvDataLoader;
    use crate::market::{Bar, Quote};
    use chrono::Duration;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    /// Two anti-correlated oscillators and a steady trend.
    fn synthetic_bars(days: i64) -> Vec<Bar> {
        let start = NaiveDate::from_ymd_opt(2016, 1, 4).unwrap();
        (0..days)
            .map(|t| {
                let phase = (t as f64 / 3.0).sin();
                Bar::new(start + Duration::days(t))
                    .with_quote("AAA", Quote::flat(100.0 + 10.0 * phase))
                    .with_quote("BBB", Quote::flat(100.0 - 10.0 * phase))
                    .with_quote("CCC", Quote::flat(50.0 + 0.5 * t as f64))
            })
            .collect()
    }

    fn config(window_size: usize, rebalance_frequency: usize) -> Config {
        let mut config = Config::default();
        config.strategy.window_size = window_size;
        config.strategy.rebalance_frequency = rebalance_frequency;
        config.strategy.fill_with_adjusted_values = false;
        config.broker.initial_cash = dec!(10000);
        config.broker.commission_per_trade = dec!(1);
        config
    }

    fn run(bars: Vec<Bar>, backtest_config: BacktestConfig) -> BacktestResult {
        let engine = BacktestEngine::new(CsvDataLoader::from_bars(bars), config(3, 2), backtest_config);
        engine.run().unwrap()
    }

    #[test]
    fn test_run_trades_and_reconciles() {
        let result = run(synthetic_bars(80), BacktestConfig::default());

        assert_eq!(result.bars_processed, 80);
        assert_eq!(result.equity_curve.len(), 80);
        assert_eq!(result.priming_steps, 0);
        assert!(result.metrics.rebalances > 0);
        assert!(result.metrics.total_commission > Decimal::ZERO);

        let weight_sum: f64 = result.positions.iter().map(|p| p.weight).sum();
        assert!((weight_sum - 1.0).abs() < 1e-6);

        for position in &result.positions {
            assert_eq!(position.ledger_quantity, position.shares);
        }
    }

    #[test]
    fn test_equity_is_cash_plus_holdings() {
        let result = run(synthetic_bars(60), BacktestConfig::default());
        for point in &result.equity_curve {
            assert_eq!(point.total_equity, point.cash + point.holdings_value);
            assert!(point.cash >= Decimal::ZERO);
        }
        assert_eq!(
            result.metrics.final_equity,
            result.equity_curve.last().unwrap().total_equity
        );
    }

    #[test]
    fn test_bars_before_start_prime_the_driver() {
        let bars = synthetic_bars(60);
        let start = bars[20].date;
        let result = run(
            bars,
            BacktestConfig {
                start: Some(start),
                ..BacktestConfig::default()
            },
        );

        assert_eq!(result.bars_processed, 40);
        assert_eq!(result.start_date, start);
        // Capacity 7: bars 6..=19 each step the engine.
        assert_eq!(result.priming_steps, 14);
    }

    #[test]
    fn test_runs_are_deterministic() {
        let a = run(synthetic_bars(50), BacktestConfig::default());
        let b = run(synthetic_bars(50), BacktestConfig::default());
        assert_eq!(a.metrics.final_equity, b.metrics.final_equity);
        assert_eq!(a.trades.len(), b.trades.len());
    }

    #[test]
    fn test_equity_curve_can_be_dropped() {
        let result = run(
            synthetic_bars(40),
            BacktestConfig {
                record_equity_curve: false,
                ..BacktestConfig::default()
            },
        );
        assert!(result.equity_curve.is_empty());
        assert_eq!(result.metrics.trading_days, 40);
    }

    #[test]
    fn test_exports() {
        let result = run(synthetic_bars(40), BacktestConfig::default());
        let dir = std::env::temp_dir().join(format!("anticor-export-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        result.equity_to_csv(dir.join("equity.csv")).unwrap();
        result.trades_to_csv(dir.join("trades.csv")).unwrap();
        let json = result.to_json().unwrap();

        let equity = std::fs::read_to_string(dir.join("equity.csv")).unwrap();
        assert_eq!(equity.lines().count(), 41);
        assert!(json.contains("\"sharpe_ratio\""));
        assert!(result.summary().contains("Final allocation"));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_start_after_end_is_an_error() {
        let bars = synthetic_bars(20);
        let engine = BacktestEngine::new(
            CsvDataLoader::from_bars(bars.clone()),
            config(3, 2),
            BacktestConfig {
                start: Some(bars[10].date),
                end: Some(bars[5].date),
                ..BacktestConfig::default()
            },
        );
        assert!(engine.run().is_err());
    }
}
