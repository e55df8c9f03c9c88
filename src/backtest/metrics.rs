//! Performance metrics calculation for backtesting.
//!
//! Provides Sharpe ratio, drawdown analysis, and per-trade statistics.

use crate::strategy::ClosedTrade;
use crate::utils::{dec_to_f64, safe_div};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Trading days used to annualise daily figures.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// A point on the equity curve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub cash: Decimal,
    pub holdings_value: Decimal,
    pub total_equity: Decimal,
    pub drawdown: Decimal,
    pub open_lots: usize,
}

impl EquityPoint {
    /// Create a new equity point.
    pub fn new(
        date: NaiveDate,
        cash: Decimal,
        holdings_value: Decimal,
        open_lots: usize,
        peak_equity: Decimal,
    ) -> Self {
        let total_equity = cash + holdings_value;
        let drawdown = if peak_equity > Decimal::ZERO {
            ((peak_equity - total_equity) / peak_equity).max(Decimal::ZERO)
        } else {
            Decimal::ZERO
        };

        Self {
            date,
            cash,
            holdings_value,
            total_equity,
            drawdown,
            open_lots,
        }
    }
}

/// A closed lot with commissions applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub instrument: String,
    pub quantity: u64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub opened_on: NaiveDate,
    pub closed_on: NaiveDate,
    /// Net of entry and exit commissions
    pub profit: f64,
    /// Net profit over entry cost
    pub return_pct: f64,
}

impl TradeRecord {
    /// Build from a closed lot, charging one commission on each side.
    pub fn from_closed(trade: ClosedTrade, commission_per_trade: f64) -> Self {
        let quantity = trade.quantity as f64;
        let cost = trade.entry_price * quantity;
        let profit = (trade.exit_price - trade.entry_price) * quantity - 2.0 * commission_per_trade;
        let return_pct = if cost > 0.0 { profit / cost * 100.0 } else { 0.0 };

        Self {
            instrument: trade.instrument,
            quantity: trade.quantity,
            entry_price: trade.entry_price,
            exit_price: trade.exit_price,
            opened_on: trade.opened_on,
            closed_on: trade.closed_on,
            profit,
            return_pct,
        }
    }
}

/// Mean, standard deviation and extremes of a sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    pub mean: f64,
    pub std_dev: f64,
    pub max: f64,
    pub min: f64,
}

impl Distribution {
    /// Population statistics; all zero for an empty sample.
    pub fn of(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

        Self {
            mean,
            std_dev: variance.sqrt(),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
        }
    }
}

/// Statistics over closed trades.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeStats {
    pub count: usize,
    pub profitable_count: usize,
    pub unprofitable_count: usize,
    pub even_count: usize,
    pub all_profits: Distribution,
    pub all_returns: Distribution,
    pub profitable_profits: Distribution,
    pub profitable_returns: Distribution,
    pub unprofitable_profits: Distribution,
    pub unprofitable_returns: Distribution,
}

impl TradeStats {
    pub fn calculate(trades: &[TradeRecord]) -> Self {
        let select = |keep: fn(f64) -> bool| -> (Vec<f64>, Vec<f64>) {
            trades
                .iter()
                .filter(|t| keep(t.profit))
                .map(|t| (t.profit, t.return_pct))
                .unzip()
        };

        let (all_p, all_r) = select(|_| true);
        let (win_p, win_r) = select(|p| p > 0.0);
        let (loss_p, loss_r) = select(|p| p < 0.0);

        Self {
            count: trades.len(),
            profitable_count: win_p.len(),
            unprofitable_count: loss_p.len(),
            even_count: trades.len() - win_p.len() - loss_p.len(),
            all_profits: Distribution::of(&all_p),
            all_returns: Distribution::of(&all_r),
            profitable_profits: Distribution::of(&win_p),
            profitable_returns: Distribution::of(&win_r),
            unprofitable_profits: Distribution::of(&loss_p),
            unprofitable_returns: Distribution::of(&loss_r),
        }
    }
}

/// Backtest performance metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestMetrics {
    // Returns
    pub initial_equity: Decimal,
    pub final_equity: Decimal,
    /// Total absolute return (final - initial)
    pub total_return: Decimal,
    /// Total return as percentage
    pub total_return_pct: Decimal,

    // Risk
    /// Annualised Sharpe ratio of daily excess returns
    pub sharpe_ratio: f64,
    /// Maximum peak-to-trough drawdown as a fraction
    pub max_drawdown: Decimal,
    /// Longest time spent below a previous peak, in days
    pub longest_drawdown_days: i64,

    // Activity
    pub total_commission: Decimal,
    pub rebalances: usize,
    pub skipped_rebalances: usize,
    pub trading_days: usize,
    pub trades: TradeStats,
}

impl BacktestMetrics {
    /// Calculate metrics from the equity curve and run counters.
    pub fn calculate(
        equity_curve: &[EquityPoint],
        initial_equity: Decimal,
        total_commission: Decimal,
        risk_free_rate: f64,
        rebalances: usize,
        skipped_rebalances: usize,
        trades: &[TradeRecord],
    ) -> Self {
        let final_equity = equity_curve
            .last()
            .map(|p| p.total_equity)
            .unwrap_or(initial_equity);

        let total_return = final_equity - initial_equity;
        let total_return_pct = safe_div(total_return, initial_equity) * dec!(100);

        let returns = calculate_daily_returns(equity_curve);
        let (max_drawdown, longest_drawdown_days) = calculate_max_drawdown(equity_curve);

        Self {
            initial_equity,
            final_equity,
            total_return,
            total_return_pct,
            sharpe_ratio: calculate_sharpe(&returns, risk_free_rate),
            max_drawdown,
            longest_drawdown_days,
            total_commission,
            rebalances,
            skipped_rebalances,
            trading_days: equity_curve.len(),
            trades: TradeStats::calculate(trades),
        }
    }

    /// Format metrics as a summary string.
    pub fn summary(&self) -> String {
        let t = &self.trades;
        format!(
            r#"═══════════════════════════════════════════════
BACKTEST RESULTS ({} trading days)
═══════════════════════════════════════════════
RETURNS
  Final Portfolio:   ${:.2}
  Total Return:      ${:.2} ({:.2}%)

RISK
  Sharpe Ratio:      {:.3}
  Max Drawdown:      {:.2}%
  Longest Drawdown:  {} days

ACTIVITY
  Rebalances:        {} ({} skipped)
  Commissions:       ${:.2}

TRADES
  Total Trades:      {}
  Avg. Profit:       ${:.2} (std ${:.2}, max ${:.2}, min ${:.2})
  Avg. Return:       {:.2}% (std {:.2}%)
  Profitable:        {} (avg ${:.2}, avg return {:.2}%)
  Unprofitable:      {} (avg ${:.2}, avg return {:.2}%)
═══════════════════════════════════════════════"#,
            self.trading_days,
            self.final_equity,
            self.total_return,
            self.total_return_pct,
            self.sharpe_ratio,
            self.max_drawdown * dec!(100),
            self.longest_drawdown_days,
            self.rebalances,
            self.skipped_rebalances,
            self.total_commission,
            t.count,
            t.all_profits.mean,
            t.all_profits.std_dev,
            t.all_profits.max,
            t.all_profits.min,
            t.all_returns.mean,
            t.all_returns.std_dev,
            t.profitable_count,
            t.profitable_profits.mean,
            t.profitable_returns.mean,
            t.unprofitable_count,
            t.unprofitable_profits.mean,
            t.unprofitable_returns.mean,
        )
    }
}

/// Calculate day-over-day returns from the equity curve.
fn calculate_daily_returns(equity_curve: &[EquityPoint]) -> Vec<f64> {
    equity_curve
        .windows(2)
        .map(|w| dec_to_f64(safe_div(w[1].total_equity - w[0].total_equity, w[0].total_equity)))
        .collect()
}

/// Calculate maximum drawdown and the longest drawdown duration in days.
fn calculate_max_drawdown(equity_curve: &[EquityPoint]) -> (Decimal, i64) {
    let Some(first) = equity_curve.first() else {
        return (Decimal::ZERO, 0);
    };

    let mut peak = first.total_equity;
    let mut peak_date = first.date;
    let mut max_dd = Decimal::ZERO;
    let mut longest = 0;

    for point in equity_curve {
        if point.total_equity >= peak {
            peak = point.total_equity;
            peak_date = point.date;
            continue;
        }

        max_dd = max_dd.max(safe_div(peak - point.total_equity, peak));
        longest = longest.max((point.date - peak_date).num_days());
    }

    (max_dd, longest)
}

/// Annualised Sharpe ratio of daily returns in excess of `risk_free_rate`.
fn calculate_sharpe(returns: &[f64], risk_free_rate: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }

    let daily_rf = risk_free_rate / TRADING_DAYS_PER_YEAR;
    let excess: Vec<f64> = returns.iter().map(|r| r - daily_rf).collect();

    let n = excess.len() as f64;
    let mean = excess.iter().sum::<f64>() / n;
    let variance = excess.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std_dev = variance.sqrt();

    if std_dev < 1e-12 {
        return 0.0;
    }

    mean / std_dev * TRADING_DAYS_PER_YEAR.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn curve(values: &[Decimal]) -> Vec<EquityPoint> {
        let start = NaiveDate::from_ymd_opt(2016, 1, 4).unwrap();
        let mut peak = Decimal::ZERO;
        values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                peak = peak.max(*v);
                EquityPoint::new(start + Duration::days(i as i64), *v, Decimal::ZERO, 0, peak)
            })
            .collect()
    }

    #[test]
    fn test_equity_point_drawdown() {
        let point = EquityPoint::new(
            NaiveDate::from_ymd_opt(2016, 1, 4).unwrap(),
            dec!(4500),
            dec!(5000),
            3,
            dec!(10000),
        );

        assert_eq!(point.total_equity, dec!(9500));
        assert_eq!(point.drawdown, dec!(0.05));
    }

    #[test]
    fn test_max_drawdown_and_duration() {
        let curve = curve(&[dec!(100), dec!(120), dec!(90), dec!(110), dec!(130), dec!(125)]);

        let (max_dd, longest) = calculate_max_drawdown(&curve);
        assert_eq!(max_dd, dec!(0.25));
        assert_eq!(longest, 2);
    }

    #[test]
    fn test_sharpe_matches_formula() {
        let returns = [0.1, -0.1, 0.1];
        let mean: f64 = 0.1 / 3.0;
        let std = ((2.0 * (0.1 - mean).powi(2) + (-0.1 - mean).powi(2)) / 2.0).sqrt();
        let expected = mean / std * 252f64.sqrt();

        assert!((calculate_sharpe(&returns, 0.0) - expected).abs() < 1e-9);
        assert!(calculate_sharpe(&returns, 0.05) < expected);
    }

    #[test]
    fn test_flat_equity_has_zero_sharpe() {
        let curve = curve(&[dec!(100); 10]);
        let returns = calculate_daily_returns(&curve);
        assert_eq!(calculate_sharpe(&returns, 0.0), 0.0);
        assert_eq!(calculate_max_drawdown(&curve), (Decimal::ZERO, 0));
    }

    #[test]
    fn test_trade_stats() {
        let day = NaiveDate::from_ymd_opt(2016, 2, 1).unwrap();
        let closed = |entry: f64, exit: f64| ClosedTrade {
            instrument: "AAPL".to_string(),
            quantity: 10,
            entry_price: entry,
            exit_price: exit,
            opened_on: day,
            closed_on: day,
        };
        let trades = vec![
            TradeRecord::from_closed(closed(10.0, 12.0), 1.0),
            TradeRecord::from_closed(closed(10.0, 8.0), 1.0),
            TradeRecord::from_closed(closed(10.0, 10.1), 1.0),
        ];

        assert_eq!(trades[0].profit, 18.0);
        assert_eq!(trades[1].profit, -22.0);

        let stats = TradeStats::calculate(&trades);
        assert_eq!(stats.count, 3);
        assert_eq!(stats.profitable_count, 1);
        assert_eq!(stats.unprofitable_count, 2);
        assert_eq!(stats.profitable_profits.max, 18.0);
        assert_eq!(stats.all_profits.min, -22.0);
    }

    #[test]
    fn test_metrics_summary() {
        let curve = curve(&[dec!(10000), dec!(10100), dec!(10050), dec!(10500)]);
        let metrics = BacktestMetrics::calculate(&curve, dec!(10000), dec!(36), 0.05, 2, 1, &[]);

        assert_eq!(metrics.total_return, dec!(500));
        assert_eq!(metrics.total_return_pct, dec!(5));
        assert_eq!(metrics.trading_days, 4);

        let summary = metrics.summary();
        assert!(summary.contains("500.00"));
        assert!(summary.contains("Sharpe"));
    }
}
