//! Market data types shared by the strategy, broker and bar feed.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Daily price observation for a single instrument.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub adj_close: f64,
    pub volume: u64,
}

impl Quote {
    /// Quote with every price field set to the same value.
    pub fn flat(price: f64) -> Self {
        Self {
            open: price,
            high: price,
            low: price,
            close: price,
            adj_close: price,
            volume: 0,
        }
    }

    /// Closing price, optionally the adjusted close.
    pub fn price(&self, use_adjusted: bool) -> f64 {
        if use_adjusted {
            self.adj_close
        } else {
            self.close
        }
    }

    /// Open price scaled by the close adjustment factor.
    pub fn adjusted_open(&self) -> f64 {
        if self.close > 0.0 {
            self.open * self.adj_close / self.close
        } else {
            self.open
        }
    }
}

/// One time step: the quotes observed for each instrument on a date.
///
/// An instrument missing from `quotes` did not trade that day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub quotes: BTreeMap<String, Quote>,
}

impl Bar {
    /// Create an empty bar for the given date.
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            quotes: BTreeMap::new(),
        }
    }

    /// Add a quote for an instrument.
    pub fn with_quote(mut self, instrument: &str, quote: Quote) -> Self {
        self.quotes.insert(instrument.to_string(), quote);
        self
    }

    pub fn quote(&self, instrument: &str) -> Option<&Quote> {
        self.quotes.get(instrument)
    }

    pub fn contains(&self, instrument: &str) -> bool {
        self.quotes.contains_key(instrument)
    }

    /// Get signal prices as a HashMap for the price window.
    pub fn prices(&self, use_adjusted: bool) -> HashMap<String, f64> {
        self.quotes
            .iter()
            .map(|(symbol, quote)| (symbol.clone(), quote.price(use_adjusted)))
            .collect()
    }
}

/// A dated quote for a single instrument, as stored in per-instrument files.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub quote: Quote,
}

/// Column layout of per-instrument daily CSV files.
pub const DAILY_CSV_HEADER: &str = "Date,Open,High,Low,Close,Volume,Adj Close";

impl DailyBar {
    /// Render as one line in `DAILY_CSV_HEADER` order.
    pub fn to_csv_line(&self) -> String {
        format!(
            "{},{},{},{},{},{},{}",
            self.date.format("%Y-%m-%d"),
            self.quote.open,
            self.quote.high,
            self.quote.low,
            self.quote.close,
            self.quote.volume,
            self.quote.adj_close,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjusted_open() {
        let quote = Quote {
            open: 100.0,
            high: 105.0,
            low: 95.0,
            close: 100.0,
            adj_close: 50.0,
            volume: 1_000,
        };
        assert_eq!(quote.adjusted_open(), 50.0);
        assert_eq!(quote.price(true), 50.0);
        assert_eq!(quote.price(false), 100.0);
    }

    #[test]
    fn test_bar_prices() {
        let date = NaiveDate::from_ymd_opt(2016, 1, 4).unwrap();
        let bar = Bar::new(date)
            .with_quote("AAPL", Quote::flat(105.0))
            .with_quote("MSFT", Quote::flat(55.0));

        let prices = bar.prices(false);
        assert_eq!(prices.get("AAPL"), Some(&105.0));
        assert!(bar.contains("MSFT"));
        assert!(!bar.contains("GOOG"));
    }

    #[test]
    fn test_daily_bar_csv_line() {
        let bar = DailyBar {
            date: NaiveDate::from_ymd_opt(2016, 1, 4).unwrap(),
            quote: Quote {
                open: 102.61,
                high: 105.37,
                low: 102.0,
                close: 105.35,
                adj_close: 101.79,
                volume: 67649400,
            },
        };
        assert_eq!(bar.to_csv_line(), "2016-01-04,102.61,105.37,102,105.35,67649400,101.79");
    }
}
