//! Historical bar feed for backtesting.
//!
//! Loads per-instrument daily CSV files and merges them into date-ordered bars.

use crate::market::{Bar, DailyBar, Quote};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info, warn};

/// Trait for loading historical bars.
pub trait DataLoader: Send + Sync {
    /// Load all bars dated within `[start, end]`.
    fn load_bars(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<Bar>>;

    /// Get the available date range in the data.
    fn available_range(&self) -> Option<(NaiveDate, NaiveDate)>;

    /// Get the instrument universe, sorted.
    fn instruments(&self) -> Vec<String>;
}

/// CSV data loader for historical backtesting.
///
/// Expected file name: `SYMBOL - YEAR.csv`. Expected content:
/// ```csv
/// Date,Open,High,Low,Close,Volume,Adj Close
/// 2016-01-04,102.61,105.37,102.00,105.35,67649400,101.79
/// ```
/// Columns are located by header name, so the Yahoo ordering with
/// `Adj Close` before `Volume` is accepted as well.
#[derive(Debug, Clone, Default)]
pub struct CsvDataLoader {
    /// Bars indexed by date
    bars: BTreeMap<NaiveDate, Bar>,
    /// All instruments seen
    instruments: BTreeSet<String>,
}

impl CsvDataLoader {
    /// Load every `*.csv` file in a directory.
    ///
    /// The instrument is the file name up to the first `-`, trimmed. Several
    /// files for the same instrument (one per year) are merged.
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read data directory: {}", dir.display()))?;

        let mut paths: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "csv"))
            .collect();
        paths.sort();

        let mut loader = Self::default();
        for path in paths {
            let Some(instrument) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(instrument_from_stem)
            else {
                warn!(path = %path.display(), "Skipping file without an instrument name");
                continue;
            };

            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read CSV file: {}", path.display()))?;
            let rows = parse_daily_csv(&content)
                .with_context(|| format!("Failed to parse CSV file: {}", path.display()))?;

            debug!(%instrument, rows = rows.len(), path = %path.display(), "Loaded price file");
            loader.add_series(&instrument, rows);
        }

        if loader.instruments.is_empty() {
            anyhow::bail!("No price files found in {}", dir.display());
        }

        info!(
            instruments = loader.instruments.len(),
            bars = loader.bars.len(),
            "Loaded historical data"
        );

        Ok(loader)
    }

    /// Load a single instrument from CSV content.
    pub fn from_csv_content(instrument: &str, content: &str) -> Result<Self> {
        let rows = parse_daily_csv(content)?;
        if rows.is_empty() {
            anyhow::bail!("CSV content for {} contains no data rows", instrument);
        }

        let mut loader = Self::default();
        loader.add_series(instrument, rows);
        Ok(loader)
    }

    /// Create a loader from in-memory bars.
    pub fn from_bars(bars: Vec<Bar>) -> Self {
        let mut loader = Self::default();
        for bar in bars {
            loader.instruments.extend(bar.quotes.keys().cloned());
            loader.bars.insert(bar.date, bar);
        }
        loader
    }

    /// Merge another instrument's rows into the feed.
    pub fn add_series(&mut self, instrument: &str, rows: Vec<DailyBar>) {
        self.instruments.insert(instrument.to_string());
        for row in rows {
            self.bars
                .entry(row.date)
                .or_insert_with(|| Bar::new(row.date))
                .quotes
                .insert(instrument.to_string(), row.quote);
        }
    }

    /// Get total number of bars.
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    /// Check if the loader has no data.
    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}

impl DataLoader for CsvDataLoader {
    fn load_bars(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<Bar>> {
        Ok(self.bars.range(start..=end).map(|(_, bar)| bar.clone()).collect())
    }

    fn available_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let first = self.bars.keys().next()?;
        let last = self.bars.keys().next_back()?;
        Some((*first, *last))
    }

    fn instruments(&self) -> Vec<String> {
        self.instruments.iter().cloned().collect()
    }
}

/// Instrument name from a file stem like `AAPL - 2016`.
fn instrument_from_stem(stem: &str) -> Option<String> {
    let name = stem.split('-').next()?.trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Parse a daily CSV file, skipping rows with `null` fields.
pub fn parse_daily_csv(content: &str) -> Result<Vec<DailyBar>> {
    let mut lines = content.lines().enumerate();
    let header = loop {
        match lines.next() {
            Some((_, line)) if line.trim().is_empty() => continue,
            Some((_, line)) => break line,
            None => return Ok(Vec::new()),
        }
    };
    let columns = ColumnMap::from_header(header)?;

    let mut rows = Vec::new();
    for (line_num, line) in lines {
        if line.trim().is_empty() {
            continue;
        }
        if line.split(',').any(|field| field.trim() == "null") {
            debug!(line = line_num + 1, "Skipping null row");
            continue;
        }

        let row = columns
            .parse(line)
            .with_context(|| format!("Failed to parse line {}: {}", line_num + 1, line))?;
        rows.push(row);
    }

    rows.sort_by_key(|row| row.date);
    Ok(rows)
}

/// Column positions resolved from the header line.
#[derive(Debug)]
struct ColumnMap {
    date: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    volume: usize,
    adj_close: Option<usize>,
}

impl ColumnMap {
    fn from_header(header: &str) -> Result<Self> {
        let names: Vec<&str> = header.split(',').map(str::trim).collect();
        let find = |name: &str| names.iter().position(|n| n.eq_ignore_ascii_case(name));
        let require = |name: &str| {
            find(name).with_context(|| format!("Missing column '{}' in header: {}", name, header))
        };

        Ok(Self {
            date: require("Date")?,
            open: require("Open")?,
            high: require("High")?,
            low: require("Low")?,
            close: require("Close")?,
            volume: require("Volume")?,
            adj_close: find("Adj Close"),
        })
    }

    fn parse(&self, line: &str) -> Result<DailyBar> {
        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        let field = |index: usize, name: &str| {
            parts
                .get(index)
                .copied()
                .with_context(|| format!("Missing {} column", name))
        };
        let price = |index: usize, name: &str| -> Result<f64> {
            let raw = field(index, name)?;
            raw.parse()
                .with_context(|| format!("Invalid {}: {}", name, raw))
        };

        let date_raw = field(self.date, "date")?;
        let date = NaiveDate::parse_from_str(date_raw, "%Y-%m-%d")
            .with_context(|| format!("Invalid date: {}", date_raw))?;
        let close = price(self.close, "close")?;
        let volume_raw = field(self.volume, "volume")?;
        let volume: f64 = volume_raw
            .parse()
            .with_context(|| format!("Invalid volume: {}", volume_raw))?;

        Ok(DailyBar {
            date,
            quote: Quote {
                open: price(self.open, "open")?,
                high: price(self.high, "high")?,
                low: price(self.low, "low")?,
                close,
                adj_close: match self.adj_close {
                    Some(index) => price(index, "adj close")?,
                    None => close,
                },
                volume: volume.max(0.0) as u64,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const AAPL: &str = "Date,Open,High,Low,Close,Volume,Adj Close
2016-01-05,105.75,105.85,102.41,102.71,55791000,99.24
2016-01-04,102.61,105.37,102.00,105.35,67649400,101.79
2016-01-06,null,null,null,null,null,null
";

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2016, 1, day).unwrap()
    }

    fn temp_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("anticor-data-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_csv_parsing() {
        let rows = parse_daily_csv(AAPL).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date, date(4));
        assert_eq!(rows[0].quote.adj_close, 101.79);
        assert_eq!(rows[1].quote.volume, 55791000);
    }

    #[test]
    fn test_yahoo_column_order() {
        let csv = "Date,Open,High,Low,Close,Adj Close,Volume\n2016-01-04,10,11,9,10.5,10.2,1000\n";
        let rows = parse_daily_csv(csv).unwrap();
        assert_eq!(rows[0].quote.adj_close, 10.2);
        assert_eq!(rows[0].quote.volume, 1000);
    }

    #[test]
    fn test_missing_column_is_an_error() {
        assert!(parse_daily_csv("Date,Open,Close\n2016-01-04,1,2\n").is_err());
    }

    #[test]
    fn test_instrument_from_stem() {
        assert_eq!(instrument_from_stem("AAPL - 2016").as_deref(), Some("AAPL"));
        assert_eq!(instrument_from_stem("BRK-B - 2016").as_deref(), Some("BRK"));
        assert_eq!(instrument_from_stem(" - 2016"), None);
    }

    #[test]
    fn test_from_dir_merges_years_and_instruments() {
        let dir = temp_dir("merge");
        let write = |name: &str, content: &str| {
            let mut file = std::fs::File::create(dir.join(name)).unwrap();
            file.write_all(content.as_bytes()).unwrap();
        };
        write("AAPL - 2016.csv", AAPL);
        write(
            "AAPL - 2015.csv",
            "Date,Open,High,Low,Close,Volume,Adj Close\n2015-12-31,107,107,104,105.26,40912300,101.70\n",
        );
        write(
            "MSFT - 2016.csv",
            "Date,Open,High,Low,Close,Volume,Adj Close\n2016-01-05,54.93,55.39,54.54,55.05,34079700,52.89\n",
        );
        write("notes.txt", "ignored");

        let loader = CsvDataLoader::from_dir(&dir).unwrap();
        assert_eq!(loader.instruments(), vec!["AAPL", "MSFT"]);
        assert_eq!(loader.len(), 3);

        let range = loader.available_range().unwrap();
        assert_eq!(range.0, NaiveDate::from_ymd_opt(2015, 12, 31).unwrap());
        assert_eq!(range.1, date(5));

        let bars = loader.load_bars(date(1), date(31)).unwrap();
        assert_eq!(bars.len(), 2);
        assert!(!bars[0].contains("MSFT"));
        assert!(bars[1].contains("MSFT"));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_empty_dir_is_an_error() {
        let dir = temp_dir("empty");
        assert!(CsvDataLoader::from_dir(&dir).is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
