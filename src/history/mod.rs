//! Historical daily price retrieval.
//!
//! Fetches one file per (symbol, year) into the data directory in the layout
//! the backtest loader reads.

mod yahoo;

pub use yahoo::YahooClient;

use crate::market::{DailyBar, DAILY_CSV_HEADER};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Source of daily bars for one symbol and calendar year.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HistoricalPriceSource: Send + Sync {
    async fn daily_bars(&self, symbol: &str, year: i32) -> Result<Vec<DailyBar>>;
}

/// What happened to one (symbol, year) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FetchOutcome {
    Downloaded { rows: usize },
    /// File already present
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchStatus {
    pub symbol: String,
    pub year: i32,
    pub outcome: FetchOutcome,
}

/// Outcome of a whole fetch run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchReport {
    pub statuses: Vec<FetchStatus>,
}

impl FetchReport {
    pub fn downloaded(&self) -> usize {
        self.statuses
            .iter()
            .filter(|s| matches!(s.outcome, FetchOutcome::Downloaded { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.statuses
            .iter()
            .filter(|s| s.outcome == FetchOutcome::Skipped)
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &FetchStatus> {
        self.statuses
            .iter()
            .filter(|s| matches!(s.outcome, FetchOutcome::Failed(_)))
    }

    pub fn summary(&self) -> String {
        let mut s = format!(
            "Fetched: {} | Skipped: {} | Failed: {}",
            self.downloaded(),
            self.skipped(),
            self.failures().count()
        );
        for status in self.failures() {
            if let FetchOutcome::Failed(reason) = &status.outcome {
                s.push_str(&format!("\n  ERROR {} {}: {}", status.symbol, status.year, reason));
            }
        }
        s
    }
}

/// Downloads per-symbol yearly files into a data directory.
pub struct Downloader<S: HistoricalPriceSource> {
    source: S,
    data_dir: PathBuf,
}

impl<S: HistoricalPriceSource> Downloader<S> {
    pub fn new<P: AsRef<Path>>(source: S, data_dir: P) -> Self {
        Self {
            source,
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }

    /// Path of the file holding `symbol` for `year`.
    pub fn file_path(&self, symbol: &str, year: i32) -> PathBuf {
        self.data_dir.join(format!("{} - {}.csv", symbol, year))
    }

    /// Fetch every (year, symbol) pair whose file does not exist yet.
    ///
    /// A failure for one pair is recorded and the run continues.
    pub async fn fetch_all(&self, symbols: &[String], years: &[i32]) -> Result<FetchReport> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("Failed to create {}", self.data_dir.display()))?;

        let mut report = FetchReport::default();
        for &year in years {
            for symbol in symbols {
                let outcome = self.fetch_one(symbol, year).await;
                report.statuses.push(FetchStatus {
                    symbol: symbol.clone(),
                    year,
                    outcome,
                });
            }
        }

        info!(
            downloaded = report.downloaded(),
            skipped = report.skipped(),
            failed = report.failures().count(),
            "Fetch complete"
        );
        Ok(report)
    }

    async fn fetch_one(&self, symbol: &str, year: i32) -> FetchOutcome {
        let path = self.file_path(symbol, year);
        if path.exists() {
            debug!(symbol, year, "File exists, skipping");
            return FetchOutcome::Skipped;
        }

        let result = match self.source.daily_bars(symbol, year).await {
            Ok(bars) if bars.is_empty() => Err(anyhow::anyhow!("No data returned")),
            Ok(bars) => write_daily_csv(&path, &bars).map(|_| bars.len()),
            Err(e) => Err(e),
        };

        match result {
            Ok(rows) => {
                info!(symbol, year, rows, "Downloaded");
                FetchOutcome::Downloaded { rows }
            }
            Err(e) => {
                warn!(symbol, year, error = %format!("{:#}", e), "Fetch failed");
                FetchOutcome::Failed(format!("{:#}", e))
            }
        }
    }
}

/// Write bars in the daily CSV layout, replacing the target only once complete.
pub fn write_daily_csv(path: &Path, bars: &[DailyBar]) -> Result<()> {
    let mut content = String::with_capacity(64 * (bars.len() + 1));
    content.push_str(DAILY_CSV_HEADER);
    content.push('\n');
    for bar in bars {
        content.push_str(&bar.to_csv_line());
        content.push('\n');
    }

    let tmp = path.with_extension("csv.part");
    std::fs::write(&tmp, content).with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("Failed to move into {}", path.display()))
}

/// Read a symbol list: one per line, blank lines and `#` comments ignored.
pub fn read_symbols_file<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read symbols file: {}", path.display()))?;
    Ok(parse_symbols(&content))
}

fn parse_symbols(content: &str) -> Vec<String> {
    let mut symbols: Vec<String> = Vec::new();
    for line in content.lines() {
        let symbol = line.trim();
        if symbol.is_empty() || symbol.starts_with('#') {
            continue;
        }
        if !symbols.iter().any(|s| s == symbol) {
            symbols.push(symbol.to_string());
        }
    }
    symbols
}
