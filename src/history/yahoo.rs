//! Yahoo Finance chart API client.

use super::HistoricalPriceSource;
use crate::config::DataConfig;
use crate::market::{DailyBar, Quote};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

const USER_AGENT: &str = "Mozilla/5.0 (compatible; anticor-allocator)";

/// Daily bar source backed by the Yahoo Finance chart endpoint.
pub struct YahooClient {
    http: Client,
    base_url: String,
}

impl YahooClient {
    /// Create a new client against `base_url`.
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &DataConfig) -> Result<Self> {
        Self::new(&config.base_url, config.request_timeout_secs)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl HistoricalPriceSource for YahooClient {
    #[instrument(skip(self))]
    async fn daily_bars(&self, symbol: &str, year: i32) -> Result<Vec<DailyBar>> {
        let (period1, period2) = year_bounds(year)
            .with_context(|| format!("Invalid year {}", year))?;
        let url = format!(
            "{}/v8/finance/chart/{}",
            self.base_url,
            urlencoding::encode(symbol)
        );

        let response = self
            .http
            .get(&url)
            .query(&[
                ("period1", period1.to_string()),
                ("period2", period2.to_string()),
                ("interval", "1d".to_string()),
                ("events", "div,splits".to_string()),
            ])
            .send()
            .await
            .with_context(|| format!("Failed to fetch daily bars for {}", symbol))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read chart response")?;

        let chart: ChartResponse = match serde_json::from_str(&body) {
            Ok(chart) => chart,
            Err(e) if status.is_success() => {
                return Err(e).context("Failed to parse chart response");
            }
            Err(_) => anyhow::bail!("Chart request for {} failed with HTTP {}", symbol, status),
        };

        let bars = chart.into_daily_bars()?;
        debug!(symbol, year, rows = bars.len(), "Fetched daily bars");
        Ok(bars)
    }
}

/// Unix timestamps of Jan 1 of `year` and of the following year, UTC.
fn year_bounds(year: i32) -> Option<(i64, i64)> {
    let start = NaiveDate::from_ymd_opt(year, 1, 1)?.and_hms_opt(0, 0, 0)?;
    let end = NaiveDate::from_ymd_opt(year + 1, 1, 1)?.and_hms_opt(0, 0, 0)?;
    Some((start.and_utc().timestamp(), end.and_utc().timestamp()))
}

// ==================== Wire format ====================

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteSeries>,
    #[serde(default)]
    adjclose: Vec<AdjCloseSeries>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteSeries {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseSeries {
    #[serde(default)]
    adjclose: Vec<Option<f64>>,
}

impl ChartResponse {
    /// Flatten the column arrays into dated bars, skipping incomplete rows.
    fn into_daily_bars(self) -> Result<Vec<DailyBar>> {
        if let Some(error) = self.chart.error {
            anyhow::bail!("{}: {}", error.code, error.description);
        }

        let Some(result) = self.chart.result.and_then(|r| r.into_iter().next()) else {
            return Ok(Vec::new());
        };

        let quotes = result.indicators.quote.into_iter().next().unwrap_or_default();
        let adjclose = result
            .indicators
            .adjclose
            .into_iter()
            .next()
            .map(|a| a.adjclose)
            .unwrap_or_default();

        let at = |series: &[Option<f64>], i: usize| series.get(i).copied().flatten();

        let mut bars = Vec::with_capacity(result.timestamp.len());
        for (i, &ts) in result.timestamp.iter().enumerate() {
            let Some(date) = DateTime::from_timestamp(ts, 0).map(|dt| dt.date_naive()) else {
                continue;
            };
            let (Some(open), Some(high), Some(low), Some(close)) = (
                at(&quotes.open, i),
                at(&quotes.high, i),
                at(&quotes.low, i),
                at(&quotes.close, i),
            ) else {
                debug!(%date, "Skipping null row");
                continue;
            };

            bars.push(DailyBar {
                date,
                quote: Quote {
                    open,
                    high,
                    low,
                    close,
                    adj_close: at(&adjclose, i).unwrap_or(close),
                    volume: at(&quotes.volume, i).unwrap_or(0.0).max(0.0) as u64,
                },
            });
        }

        Ok(bars)
    }
}
