//! Yahoo Finance chart API.
//!
//! API: `https://query1.finance.yahoo.com/v8/finance/chart/{symbol}`
//! Auth: none. Unofficial; rows with a missing close are dropped.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::MarketDataSource;
use crate::types::DailyBar;

const BASE_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    #[serde(default)]
    code: String,
    #[serde(default)]
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
}

#[derive(Debug, Deserialize, Default)]
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

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct YahooClient {
    http: Client,
    base_url: String,
}

impl YahooClient {
    pub fn new() -> Result<Self> {
        Self::with_base_url(BASE_URL)
    }

    /// Point the client at another host (used by tests).
    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            // Yahoo rejects requests without a browser-ish agent.
            .user_agent("Mozilla/5.0 (compatible; rebalance-bot/0.1.0)")
            .build()
            .context("Failed to build Yahoo HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Zip the parallel arrays into bars, dropping rows without a close.
    fn to_bars(result: ChartResult) -> Vec<DailyBar> {
        let series = result.indicators.quote.into_iter().next().unwrap_or_default();
        fn at(v: &[Option<f64>], i: usize) -> Option<f64> {
            v.get(i).copied().flatten()
        }

        result
            .timestamp
            .iter()
            .enumerate()
            .filter_map(|(i, &ts)| {
                let close = at(&series.close, i)?;
                let date = DateTime::<Utc>::from_timestamp(ts, 0)?.date_naive();
                Some(DailyBar {
                    date,
                    open: at(&series.open, i).unwrap_or(close),
                    high: at(&series.high, i).unwrap_or(close),
                    low: at(&series.low, i).unwrap_or(close),
                    close,
                    volume: at(&series.volume, i).unwrap_or(0.0),
                })
            })
            .collect()
    }
}

#[async_trait]
impl MarketDataSource for YahooClient {
    async fn daily_bars(&self, symbol: &str, lookback_days: u32) -> Result<Vec<DailyBar>> {
        let now = Utc::now();
        let start = now - Duration::days(i64::from(lookback_days));
        let url = format!("{}/{}", self.base_url, urlencoding::encode(symbol));
        let period1 = start.timestamp().to_string();
        let period2 = now.timestamp().to_string();

        let resp = self
            .http
            .get(&url)
            .query(&[
                ("period1", period1.as_str()),
                ("period2", period2.as_str()),
                ("interval", "1d"),
            ])
            .send()
            .await
            .with_context(|| format!("Yahoo request failed for {symbol}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            anyhow::bail!("Yahoo chart error for {symbol}: {status}");
        }

        let data: ChartResponse = resp
            .json()
            .await
            .with_context(|| format!("Failed to parse Yahoo response for {symbol}"))?;

        if let Some(err) = data.chart.error {
            anyhow::bail!("Yahoo chart error for {symbol}: {} {}", err.code, err.description);
        }

        let result = data
            .chart
            .result
            .and_then(|r| r.into_iter().next())
            .with_context(|| format!("Yahoo returned no chart for {symbol}"))?;

        let bars = Self::to_bars(result);
        debug!(symbol, bars = bars.len(), "Fetched daily bars");
        Ok(bars)
    }
}
