//! Historical market data.
//!
//! Defines the `MarketDataSource` trait consumed by the stock picker and
//! a Yahoo Finance implementation.

pub mod yahoo;

use anyhow::Result;
use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::types::DailyBar;

/// Source of daily OHLCV history.
///
/// No freshness guarantee: the last bar may be yesterday's close.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Daily bars for `symbol` covering the last `lookback_days` calendar
    /// days, oldest first.
    async fn daily_bars(&self, symbol: &str, lookback_days: u32) -> Result<Vec<DailyBar>>;
}
