//! Stock scoring and basket selection.
//!
//! Turns daily price/volume history into a ranked, sector-capped shortlist:
//!
//! 1. Fetch history for every universe candidate (failures skip the symbol)
//! 2. Per-symbol metrics: 90d and 30d momentum, annualised volatility, Sharpe
//! 3. Drop illiquid symbols (average volume below the floor)
//! 4. Fractional ranks per factor → weighted composite score
//! 5. Sort descending, cap symbols per sector, take the top N

use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::{Candidate, StockPickerConfig};
use crate::data::MarketDataSource;
use crate::types::{DailyBar, StockScore};

/// Trading days in a year, for annualising daily volatility.
const TRADING_DAYS: f64 = 252.0;
/// ~22 trading days in 30 calendar days.
const BARS_30D: usize = 22;
/// Stand-in volatility when there are too few returns to measure it.
pub const VOLATILITY_SENTINEL: f64 = 999.0;
/// Flat composite bonus for ETFs when ETF preference is on.
const ETF_BONUS: f64 = 0.10;
/// Concurrent history downloads.
const FETCH_CONCURRENCY: usize = 4;

// Composite weights.
const W_RETURN_90D: f64 = 0.30;
const W_SHARPE: f64 = 0.25;
const W_RETURN_30D: f64 = 0.20;
const W_VOLUME: f64 = 0.15;
const W_LOW_VOL: f64 = 0.10;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub struct PickerConfig {
    pub lookback_days: u32,
    pub min_avg_volume: f64,
    pub min_market_cap_millions: f64,
    pub sector_diversity: bool,
    pub max_per_sector: usize,
    pub prefer_etfs: bool,
    pub risk_free_rate: f64,
}

impl Default for PickerConfig {
    fn default() -> Self {
        Self {
            lookback_days: 90,
            min_avg_volume: 100_000.0,
            min_market_cap_millions: 500.0,
            sector_diversity: true,
            max_per_sector: 2,
            prefer_etfs: true,
            risk_free_rate: 0.04,
        }
    }
}

impl From<&StockPickerConfig> for PickerConfig {
    fn from(cfg: &StockPickerConfig) -> Self {
        Self {
            lookback_days: cfg.lookback_days,
            min_avg_volume: cfg.min_avg_volume,
            min_market_cap_millions: cfg.min_market_cap_millions,
            sector_diversity: cfg.sector_diversity,
            max_per_sector: cfg.max_per_sector,
            prefer_etfs: cfg.prefer_etfs,
            risk_free_rate: cfg.risk_free_rate,
        }
    }
}

// ---------------------------------------------------------------------------
// Picker
// ---------------------------------------------------------------------------

pub struct StockPicker {
    source: Arc<dyn MarketDataSource>,
    candidates: Vec<Candidate>,
    config: PickerConfig,
}

impl StockPicker {
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        candidates: Vec<Candidate>,
        config: PickerConfig,
    ) -> Self {
        Self {
            source,
            candidates,
            config,
        }
    }

    /// Score the universe and return at most `num_picks` symbols, best first.
    ///
    /// An empty result means nothing survived the filters; the caller
    /// should abort the run rather than rebalance into cash.
    pub async fn pick_stocks(&self, num_picks: usize) -> Vec<StockScore> {
        info!(
            num_picks,
            universe = self.candidates.len(),
            lookback_days = self.config.lookback_days,
            "Picking stocks"
        );

        let lookback = self.config.lookback_days;
        let histories: Vec<(&Candidate, anyhow::Result<Vec<DailyBar>>)> =
            stream::iter(self.candidates.iter())
                .map(|c| async move { (c, self.source.daily_bars(&c.symbol, lookback).await) })
                .buffered(FETCH_CONCURRENCY)
                .collect()
                .await;

        let mut scores = Vec::new();
        for (candidate, history) in histories {
            match history {
                Ok(bars) => {
                    match compute_metrics(candidate, &bars, self.config.risk_free_rate) {
                        Some(score) => scores.push(score),
                        None => warn!(
                            symbol = %candidate.symbol,
                            bars = bars.len(),
                            "Not enough history, skipping"
                        ),
                    }
                }
                Err(e) => warn!(symbol = %candidate.symbol, error = %e, "No market data, skipping"),
            }
        }
        info!(with_data = scores.len(), universe = self.candidates.len(), "Computed metrics");

        let scores = apply_filters(
            scores,
            self.config.min_avg_volume,
            self.config.min_market_cap_millions,
        );
        if scores.is_empty() {
            error!("No securities passed filters");
            return Vec::new();
        }

        let mut scores = rank_and_score(scores, self.config.prefer_etfs);
        scores.sort_by(|a, b| {
            b.composite_score
                .partial_cmp(&a.composite_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        if self.config.sector_diversity {
            scores = apply_sector_diversity(scores, self.config.max_per_sector);
        }

        scores.truncate(num_picks);
        info!(selected = scores.len(), "Selected stocks");
        for (i, s) in scores.iter().enumerate() {
            info!(rank = i + 1, pick = %s, "Pick");
        }
        scores
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Per-symbol metrics from daily history. `None` with fewer than two usable
/// bars or a non-positive first close.
pub fn compute_metrics(
    candidate: &Candidate,
    bars: &[DailyBar],
    risk_free_rate: f64,
) -> Option<StockScore> {
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    if closes.len() < 2 {
        return None;
    }

    let first = closes[0];
    let last = closes[closes.len() - 1];
    if first <= 0.0 {
        return None;
    }

    let return_90d = last / first - 1.0;

    let idx_30d = closes.len().saturating_sub(BARS_30D);
    let base_30d = closes[idx_30d];
    let return_30d = if base_30d > 0.0 {
        last / base_30d - 1.0
    } else {
        0.0
    };

    let daily_returns: Vec<f64> = closes
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| w[1] / w[0] - 1.0)
        .collect();
    let volatility = if daily_returns.len() > 1 {
        sample_std(&daily_returns) * TRADING_DAYS.sqrt()
    } else {
        VOLATILITY_SENTINEL
    };

    let annualized = return_90d * (365.0 / 90.0);
    let sharpe_ratio = if volatility > 0.0 {
        (annualized - risk_free_rate) / volatility
    } else {
        0.0
    };

    let average_volume = bars.iter().map(|b| b.volume).sum::<f64>() / bars.len() as f64;

    Some(StockScore {
        symbol: candidate.symbol.clone(),
        sector: candidate.sector.clone(),
        average_volume,
        return_90d,
        return_30d,
        volatility,
        sharpe_ratio,
        composite_score: 0.0,
        is_etf: candidate.is_etf,
        market_cap_millions: candidate.market_cap_millions,
    })
}

fn sample_std(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    var.sqrt()
}

/// Drop stocks with a known market cap under the floor (ETFs and unknown
/// caps pass), then symbols trading below the average volume floor.
pub fn apply_filters(
    scores: Vec<StockScore>,
    min_avg_volume: f64,
    min_market_cap_millions: f64,
) -> Vec<StockScore> {
    let before = scores.len();
    let kept: Vec<StockScore> = scores
        .into_iter()
        .filter(|s| {
            let small = !s.is_etf
                && s.market_cap_millions > 0.0
                && s.market_cap_millions < min_market_cap_millions;
            if small {
                debug!(
                    symbol = %s.symbol,
                    market_cap = format!("{:.0}M", s.market_cap_millions),
                    floor = format!("{:.0}M", min_market_cap_millions),
                    "Filtered: small market cap"
                );
                return false;
            }
            let keep = s.average_volume >= min_avg_volume;
            if !keep {
                debug!(
                    symbol = %s.symbol,
                    avg_volume = format!("{:.0}", s.average_volume),
                    floor = format!("{:.0}", min_avg_volume),
                    "Filtered: low volume"
                );
            }
            keep
        })
        .collect();
    info!(passed = kept.len(), total = before, "Applied filters");
    kept
}

// ---------------------------------------------------------------------------
// Ranking
// ---------------------------------------------------------------------------

/// Position of each value in an ascending stable sort, scaled to 0..=1.
/// Equal values keep their input order.
pub fn fractional_ranks(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        values[a]
            .partial_cmp(&values[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let denom = n.saturating_sub(1).max(1) as f64;
    let mut ranks = vec![0.0; n];
    for (pos, idx) in order.into_iter().enumerate() {
        ranks[idx] = pos as f64 / denom;
    }
    ranks
}

/// Fill in `composite_score` from the factor ranks. Order is preserved.
pub fn rank_and_score(mut scores: Vec<StockScore>, prefer_etfs: bool) -> Vec<StockScore> {
    if scores.is_empty() {
        return scores;
    }

    let column = |f: fn(&StockScore) -> f64| -> Vec<f64> { scores.iter().map(f).collect() };
    let r90 = fractional_ranks(&column(|s| s.return_90d));
    let sharpe = fractional_ranks(&column(|s| s.sharpe_ratio));
    let r30 = fractional_ranks(&column(|s| s.return_30d));
    let volume = fractional_ranks(&column(|s| s.average_volume));
    let low_vol = fractional_ranks(&column(|s| -s.volatility));

    for (i, s) in scores.iter_mut().enumerate() {
        let mut composite = W_RETURN_90D * r90[i]
            + W_SHARPE * sharpe[i]
            + W_RETURN_30D * r30[i]
            + W_VOLUME * volume[i]
            + W_LOW_VOL * low_vol[i];
        if prefer_etfs && s.is_etf {
            composite += ETF_BONUS;
        }
        s.composite_score = composite;
    }
    scores
}

/// Keep at most `max_per_sector` symbols per sector, walking in the given
/// (score) order.
pub fn apply_sector_diversity(scores: Vec<StockScore>, max_per_sector: usize) -> Vec<StockScore> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    scores
        .into_iter()
        .filter(|s| {
            let count = counts.entry(s.sector.clone()).or_insert(0);
            if *count < max_per_sector {
                *count += 1;
                true
            } else {
                debug!(symbol = %s.symbol, sector = %s.sector, already = *count, "Sector cap reached");
                false
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
