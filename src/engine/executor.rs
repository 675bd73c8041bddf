//! Order execution.
//!
//! Submits sells before buys so that sale proceeds fund the purchases,
//! gated by per-order validation, a daily trade cap and the sliding-window
//! rate limiter. A failed order is logged and the run moves on; the daily
//! counter only counts orders the broker accepted.

use chrono::{Local, NaiveDate};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::rate_limiter::RateLimiter;
use crate::broker::OrderSink;
use crate::config::AppConfig;
use crate::types::{BrokerError, OrderRequest, OrderResponse};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub struct ExecutorConfig {
    pub max_single_trade: f64,
    pub max_daily_trades: u32,
    /// Pause between the sell and buy phases.
    pub phase_pause: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_single_trade: 5000.0,
            max_daily_trades: 20,
            phase_pause: Duration::from_secs(5),
        }
    }
}

impl From<&AppConfig> for ExecutorConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            max_single_trade: cfg.safety.max_single_trade_cad,
            max_daily_trades: cfg.safety.max_daily_trades,
            phase_pause: Duration::from_secs(cfg.safety.phase_pause_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

/// Totals for the most recent `execute_orders` call. Only the daily trade
/// count carries over between calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionSummary {
    pub total: usize,
    /// Orders whose status is anything but "rejected".
    pub successful: usize,
    pub failed: usize,
    pub daily_trades_used: u32,
}

impl std::fmt::Display for ExecutionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} orders ({} ok, {} rejected), {} trades used today",
            self.total, self.successful, self.failed, self.daily_trades_used
        )
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

struct ExecutionState {
    day: NaiveDate,
    daily_trades: u32,
    /// Responses of the current call only.
    executed: Vec<OrderResponse>,
}

impl ExecutionState {
    /// Reset the daily counter when the calendar date changes.
    fn roll_to(&mut self, today: NaiveDate) {
        if today != self.day {
            info!(
                previous = %self.day,
                today = %today,
                trades = self.daily_trades,
                "New trading day, resetting daily trade count"
            );
            self.day = today;
            self.daily_trades = 0;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Sell,
    Buy,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Sell => write!(f, "sell"),
            Phase::Buy => write!(f, "buy"),
        }
    }
}

/// Why a phase stopped early.
enum Halt {
    DailyCap,
    Cancelled,
}

pub struct OrderExecutor {
    sink: Arc<dyn OrderSink>,
    limiter: Arc<RateLimiter>,
    config: ExecutorConfig,
    state: Mutex<ExecutionState>,
}

impl OrderExecutor {
    pub fn new(sink: Arc<dyn OrderSink>, limiter: Arc<RateLimiter>, config: ExecutorConfig) -> Self {
        Self {
            sink,
            limiter,
            config,
            state: Mutex::new(ExecutionState {
                day: Local::now().date_naive(),
                daily_trades: 0,
                executed: Vec::new(),
            }),
        }
    }

    /// Submit sells, pause, then submit buys. Returns the broker responses
    /// of this call in submission order.
    ///
    /// Hitting the daily cap stops the current phase; the buy phase still
    /// checks the cap itself. On cancellation the responses gathered so far
    /// are returned; an order already sent is allowed to finish.
    pub async fn execute_orders(
        &self,
        sells: &[OrderRequest],
        buys: &[OrderRequest],
        cancel: &CancellationToken,
    ) -> Vec<OrderResponse> {
        {
            let mut state = self.state.lock().await;
            state.roll_to(Local::now().date_naive());
            state.executed.clear();
        }

        let mut results = Vec::new();

        info!(count = sells.len(), "Executing sell orders");
        let halt = self.run_phase(Phase::Sell, sells, cancel, &mut results).await;

        let proceed = !matches!(halt, Some(Halt::Cancelled));
        if proceed && !sells.is_empty() && !buys.is_empty() {
            info!(secs = self.config.phase_pause.as_secs(), "Pausing between sells and buys");
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(self.config.phase_pause) => {}
            }
        }

        if proceed && !cancel.is_cancelled() {
            info!(count = buys.len(), "Executing buy orders");
            self.run_phase(Phase::Buy, buys, cancel, &mut results).await;
        } else if !buys.is_empty() {
            warn!(skipped_buys = buys.len(), "Execution cancelled before buy phase");
        }

        self.state.lock().await.executed.extend(results.iter().cloned());
        info!(
            executed = results.len(),
            requested = sells.len() + buys.len(),
            "Execution complete"
        );
        results
    }

    async fn run_phase(
        &self,
        phase: Phase,
        orders: &[OrderRequest],
        cancel: &CancellationToken,
        results: &mut Vec<OrderResponse>,
    ) -> Option<Halt> {
        for order in orders {
            if cancel.is_cancelled() {
                warn!(%phase, "Cancelled, stopping phase");
                return Some(Halt::Cancelled);
            }

            let used = self.state.lock().await.daily_trades;
            if used >= self.config.max_daily_trades {
                warn!(
                    %phase,
                    limit = self.config.max_daily_trades,
                    "Daily trade limit reached, stopping phase"
                );
                return Some(Halt::DailyCap);
            }

            if !self.validate(order) {
                continue;
            }

            if let Err(BrokerError::Cancelled) = self.limiter.acquire(cancel).await {
                warn!(%phase, symbol = %order.symbol, "Cancelled while rate limited");
                return Some(Halt::Cancelled);
            }

            match self.sink.place_order(order).await {
                Ok(resp) => {
                    self.state.lock().await.daily_trades += 1;
                    info!(
                        order = %order,
                        order_id = %resp.order_id,
                        status = %resp.status,
                        "Order executed"
                    );
                    results.push(resp);
                }
                Err(e) => {
                    error!(symbol = %order.symbol, error = %e, "Order failed");
                }
            }
        }
        None
    }

    /// Per-order safety checks. Failing orders are skipped, not fatal.
    fn validate(&self, order: &OrderRequest) -> bool {
        let value = order.trade_value();
        if value > self.config.max_single_trade {
            warn!(
                symbol = %order.symbol,
                value = format!("${:.2}", value),
                max = format!("${:.2}", self.config.max_single_trade),
                "Order exceeds single trade cap, skipping"
            );
            return false;
        }
        if order.quantity < 1 {
            warn!(symbol = %order.symbol, quantity = order.quantity, "Invalid quantity, skipping");
            return false;
        }
        true
    }

    pub async fn summary(&self) -> ExecutionSummary {
        let state = self.state.lock().await;
        let total = state.executed.len();
        let successful = state.executed.iter().filter(|o| !o.is_rejected()).count();
        ExecutionSummary {
            total,
            successful,
            failed: total - successful,
            daily_trades_used: state.daily_trades,
        }
    }

    pub async fn daily_trades_used(&self) -> u32 {
        self.state.lock().await.daily_trades
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
