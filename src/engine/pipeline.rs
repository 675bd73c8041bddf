//! One rebalancing run, end to end.
//!
//! authenticate → account → positions and cash → pick stocks → resolve ids
//! and quotes → targets → orders → confirm and execute (live) or simulate
//! (dry run).
//!
//! A failing step aborts the run and is reported in the `RunReport`; nothing
//! is returned to the caller as an error. Cancellation is checked around
//! every network step. Orders already submitted when a run is cancelled are
//! reported and never resubmitted.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::executor::{ExecutionSummary, OrderExecutor};
use super::simulator::{DryRunSimulator, SimulatedTrade};
use crate::broker::auth::TokenManager;
use crate::broker::securities::SecurityResolver;
use crate::broker::{account_by_type, AccountSource, SecuritySource};
use crate::config::AppConfig;
use crate::strategy::{Rebalancer, StockPicker};
use crate::types::{OrderRequest, OrderResponse, PortfolioSummary, StockScore};

/// Literal answer required to go ahead with live orders.
const CONFIRM_WORD: &str = "YES";

// ---------------------------------------------------------------------------
// Confirmation
// ---------------------------------------------------------------------------

/// Human sign-off before live orders go out.
#[async_trait]
pub trait Confirmation: Send + Sync {
    async fn confirm(&self, sells: &[OrderRequest], buys: &[OrderRequest]) -> bool;
}

/// Prints the order lists and asks for `YES` on the terminal.
pub struct ConsoleConfirmation;

#[async_trait]
impl Confirmation for ConsoleConfirmation {
    async fn confirm(&self, sells: &[OrderRequest], buys: &[OrderRequest]) -> bool {
        let mut lines = vec![
            String::new(),
            "!".repeat(60),
            "  WARNING: LIVE TRADING MODE".to_string(),
            "!".repeat(60),
            format!("  Sell orders: {}", sells.len()),
        ];
        lines.extend(sells.iter().map(|o| format!("    {o}")));
        lines.push(format!("  Buy orders: {}", buys.len()));
        lines.extend(buys.iter().map(|o| format!("    {o}")));

        let answer = tokio::task::spawn_blocking(move || {
            println!("{}", lines.join("\n"));
            dialoguer::Input::<String>::new()
                .with_prompt(format!("Type '{CONFIRM_WORD}' to proceed"))
                .allow_empty(true)
                .interact_text()
        })
        .await;

        match answer {
            Ok(Ok(text)) => text.trim() == CONFIRM_WORD,
            Ok(Err(e)) => {
                warn!(error = %e, "Confirmation prompt failed");
                false
            }
            Err(e) => {
                warn!(error = %e, "Confirmation task failed");
                false
            }
        }
    }
}

/// Fixed answer, for unattended runs and tests.
pub struct StaticConfirmation(pub bool);

#[async_trait]
impl Confirmation for StaticConfirmation {
    async fn confirm(&self, _sells: &[OrderRequest], _buys: &[OrderRequest]) -> bool {
        self.0
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed,
    Aborted { reason: String },
    Cancelled,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Completed => write!(f, "completed"),
            RunOutcome::Aborted { reason } => write!(f, "aborted: {reason}"),
            RunOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Everything one run produced, including partial results of an aborted
/// or cancelled run.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    pub outcome: RunOutcome,
    pub live: bool,
    pub picks: Vec<StockScore>,
    pub portfolio: Option<PortfolioSummary>,
    pub sells: Vec<OrderRequest>,
    pub buys: Vec<OrderRequest>,
    pub executed: Vec<OrderResponse>,
    pub execution: Option<ExecutionSummary>,
    pub simulated: Vec<SimulatedTrade>,
    /// Plain-text dry-run report.
    pub simulation_report: Option<String>,
}

impl RunReport {
    fn new(live: bool) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            outcome: RunOutcome::Completed,
            live,
            picks: Vec::new(),
            portfolio: None,
            sells: Vec::new(),
            buys: Vec::new(),
            executed: Vec::new(),
            execution: None,
            simulated: Vec::new(),
            simulation_report: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }
}

/// Why the step sequence stopped early.
enum Stop {
    Abort(String),
    Cancelled,
}

fn abort(reason: impl Into<String>) -> Stop {
    Stop::Abort(reason.into())
}

/// Race a step against cancellation.
async fn cancellable<T>(cancel: &CancellationToken, step: impl Future<Output = T>) -> Result<T, Stop> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Stop::Cancelled),
        value = step => Ok(value),
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct PipelineConfig {
    pub account_type: String,
    pub num_picks: usize,
    /// Live only when config and the command line both ask for it.
    pub live: bool,
}

impl PipelineConfig {
    pub fn from_app(cfg: &AppConfig, live_flag: bool) -> Self {
        Self {
            account_type: cfg.trading.account_type.clone(),
            num_picks: cfg.stock_picker.num_picks,
            live: cfg.is_live_mode() && live_flag,
        }
    }
}

/// Broker capabilities the pipeline talks to.
pub struct BrokerHandles {
    pub tokens: Arc<TokenManager>,
    pub accounts: Arc<dyn AccountSource>,
    pub securities: Arc<dyn SecuritySource>,
}

pub struct TradingPipeline {
    config: PipelineConfig,
    broker: BrokerHandles,
    picker: StockPicker,
    rebalancer: Rebalancer,
    executor: Arc<OrderExecutor>,
    confirmation: Box<dyn Confirmation>,
    simulator: Mutex<DryRunSimulator>,
}

impl TradingPipeline {
    pub fn new(
        config: PipelineConfig,
        broker: BrokerHandles,
        picker: StockPicker,
        rebalancer: Rebalancer,
        executor: Arc<OrderExecutor>,
        confirmation: Box<dyn Confirmation>,
    ) -> Self {
        Self {
            config,
            broker,
            picker,
            rebalancer,
            executor,
            confirmation,
            simulator: Mutex::new(DryRunSimulator::new()),
        }
    }

    pub fn is_live(&self) -> bool {
        self.config.live
    }

    /// Run the whole pipeline once. Never fails; see `RunReport::outcome`.
    pub async fn run_once(&self, cancel: &CancellationToken) -> RunReport {
        let mut report = RunReport::new(self.config.live);
        let mode = if self.config.live { "LIVE" } else { "DRY RUN" };
        info!(run_id = %report.run_id, mode, "Trading pipeline start");

        report.outcome = match self.run_steps(cancel, &mut report).await {
            Ok(()) => RunOutcome::Completed,
            Err(Stop::Abort(reason)) => {
                error!(reason = %reason, "Pipeline aborted");
                RunOutcome::Aborted { reason }
            }
            Err(Stop::Cancelled) => {
                warn!(executed = report.executed.len(), "Pipeline cancelled");
                RunOutcome::Cancelled
            }
        };

        info!(run_id = %report.run_id, outcome = %report.outcome, "Trading pipeline finished");
        report
    }

    async fn run_steps(&self, cancel: &CancellationToken, report: &mut RunReport) -> Result<(), Stop> {
        // 1. Authenticate
        info!("Step 1: authenticating");
        cancellable(cancel, self.broker.tokens.ensure_authenticated())
            .await?
            .map_err(|e| abort(format!("authentication failed: {e}")))?;

        // 2. Account, positions, cash
        info!("Step 2: fetching account and positions");
        let accounts = cancellable(cancel, self.broker.accounts.accounts())
            .await?
            .map_err(|e| abort(format!("account lookup failed: {e}")))?;
        let account = account_by_type(&accounts, &self.config.account_type)
            .cloned()
            .ok_or_else(|| abort(format!("account type '{}' not found", self.config.account_type)))?;

        let positions = cancellable(cancel, self.broker.accounts.positions(&account.id))
            .await?
            .map_err(|e| abort(format!("position lookup failed: {e}")))?;
        let cash = account.buying_power.amount;
        let positions_value: f64 = positions.iter().map(|p| p.market_value).sum();
        info!(
            account_type = %account.account_type,
            cash = format!("${:.2}", cash),
            positions = positions.len(),
            total = format!("${:.2}", cash + positions_value),
            "Account loaded"
        );

        // 3. Pick stocks
        info!("Step 3: running stock picker");
        let picks = cancellable(cancel, self.picker.pick_stocks(self.config.num_picks)).await?;
        if picks.is_empty() {
            return Err(abort("stock picker returned no picks"));
        }
        report.picks = picks.clone();
        let symbols: Vec<String> = picks.iter().map(|p| p.symbol.clone()).collect();
        info!(selected = %symbols.join(", "), "Basket selected");

        // 4. Security ids and quotes, cached for this run only
        info!("Step 4: resolving security ids and prices");
        let resolver = SecurityResolver::new(self.broker.securities.clone());
        let security_ids = cancellable(cancel, resolver.bulk_resolve(&symbols)).await?;
        let prices = cancellable(cancel, resolver.bulk_quotes(&symbols)).await?;

        // 5. Targets and orders
        info!("Step 5: calculating targets");
        let summary = self
            .rebalancer
            .calculate_targets(&picks, &positions, cash, &prices, &security_ids);
        if summary.total_value <= 0.0 {
            return Err(abort(format!(
                "portfolio value is zero or negative (${:.2})",
                summary.total_value
            )));
        }
        info!(portfolio = %summary, "Portfolio targets");
        let (sells, buys) = self.rebalancer.generate_orders(&summary);
        report.portfolio = Some(summary.clone());
        report.sells = sells.clone();
        report.buys = buys.clone();

        // 6. Execute or simulate
        if self.config.live {
            info!("Step 6: live execution");
            if sells.is_empty() && buys.is_empty() {
                info!("No orders to place");
                return Ok(());
            }
            let approved = cancellable(cancel, self.confirmation.confirm(&sells, &buys)).await?;
            if !approved {
                return Err(abort("live trading not confirmed"));
            }
            report.executed = self.executor.execute_orders(&sells, &buys, cancel).await;
            let execution = self.executor.summary().await;
            info!(summary = %execution, "Execution summary");
            report.execution = Some(execution);
            if cancel.is_cancelled() {
                return Err(Stop::Cancelled);
            }
        } else {
            info!("Step 6: dry-run simulation");
            let mut quotes = prices;
            for pos in &positions {
                if pos.current_price > 0.0 {
                    quotes.entry(pos.symbol.clone()).or_insert(pos.current_price);
                }
            }
            let mut simulator = self.simulator.lock().await;
            report.simulated = simulator.simulate_orders(&sells, &buys, cash, &quotes).to_vec();
            let text = simulator.report(&summary);
            println!("{text}");
            report.simulation_report = Some(text);
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
