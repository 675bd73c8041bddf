//! rebalance-bot: equal-weight portfolio rebalancer.
//!
//! Entry point. Loads configuration and credentials, initialises structured
//! logging, wires the broker, strategy and execution components, then either
//! runs the pipeline once or waits for each scheduled run time until Ctrl+C.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use rebalance_bot::broker::account::AccountService;
use rebalance_bot::broker::auth::{Authenticator, TokenManager, TokenPolicy};
use rebalance_bot::broker::client::{http_client, BrokerClient};
use rebalance_bot::broker::orders::OrderService;
use rebalance_bot::broker::securities::SecurityService;
use rebalance_bot::config::{AppConfig, Credentials};
use rebalance_bot::data::yahoo::YahooClient;
use rebalance_bot::engine::pipeline::{
    BrokerHandles, ConsoleConfirmation, PipelineConfig, RunReport,
};
use rebalance_bot::engine::{
    ExecutorConfig, OrderExecutor, RateLimiter, RunOutcome, Schedule, TradingPipeline,
};
use rebalance_bot::strategy::{PickerConfig, Rebalancer, RebalancerConfig, StockPicker};

#[derive(Debug, Parser)]
#[command(name = "rebalance-bot", version, about = "Equal-weight portfolio rebalancing bot")]
struct Cli {
    /// Run the pipeline once and exit (no scheduling)
    #[arg(long)]
    run_once: bool,

    /// Enable live trading (also requires mode = "live" and
    /// live_mode_confirmation = true in settings.toml)
    #[arg(long)]
    live: bool,

    /// Directory holding settings.toml and universe.toml
    #[arg(long, default_value = "config")]
    config_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = AppConfig::load(&cli.config_dir)?;
    init_logging(&cfg);

    let pipeline_cfg = PipelineConfig::from_app(&cfg, cli.live);
    info!(
        mode = if pipeline_cfg.live { "LIVE" } else { "DRY RUN" },
        account_type = %cfg.trading.account_type,
        universe = cfg.universe.len(),
        num_picks = cfg.stock_picker.num_picks,
        "rebalance-bot starting up"
    );
    if cli.live && !pipeline_cfg.live {
        warn!("--live given but settings do not enable live mode; staying in dry run");
    }

    let credentials = Credentials::from_env()?;
    let pipeline = build_pipeline(&cfg, credentials, pipeline_cfg)?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received.");
                cancel.cancel();
            }
        });
    }

    if cli.run_once {
        let report = pipeline.run_once(&cancel).await;
        log_run_report(&report);
        return Ok(());
    }

    let schedule = Schedule::from_config(&cfg.schedule)?;
    info!(schedule = %schedule.describe(), "Entering scheduler. Press Ctrl+C to stop.");

    loop {
        let now = chrono::Utc::now();
        let Some(next) = schedule.next_run_after(now) else {
            error!("No upcoming run time in schedule, exiting");
            break;
        };
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        info!(
            next_run = %next.with_timezone(&schedule.timezone()),
            wait_mins = wait.as_secs() / 60,
            "Waiting for next run"
        );

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        let report = pipeline.run_once(&cancel).await;
        log_run_report(&report);
        if report.outcome == RunOutcome::Cancelled || cancel.is_cancelled() {
            break;
        }
    }

    info!("rebalance-bot shut down cleanly.");
    Ok(())
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

fn build_pipeline(
    cfg: &AppConfig,
    credentials: Credentials,
    pipeline_cfg: PipelineConfig,
) -> Result<TradingPipeline> {
    let http = http_client(Duration::from_secs(cfg.broker.timeout_secs))
        .context("Failed to build HTTP client")?;

    let authenticator = Authenticator::new(http.clone(), &cfg.broker.base_url, credentials);
    let tokens = Arc::new(TokenManager::new(
        Box::new(authenticator),
        TokenPolicy {
            lifetime: Duration::from_secs(cfg.broker.token_lifetime_secs),
            refresh_margin: Duration::from_secs(cfg.broker.refresh_margin_secs),
        },
    ));
    let client = Arc::new(BrokerClient::new(http, &cfg.broker.base_url, tokens.clone()));

    let picker = StockPicker::new(
        Arc::new(YahooClient::new()?),
        cfg.universe.candidates(),
        PickerConfig::from(&cfg.stock_picker),
    );

    let limiter = Arc::new(RateLimiter::new(
        cfg.safety.rate_limit_per_hour,
        Duration::from_secs(cfg.safety.rate_limit_window_seconds),
    ));
    let executor = Arc::new(OrderExecutor::new(
        Arc::new(OrderService::new(client.clone())),
        limiter,
        ExecutorConfig::from(cfg),
    ));

    Ok(TradingPipeline::new(
        pipeline_cfg,
        BrokerHandles {
            tokens,
            accounts: Arc::new(AccountService::new(client.clone())),
            securities: Arc::new(SecurityService::new(client)),
        },
        picker,
        Rebalancer::new(RebalancerConfig::from(cfg)),
        executor,
        Box::new(ConsoleConfirmation),
    ))
}

fn log_run_report(report: &RunReport) {
    let picks: Vec<&str> = report.picks.iter().map(|p| p.symbol.as_str()).collect();
    match &report.outcome {
        RunOutcome::Completed => info!(
            run_id = %report.run_id,
            live = report.live,
            picks = %picks.join(","),
            sells = report.sells.len(),
            buys = report.buys.len(),
            executed = report.executed.len(),
            simulated = report.simulated.len(),
            "Run completed"
        ),
        RunOutcome::Aborted { reason } => {
            error!(run_id = %report.run_id, reason = %reason, "Run aborted")
        }
        RunOutcome::Cancelled => warn!(
            run_id = %report.run_id,
            executed = report.executed.len(),
            "Run cancelled; executed orders are not resubmitted"
        ),
    }
    if let Some(summary) = &report.execution {
        info!(summary = %summary, "Execution summary");
    }
}

/// Initialise the tracing subscriber.
///
/// Uses JSON output when `BOT_LOG_JSON` is set, otherwise human-readable.
/// `RUST_LOG` overrides the level from settings.toml.
fn init_logging(cfg: &AppConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("rebalance_bot={}", cfg.logging.level.to_lowercase()))
    });

    let json_logging = std::env::var("BOT_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
