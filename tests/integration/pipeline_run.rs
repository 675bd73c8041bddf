//! Full rebalancing runs with the real HTTP broker services pointed at the
//! fake broker and a canned market data source.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use rebalance_bot::broker::account::AccountService;
use rebalance_bot::broker::orders::OrderService;
use rebalance_bot::broker::securities::SecurityService;
use rebalance_bot::config::Candidate;
use rebalance_bot::data::MarketDataSource;
use rebalance_bot::engine::pipeline::{BrokerHandles, PipelineConfig, StaticConfirmation};
use rebalance_bot::engine::{
    ExecutorConfig, OrderExecutor, RateLimiter, RunOutcome, TradingPipeline,
};
use rebalance_bot::strategy::{PickerConfig, Rebalancer, RebalancerConfig, StockPicker};
use rebalance_bot::types::DailyBar;

use crate::broker_http::connect;
use crate::fake_broker::{account_record, position_record, security_record, BrokerState, FakeBroker};

const PICKS: [&str; 3] = ["AAA.TO", "BBB.TO", "CCC.TO"];

/// Steadily rising closes, liquid enough to pass the volume filter.
struct CannedBars;

#[async_trait]
impl MarketDataSource for CannedBars {
    async fn daily_bars(&self, symbol: &str, _lookback_days: u32) -> anyhow::Result<Vec<DailyBar>> {
        if symbol == "BAD.TO" {
            anyhow::bail!("no data for {symbol}");
        }
        let start = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        let step = 0.05 + symbol.len() as f64 * 0.001;
        Ok((0..60)
            .map(|i| {
                let close = 20.0 + step * i as f64;
                DailyBar {
                    date: start + ChronoDuration::days(i),
                    open: close,
                    high: close,
                    low: close,
                    close,
                    volume: 400_000.0,
                }
            })
            .collect())
    }
}

fn broker_state() -> BrokerState {
    let mut state = BrokerState {
        accounts: vec![account_record("tfsa-1", "ca_tfsa", 900.0)],
        positions: vec![position_record("sec-s-old", "OLD", 5.0, 20.0)],
        ..Default::default()
    };
    for symbol in PICKS {
        let bare = symbol.trim_end_matches(".TO");
        state.securities.insert(
            bare.to_string(),
            vec![security_record(&format!("sec-s-{}", bare.to_lowercase()), bare, 30.0)],
        );
    }
    state
}

fn pipeline(broker: &FakeBroker, live: bool, confirm: bool) -> TradingPipeline {
    let (tokens, client) = connect(broker, false);

    let mut candidates: Vec<Candidate> = PICKS
        .iter()
        .enumerate()
        .map(|(i, s)| Candidate {
            symbol: s.to_string(),
            sector: format!("Sector{i}"),
            is_etf: false,
            market_cap_millions: 0.0,
        })
        .collect();
    candidates.push(Candidate {
        symbol: "BAD.TO".into(),
        sector: "Energy".into(),
        is_etf: false,
        market_cap_millions: 0.0,
    });
    let picker = StockPicker::new(Arc::new(CannedBars), candidates, PickerConfig::default());

    let executor = Arc::new(OrderExecutor::new(
        Arc::new(OrderService::new(client.clone())),
        Arc::new(RateLimiter::new(50, Duration::from_secs(3600))),
        ExecutorConfig {
            phase_pause: Duration::ZERO,
            ..Default::default()
        },
    ));

    TradingPipeline::new(
        PipelineConfig {
            account_type: "ca_tfsa".into(),
            num_picks: 3,
            live,
        },
        BrokerHandles {
            tokens,
            accounts: Arc::new(AccountService::new(client.clone())),
            securities: Arc::new(SecurityService::new(client)),
        },
        picker,
        Rebalancer::new(RebalancerConfig::default()),
        executor,
        Box::new(StaticConfirmation(confirm)),
    )
}

#[tokio::test]
async fn test_dry_run_places_nothing() {
    let broker = FakeBroker::start(broker_state()).await;
    let report = pipeline(&broker, false, true)
        .run_once(&CancellationToken::new())
        .await;

    assert!(report.is_completed(), "{}", report.outcome);
    let mut picked: Vec<&str> = report.picks.iter().map(|p| p.symbol.as_str()).collect();
    picked.sort();
    assert_eq!(picked, PICKS);

    assert_eq!(report.sells.len(), 1);
    assert_eq!(report.sells[0].symbol, "OLD");
    assert_eq!(report.buys.len(), 3);
    // Sale proceeds at the held quote fund the buys.
    assert_eq!(report.simulated.len(), 4);
    assert!(report.executed.is_empty());
    broker.with(|st| assert!(st.placed.is_empty()));
}

#[tokio::test]
async fn test_live_run_submits_sells_then_buys() {
    let broker = FakeBroker::start(broker_state()).await;
    let report = pipeline(&broker, true, true)
        .run_once(&CancellationToken::new())
        .await;

    assert!(report.is_completed(), "{}", report.outcome);
    assert_eq!(report.executed.len(), 4);
    let execution = report.execution.unwrap();
    assert_eq!(execution.successful, 4);
    assert_eq!(execution.daily_trades_used, 4);

    broker.with(|st| {
        let sides: Vec<&str> = st
            .placed
            .iter()
            .map(|o| o["order_type"].as_str().unwrap())
            .collect();
        assert_eq!(sides, ["sell_quantity", "buy_quantity", "buy_quantity", "buy_quantity"]);
        assert_eq!(st.placed[0]["security_id"], "sec-s-old");
        assert_eq!(st.placed[0]["quantity"], 5);
        assert!(st.placed.iter().all(|o| o["time_in_force"] == "day"));
    });
}

#[tokio::test]
async fn test_refused_order_does_not_stop_run() {
    let mut state = broker_state();
    state.refuse_orders_for = vec!["sec-s-bbb".into()];
    let broker = FakeBroker::start(state).await;

    let report = pipeline(&broker, true, true)
        .run_once(&CancellationToken::new())
        .await;

    assert!(report.is_completed(), "{}", report.outcome);
    assert_eq!(report.executed.len(), 3);
    assert!(report.executed.iter().all(|o| o.security_id != "sec-s-bbb"));
    broker.with(|st| assert_eq!(st.placed.len(), 4));
}

#[tokio::test]
async fn test_unconfirmed_live_run_aborts() {
    let broker = FakeBroker::start(broker_state()).await;
    let report = pipeline(&broker, true, false)
        .run_once(&CancellationToken::new())
        .await;

    assert!(matches!(report.outcome, RunOutcome::Aborted { .. }));
    assert_eq!(report.buys.len(), 3);
    broker.with(|st| assert!(st.placed.is_empty()));
}

#[tokio::test]
async fn test_missing_account_aborts() {
    let mut state = broker_state();
    state.accounts = vec![account_record("rrsp-1", "ca_rrsp", 900.0)];
    let broker = FakeBroker::start(state).await;

    let report = pipeline(&broker, false, true)
        .run_once(&CancellationToken::new())
        .await;

    match report.outcome {
        RunOutcome::Aborted { reason } => assert!(reason.contains("ca_tfsa"), "{reason}"),
        other => panic!("unexpected outcome {other}"),
    }
    assert!(report.picks.is_empty());
}
