//! Broker HTTP layer against the fake broker: login, token handling,
//! 401 recovery and the wire shapes of each endpoint.

use secrecy::SecretString;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use rebalance_bot::broker::account::AccountService;
use rebalance_bot::broker::auth::{Authenticator, TokenManager, TokenPolicy};
use rebalance_bot::broker::client::{http_client, BrokerClient};
use rebalance_bot::broker::orders::OrderService;
use rebalance_bot::broker::securities::{SecurityResolver, SecurityService};
use rebalance_bot::broker::{account_by_type, pending_orders, AccountSource, OrderSink};
use rebalance_bot::config::Credentials;
use rebalance_bot::types::{BrokerError, OrderKind, OrderRequest, OrderSide};

use crate::fake_broker::{
    account_record, position_record, security_record, BrokerState, FakeBroker, EMAIL,
    OTP_SECRET, PASSWORD,
};

fn credentials(with_otp: bool) -> Credentials {
    Credentials {
        email: EMAIL.to_string(),
        password: SecretString::new(PASSWORD.to_string()),
        otp_secret: with_otp.then(|| SecretString::new(OTP_SECRET.to_string())),
    }
}

pub fn connect(broker: &FakeBroker, with_otp: bool) -> (Arc<TokenManager>, Arc<BrokerClient>) {
    let http = http_client(Duration::from_secs(5)).unwrap();
    let authenticator = Authenticator::new(http.clone(), &broker.base_url, credentials(with_otp));
    let tokens = Arc::new(TokenManager::new(
        Box::new(authenticator),
        TokenPolicy::default(),
    ));
    let client = Arc::new(BrokerClient::new(http, &broker.base_url, tokens.clone()));
    (tokens, client)
}

fn tfsa_state() -> BrokerState {
    BrokerState {
        accounts: vec![
            account_record("rrsp-1", "ca_rrsp", 50.0),
            account_record("tfsa-1", "ca_tfsa", 1000.0),
        ],
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Login
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_login_with_otp() {
    let broker = FakeBroker::start(BrokerState {
        require_otp: true,
        ..Default::default()
    })
    .await;
    let (tokens, _) = connect(&broker, true);

    let token = tokens.get_valid_token().await.unwrap();
    assert_eq!(token, "access-1");
    // First attempt without a code is refused, second carries the OTP.
    broker.with(|st| {
        assert_eq!(st.login_attempts, 2);
        assert_eq!(st.logins, 1);
    });
}

#[tokio::test]
async fn test_login_requiring_otp_without_secret_fails() {
    let broker = FakeBroker::start(BrokerState {
        require_otp: true,
        ..Default::default()
    })
    .await;
    let (tokens, _) = connect(&broker, false);

    let err = tokens.get_valid_token().await.unwrap_err();
    assert!(err.is_auth(), "{err}");
    assert!(!tokens.is_authenticated().await);
}

#[tokio::test]
async fn test_tokens_read_from_body() {
    let broker = FakeBroker::start(BrokerState {
        tokens_in_body: true,
        ..Default::default()
    })
    .await;
    let (tokens, _) = connect(&broker, false);

    assert_eq!(tokens.get_valid_token().await.unwrap(), "access-1");
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_authorization_header_is_raw_token() {
    let broker = FakeBroker::start(tfsa_state()).await;
    let (_, client) = connect(&broker, false);

    let accounts = AccountService::new(client).accounts().await.unwrap();
    assert_eq!(accounts.len(), 2);
    broker.with(|st| assert_eq!(st.auth_headers, vec!["access-1".to_string()]));
}

#[tokio::test]
async fn test_401_relogs_in_and_retries_once() {
    let broker = FakeBroker::start(tfsa_state()).await;
    let (tokens, client) = connect(&broker, false);
    tokens.ensure_authenticated().await.unwrap();
    broker.with(|st| st.reject_next = 1);

    let accounts = AccountService::new(client).accounts().await.unwrap();
    assert_eq!(accounts.len(), 2);
    broker.with(|st| {
        assert_eq!(st.logins, 2);
        assert_eq!(st.auth_headers, vec!["access-1".to_string(), "access-2".to_string()]);
    });
}

#[tokio::test]
async fn test_second_401_surfaces_as_api_error() {
    let broker = FakeBroker::start(tfsa_state()).await;
    let (tokens, client) = connect(&broker, false);
    tokens.ensure_authenticated().await.unwrap();
    broker.with(|st| st.reject_next = 2);

    let err = AccountService::new(client).accounts().await.unwrap_err();
    assert!(matches!(err, BrokerError::Api { status: 401, .. }), "{err}");
    // Exactly one re-login, no further retries.
    broker.with(|st| {
        assert_eq!(st.logins, 2);
        assert_eq!(st.auth_headers.len(), 2);
    });
}

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_account_and_positions() {
    let mut state = tfsa_state();
    state.positions = vec![
        position_record("sec-s-ry", "RY", 4.0, 150.0),
        json!({ "id": "broken", "quantity": 1 }),
    ];
    let broker = FakeBroker::start(state).await;
    let (_, client) = connect(&broker, false);
    let service = AccountService::new(client);

    let accounts = service.accounts().await.unwrap();
    let tfsa = account_by_type(&accounts, "ca_tfsa").unwrap();
    assert_eq!(tfsa.buying_power.amount, 1000.0);

    // The record without a symbol is skipped.
    let positions = service.positions(&tfsa.id).await.unwrap();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].symbol, "RY");
    assert_eq!(positions[0].market_value, 600.0);
}

#[tokio::test]
async fn test_security_lookup_strips_exchange_suffix() {
    let mut state = BrokerState::default();
    state.securities.insert(
        "RY".into(),
        vec![
            security_record("sec-s-rya", "RY.PR.A", 25.0),
            security_record("sec-s-ry", "RY", 150.0),
        ],
    );
    let broker = FakeBroker::start(state).await;
    let (_, client) = connect(&broker, false);
    let resolver = SecurityResolver::new(Arc::new(SecurityService::new(client)));

    let sec = resolver.lookup("RY.TO").await.unwrap().unwrap();
    assert_eq!(sec.id, "sec-s-ry");
    assert_eq!(resolver.quote("RY.TO").await.unwrap(), 150.0);
    assert!(resolver.lookup("NOPE.TO").await.unwrap().is_none());
}

#[tokio::test]
async fn test_order_payload_on_the_wire() {
    let broker = FakeBroker::start(BrokerState::default()).await;
    let (_, client) = connect(&broker, false);
    let service = OrderService::new(client);

    let order = OrderRequest {
        security_id: "sec-s-ry".into(),
        symbol: "RY.TO".into(),
        quantity: 3,
        side: OrderSide::Buy,
        kind: OrderKind::Limit,
        limit_price: 123.456,
    };
    let resp = service.place_order(&order).await.unwrap();

    assert_eq!(resp.order_id, "order-1");
    assert_eq!(resp.symbol, "RY.TO");
    assert_eq!(resp.status, "submitted");
    assert_eq!(resp.limit_price, Some(123.46));
    broker.with(|st| {
        assert_eq!(
            st.placed[0],
            json!({
                "security_id": "sec-s-ry",
                "quantity": 3,
                "order_type": "buy_quantity",
                "order_sub_type": "limit",
                "limit_price": 123.46,
                "time_in_force": "day"
            })
        );
    });
}

#[tokio::test]
async fn test_refused_order_is_api_error() {
    let broker = FakeBroker::start(BrokerState {
        refuse_orders_for: vec!["sec-s-td".into()],
        ..Default::default()
    })
    .await;
    let (_, client) = connect(&broker, false);

    let order = OrderRequest {
        security_id: "sec-s-td".into(),
        symbol: "TD.TO".into(),
        quantity: 1,
        side: OrderSide::Sell,
        kind: OrderKind::Limit,
        limit_price: 80.0,
    };
    let err = OrderService::new(client).place_order(&order).await.unwrap_err();
    match err {
        BrokerError::Api { status, body } => {
            assert_eq!(status, 422);
            assert!(body.contains("buying power"));
        }
        other => panic!("unexpected error {other}"),
    }
}

#[tokio::test]
async fn test_pending_orders_and_cancel() {
    let broker = FakeBroker::start(BrokerState {
        orders: vec![
            json!({ "order_id": "order-7", "security_id": "a", "quantity": "2", "status": "submitted" }),
            json!({ "order_id": "order-8", "security_id": "b", "quantity": 1, "status": "filled" }),
            json!({ "id": "order-9", "security_id": "c", "quantity": 1, "status": "cancelled" }),
        ],
        ..Default::default()
    })
    .await;
    let (_, client) = connect(&broker, false);
    let service = OrderService::new(client);

    let all = service.orders().await.unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[2].order_id, "order-9");

    let pending = pending_orders(&service).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].quantity, 2);

    service.cancel_order("order-7").await.unwrap();
    broker.with(|st| assert_eq!(st.cancelled, vec!["order-7".to_string()]));
}
