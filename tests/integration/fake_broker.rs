//! In-process fake of the broker REST API.
//!
//! Serves the endpoints the bot uses on an ephemeral localhost port and
//! records every request so tests can assert on what was sent. Tokens are
//! issued as `access-N`; only the most recent one is accepted.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rebalance_bot::broker::totp;

pub const EMAIL: &str = "trader@example.com";
pub const PASSWORD: &str = "hunter2";
pub const OTP_SECRET: &str = "JBSWY3DPEHPK3PXP";

#[derive(Default)]
pub struct BrokerState {
    /// Reject logins without a valid one-time code.
    pub require_otp: bool,
    /// Return tokens in the JSON body instead of response headers.
    pub tokens_in_body: bool,
    /// Answer the next N authenticated requests with 401 regardless of token.
    pub reject_next: u32,
    /// Security ids whose orders are refused with 422.
    pub refuse_orders_for: Vec<String>,

    pub login_attempts: u32,
    pub logins: u32,
    pub refreshes: u32,
    pub current_token: Option<String>,
    pub auth_headers: Vec<String>,

    pub accounts: Vec<Value>,
    pub positions: Vec<Value>,
    /// Search query → result records.
    pub securities: HashMap<String, Vec<Value>>,
    pub orders: Vec<Value>,
    pub placed: Vec<Value>,
    pub cancelled: Vec<String>,
}

pub type Shared = Arc<Mutex<BrokerState>>;

pub struct FakeBroker {
    pub base_url: String,
    pub state: Shared,
}

impl FakeBroker {
    pub async fn start(state: BrokerState) -> Self {
        let state = Arc::new(Mutex::new(state));
        let app = Router::new()
            .route("/auth/login", post(login))
            .route("/auth/refresh", post(refresh))
            .route("/account/list", get(account_list))
            .route("/account/positions", get(account_positions))
            .route("/securities", get(securities))
            .route("/orders", post(place_order).get(list_orders))
            .route("/orders/:id", delete(cancel_order))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake broker");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("fake broker serve");
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut BrokerState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }
}

// ---------------------------------------------------------------------------
// Sample records
// ---------------------------------------------------------------------------

pub fn account_record(id: &str, account_type: &str, cash: f64) -> Value {
    json!({
        "id": id,
        "account_type": account_type,
        "buying_power": { "amount": cash, "currency": "CAD" },
        "current_balance": { "amount": cash, "currency": "CAD" },
        "net_deposits": { "amount": cash, "currency": "CAD" },
        "status": "open"
    })
}

pub fn position_record(security_id: &str, symbol: &str, quantity: f64, price: f64) -> Value {
    json!({
        "id": security_id,
        "stock": { "symbol": symbol, "currency": "CAD" },
        "quote": { "amount": price.to_string() },
        "quantity": quantity,
        "book_value": { "amount": quantity * price },
        "entry_price": { "amount": price }
    })
}

pub fn security_record(security_id: &str, symbol: &str, price: f64) -> Value {
    json!({
        "id": security_id,
        "stock": {
            "symbol": symbol,
            "name": format!("{symbol} Corp"),
            "primary_exchange": "TSX",
            "currency": "CAD",
            "security_type": "equity"
        },
        "quote": { "amount": price, "high": price, "low": price, "volume": 1000000 }
    })
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn otp_matches(code: &str) -> bool {
    let now = chrono::Utc::now().timestamp() as u64;
    [now.saturating_sub(30), now, now + 30]
        .iter()
        .any(|t| totp::code_at(OTP_SECRET, *t).map(|c| c == code).unwrap_or(false))
}

fn issue_tokens(st: &mut BrokerState) -> Response {
    let n = st.logins + st.refreshes;
    let access = format!("access-{n}");
    let refresh = format!("refresh-{n}");
    st.current_token = Some(access.clone());

    if st.tokens_in_body {
        Json(json!({ "access_token": access, "refresh_token": refresh })).into_response()
    } else {
        (
            StatusCode::OK,
            [("X-Access-Token", access), ("X-Refresh-Token", refresh)],
            Json(json!({})),
        )
            .into_response()
    }
}

fn unauthorized(msg: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": msg }))).into_response()
}

/// Record the Authorization header and decide whether the call is allowed.
fn authorize(st: &mut BrokerState, headers: &HeaderMap) -> Result<(), Response> {
    let header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    st.auth_headers.push(header.clone());

    if st.reject_next > 0 {
        st.reject_next -= 1;
        return Err(unauthorized("token expired"));
    }
    if st.current_token.as_deref() != Some(header.as_str()) {
        return Err(unauthorized("invalid token"));
    }
    Ok(())
}

async fn login(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut st = state.lock().unwrap();
    st.login_attempts += 1;

    if body["email"] != EMAIL || body["password"] != PASSWORD {
        return unauthorized("bad credentials");
    }
    if st.require_otp {
        match body.get("otp").and_then(Value::as_str) {
            Some(code) if otp_matches(code) => {}
            _ => return unauthorized("otp required"),
        }
    }

    st.logins += 1;
    issue_tokens(&mut st)
}

async fn refresh(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut st = state.lock().unwrap();
    let valid = body
        .get("refresh_token")
        .and_then(Value::as_str)
        .is_some_and(|t| t.starts_with("refresh-"));
    if !valid {
        return unauthorized("bad refresh token");
    }
    st.refreshes += 1;
    issue_tokens(&mut st)
}

async fn account_list(State(state): State<Shared>, headers: HeaderMap) -> Response {
    let mut st = state.lock().unwrap();
    if let Err(resp) = authorize(&mut st, &headers) {
        return resp;
    }
    Json(json!({ "results": st.accounts })).into_response()
}

async fn account_positions(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let mut st = state.lock().unwrap();
    if let Err(resp) = authorize(&mut st, &headers) {
        return resp;
    }
    if !query.contains_key("account_id") {
        return (StatusCode::BAD_REQUEST, "account_id required").into_response();
    }
    Json(json!({ "results": st.positions })).into_response()
}

async fn securities(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let mut st = state.lock().unwrap();
    if let Err(resp) = authorize(&mut st, &headers) {
        return resp;
    }
    let results = query
        .get("query")
        .and_then(|q| st.securities.get(q))
        .cloned()
        .unwrap_or_default();
    Json(json!({ "results": results })).into_response()
}

async fn place_order(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut st = state.lock().unwrap();
    if let Err(resp) = authorize(&mut st, &headers) {
        return resp;
    }
    st.placed.push(body.clone());

    let security_id = body["security_id"].as_str().unwrap_or_default().to_string();
    if st.refuse_orders_for.contains(&security_id) {
        return (StatusCode::UNPROCESSABLE_ENTITY, "insufficient buying power").into_response();
    }

    let order = json!({
        "order_id": format!("order-{}", st.placed.len()),
        "security_id": security_id,
        "quantity": body["quantity"],
        "order_type": body["order_type"],
        "status": "submitted",
        "limit_price": { "amount": body["limit_price"] },
        "created_at": "2026-10-19T13:35:00Z"
    });
    st.orders.push(order.clone());
    (StatusCode::CREATED, Json(order)).into_response()
}

async fn list_orders(State(state): State<Shared>, headers: HeaderMap) -> Response {
    let mut st = state.lock().unwrap();
    if let Err(resp) = authorize(&mut st, &headers) {
        return resp;
    }
    Json(json!({ "results": st.orders })).into_response()
}

async fn cancel_order(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let mut st = state.lock().unwrap();
    if let Err(resp) = authorize(&mut st, &headers) {
        return resp;
    }
    st.cancelled.push(id);
    StatusCode::NO_CONTENT.into_response()
}
