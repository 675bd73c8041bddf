//! Broker integration.
//!
//! Defines the capability traits the pipeline depends on and their HTTP
//! implementations over the broker's session-token REST API:
//! - `AccountSource`: accounts and positions
//! - `SecuritySource`: security search (ids and spot quotes)
//! - `OrderSink`: order placement, listing and cancellation
//!
//! Endpoints: `POST /auth/login`, `POST /auth/refresh`, `GET /account/list`,
//! `GET /account/positions`, `GET /securities?query=`, `POST /orders`,
//! `GET /orders`, `DELETE /orders/{id}`.

pub mod account;
pub mod auth;
pub mod client;
pub mod orders;
pub mod securities;
pub mod totp;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};

#[cfg(test)]
use mockall::automock;

use crate::types::{Account, BrokerResult, OrderRequest, OrderResponse, Position, Security};

/// Account and position lookups.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AccountSource: Send + Sync {
    /// All accounts visible to the session. Unparseable records are skipped.
    async fn accounts(&self) -> BrokerResult<Vec<Account>>;

    /// Positions held in one account. Unparseable records are skipped.
    async fn positions(&self, account_id: &str) -> BrokerResult<Vec<Position>>;
}

/// Security search.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecuritySource: Send + Sync {
    /// Raw search results for a query string, in broker order.
    async fn search(&self, query: &str) -> BrokerResult<Vec<Security>>;
}

/// Order submission.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OrderSink: Send + Sync {
    async fn place_order(&self, order: &OrderRequest) -> BrokerResult<OrderResponse>;

    async fn orders(&self) -> BrokerResult<Vec<OrderResponse>>;

    async fn cancel_order(&self, order_id: &str) -> BrokerResult<()>;
}

/// First account of the given type, if any.
pub fn account_by_type<'a>(accounts: &'a [Account], account_type: &str) -> Option<&'a Account> {
    accounts.iter().find(|a| a.account_type == account_type)
}

/// Orders still working at the broker.
pub async fn pending_orders(sink: &dyn OrderSink) -> BrokerResult<Vec<OrderResponse>> {
    let pending: Vec<_> = sink
        .orders()
        .await?
        .into_iter()
        .filter(OrderResponse::is_pending)
        .collect();
    tracing::info!(count = pending.len(), "Found pending orders");
    Ok(pending)
}

// ---------------------------------------------------------------------------
// Lenient numeric fields
// ---------------------------------------------------------------------------

/// The API is inconsistent about numbers: some arrive as JSON strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum NumberLike {
    Number(f64),
    Text(String),
}

pub(crate) fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<NumberLike>::deserialize(deserializer)? {
        None => Ok(0.0),
        Some(NumberLike::Number(n)) => Ok(n),
        Some(NumberLike::Text(s)) if s.trim().is_empty() => Ok(0.0),
        Some(NumberLike::Text(s)) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// `{ "amount": ..., "currency": ... }` money object.
#[derive(Debug, Deserialize, Default)]
pub(crate) struct RawMoney {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub amount: f64,
    #[serde(default)]
    pub currency: Option<String>,
}

/// `{ "results": [...] }` envelope; records stay raw so each can fail alone.
#[derive(Debug, Deserialize, Default)]
pub(crate) struct ResultsEnvelope {
    #[serde(default)]
    pub results: Vec<serde_json::Value>,
}
