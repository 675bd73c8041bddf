//! Order endpoints.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::client::BrokerClient;
use super::{lenient_f64, OrderSink, ResultsEnvelope};
use crate::types::{BrokerError, BrokerResult, OrderRequest, OrderResponse};

/// `limit_price` arrives either as a bare number or as a money object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawLimitPrice {
    Money {
        #[serde(deserialize_with = "lenient_f64")]
        amount: f64,
    },
    Plain(#[serde(deserialize_with = "lenient_f64")] f64),
}

#[derive(Debug, Deserialize)]
struct RawOrder {
    #[serde(default)]
    order_id: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    security_id: String,
    #[serde(default)]
    symbol: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    quantity: f64,
    #[serde(default)]
    order_type: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    limit_price: Option<RawLimitPrice>,
    #[serde(default)]
    filled_at: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
}

/// RFC 3339, or a naive ISO timestamp taken as UTC.
fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

pub(crate) fn parse_order(raw: serde_json::Value) -> BrokerResult<OrderResponse> {
    let raw: RawOrder = serde_json::from_value(raw)
        .map_err(|e| BrokerError::Data(format!("order record: {e}")))?;

    let order_id = raw.order_id.or(raw.id).unwrap_or_default();
    let limit_price = raw.limit_price.map(|p| match p {
        RawLimitPrice::Money { amount } => amount,
        RawLimitPrice::Plain(amount) => amount,
    });

    Ok(OrderResponse {
        order_id,
        security_id: raw.security_id,
        symbol: raw.symbol,
        quantity: raw.quantity.max(0.0) as u64,
        order_type: raw.order_type,
        status: raw.status,
        limit_price,
        filled_at: parse_timestamp(raw.filled_at.as_deref()),
        created_at: parse_timestamp(raw.created_at.as_deref()),
    })
}

/// HTTP `OrderSink`.
pub struct OrderService {
    client: Arc<BrokerClient>,
}

impl OrderService {
    pub fn new(client: Arc<BrokerClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OrderSink for OrderService {
    async fn place_order(&self, order: &OrderRequest) -> BrokerResult<OrderResponse> {
        info!(
            side = %order.side,
            quantity = order.quantity,
            symbol = %order.symbol,
            limit_price = format!("${:.2}", order.limit_price),
            "Placing order"
        );
        let raw: serde_json::Value = self.client.post("/orders", &order.to_payload()).await?;
        let mut resp = parse_order(raw)?;
        if resp.symbol.is_empty() {
            resp.symbol = order.symbol.clone();
        }
        Ok(resp)
    }

    async fn orders(&self) -> BrokerResult<Vec<OrderResponse>> {
        let envelope: ResultsEnvelope = self.client.get("/orders", &[]).await?;
        let mut orders = Vec::with_capacity(envelope.results.len());
        for raw in envelope.results {
            match parse_order(raw) {
                Ok(order) => orders.push(order),
                Err(e) => warn!(error = %e, "Skipping unparseable order"),
            }
        }
        Ok(orders)
    }

    async fn cancel_order(&self, order_id: &str) -> BrokerResult<()> {
        info!(order_id, "Cancelling order");
        self.client
            .delete(&format!("/orders/{}", urlencoding::encode(order_id)))
            .await
    }
}
