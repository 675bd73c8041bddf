//! Account and position endpoints.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::client::BrokerClient;
use super::{lenient_f64, AccountSource, RawMoney, ResultsEnvelope};
use crate::types::{Account, BrokerError, BrokerResult, Money, Position};

const DEFAULT_CURRENCY: &str = "CAD";

#[derive(Debug, Deserialize)]
struct RawAccount {
    id: String,
    #[serde(default)]
    account_type: String,
    #[serde(default)]
    buying_power: RawMoney,
    #[serde(default)]
    current_balance: RawMoney,
    #[serde(default)]
    net_deposits: RawMoney,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize, Default)]
struct RawStock {
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    currency: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPosition {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    security_id: Option<String>,
    #[serde(default)]
    stock: RawStock,
    #[serde(default)]
    quote: RawMoney,
    #[serde(default, deserialize_with = "lenient_f64")]
    quantity: f64,
    #[serde(default)]
    book_value: RawMoney,
    #[serde(default)]
    entry_price: RawMoney,
}

fn money(raw: RawMoney) -> Money {
    Money {
        amount: raw.amount,
        currency: raw.currency.unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
    }
}

/// Parse one `/account/list` record.
pub(crate) fn parse_account(raw: serde_json::Value) -> BrokerResult<Account> {
    let raw: RawAccount = serde_json::from_value(raw)
        .map_err(|e| BrokerError::Data(format!("account record: {e}")))?;
    Ok(Account {
        id: raw.id,
        account_type: raw.account_type,
        buying_power: money(raw.buying_power),
        current_balance: money(raw.current_balance),
        net_deposits: money(raw.net_deposits),
        status: raw.status,
    })
}

/// Parse one `/account/positions` record. Market value is quantity × quote.
pub(crate) fn parse_position(raw: serde_json::Value) -> BrokerResult<Position> {
    let raw: RawPosition = serde_json::from_value(raw)
        .map_err(|e| BrokerError::Data(format!("position record: {e}")))?;

    if raw.stock.symbol.is_empty() {
        return Err(BrokerError::Data("position record without symbol".to_string()));
    }

    let current_price = raw.quote.amount;
    let market_value = raw.quantity * current_price;
    let book_value = raw.book_value.amount;
    let gain_loss = market_value - book_value;
    let gain_loss_pct = if book_value > 0.0 {
        gain_loss / book_value * 100.0
    } else {
        0.0
    };

    Ok(Position {
        security_id: raw.id.or(raw.security_id).unwrap_or_default(),
        symbol: raw.stock.symbol,
        quantity: raw.quantity,
        market_value,
        book_value,
        currency: raw
            .stock
            .currency
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        average_price: raw.entry_price.amount,
        current_price,
        gain_loss,
        gain_loss_pct,
    })
}

/// Parse every record, logging and skipping the ones that fail.
fn parse_all<T>(
    records: Vec<serde_json::Value>,
    kind: &str,
    parse: fn(serde_json::Value) -> BrokerResult<T>,
) -> Vec<T> {
    records
        .into_iter()
        .filter_map(|raw| {
            let id = raw
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or("?")
                .to_string();
            match parse(raw) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!(kind, id = %id, error = %e, "Skipping unparseable record");
                    None
                }
            }
        })
        .collect()
}

/// HTTP `AccountSource`.
pub struct AccountService {
    client: Arc<BrokerClient>,
}

impl AccountService {
    pub fn new(client: Arc<BrokerClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AccountSource for AccountService {
    async fn accounts(&self) -> BrokerResult<Vec<Account>> {
        let envelope: ResultsEnvelope = self.client.get("/account/list", &[]).await?;
        let accounts = parse_all(envelope.results, "account", parse_account);
        info!(count = accounts.len(), "Found accounts");
        Ok(accounts)
    }

    async fn positions(&self, account_id: &str) -> BrokerResult<Vec<Position>> {
        let envelope: ResultsEnvelope = self
            .client
            .get("/account/positions", &[("account_id", account_id)])
            .await?;
        let positions = parse_all(envelope.results, "position", parse_position);
        info!(count = positions.len(), "Found positions");
        Ok(positions)
    }
}
