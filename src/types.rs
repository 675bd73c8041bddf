//! Shared types for the rebalancing bot.
//!
//! These types form the data model used across all modules. Broker
//! records, scoring output, rebalancing targets and orders all live
//! here so that broker, strategy and engine modules can depend on them
//! without circular references.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Account state
// ---------------------------------------------------------------------------

/// An amount of money in a given currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Money {
    pub amount: f64,
    pub currency: String,
}

impl Money {
    pub fn cad(amount: f64) -> Self {
        Self {
            amount,
            currency: "CAD".to_string(),
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${:.2} {}", self.amount, self.currency)
    }
}

/// A brokerage account as listed by `/account/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    /// "ca_tfsa", "ca_rrsp", "ca_non_registered", ...
    pub account_type: String,
    pub buying_power: Money,
    pub current_balance: Money,
    pub net_deposits: Money,
    pub status: String,
}

/// A held position, derived from broker state. Read-only within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub security_id: String,
    pub symbol: String,
    pub quantity: f64,
    pub market_value: f64,
    pub book_value: f64,
    pub currency: String,
    pub average_price: f64,
    pub current_price: f64,
    pub gain_loss: f64,
    pub gain_loss_pct: f64,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} x{} @ ${:.2} = ${:.2} ({:+.1}%)",
            self.symbol, self.quantity, self.current_price, self.market_value, self.gain_loss_pct,
        )
    }
}

impl Position {
    /// Minimal position for tests: market value is quantity × price.
    #[cfg(test)]
    pub fn sample(symbol: &str, quantity: f64, price: f64) -> Self {
        let market_value = quantity * price;
        Position {
            security_id: format!("sec-s-{}", symbol.to_lowercase()),
            symbol: symbol.to_string(),
            quantity,
            market_value,
            book_value: market_value,
            currency: "CAD".to_string(),
            average_price: price,
            current_price: price,
            gain_loss: 0.0,
            gain_loss_pct: 0.0,
        }
    }
}

/// Latest quote attached to a security search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotQuote {
    pub amount: f64,
    pub ask: Option<f64>,
    pub bid: Option<f64>,
    pub high: f64,
    pub low: f64,
    pub volume: u64,
    pub quote_date: String,
}

/// A tradeable security as returned by `/securities`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Security {
    /// Broker identifier, e.g. "sec-s-76a7155242e8477880cbb43269235cb6".
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub exchange: String,
    pub currency: String,
    /// "equity", "exchange_traded_fund", ...
    pub security_type: String,
    pub is_buyable: bool,
    pub quote: Option<SpotQuote>,
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// One daily OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Per-symbol metrics and composite score from one scoring run.
///
/// `composite_score` is zero until the ranking pass has run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockScore {
    pub symbol: String,
    pub sector: String,
    pub average_volume: f64,
    pub return_90d: f64,
    pub return_30d: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub composite_score: f64,
    pub is_etf: bool,
    /// Zero when unknown.
    #[serde(default)]
    pub market_cap_millions: f64,
}

impl fmt::Display for StockScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (score={:.4}, 90d={:.2}%, sharpe={:.2}, sector={})",
            self.symbol,
            self.composite_score,
            self.return_90d * 100.0,
            self.sharpe_ratio,
            self.sector,
        )
    }
}

impl StockScore {
    /// A bare score with the given symbol and sector, all metrics zero.
    pub fn new(symbol: &str, sector: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            sector: sector.to_string(),
            average_volume: 0.0,
            return_90d: 0.0,
            return_30d: 0.0,
            volatility: 0.0,
            sharpe_ratio: 0.0,
            composite_score: 0.0,
            is_etf: false,
            market_cap_millions: 0.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Rebalancing
// ---------------------------------------------------------------------------

/// What to do with a symbol this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetAction {
    Hold,
    Buy,
    Sell,
}

impl fmt::Display for TargetAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetAction::Hold => write!(f, "hold"),
            TargetAction::Buy => write!(f, "buy"),
            TargetAction::Sell => write!(f, "sell"),
        }
    }
}

/// Target allocation for one symbol.
///
/// `trade_value` is the absolute dollar size of the trade; the direction
/// is carried by `action`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioTarget {
    pub symbol: String,
    pub security_id: String,
    pub target_weight: f64,
    pub target_value: f64,
    pub current_value: f64,
    pub current_weight: f64,
    pub drift_pct: f64,
    pub action: TargetAction,
    pub trade_value: f64,
    pub trade_quantity: u64,
}

/// Result of a target calculation: portfolio totals plus per-symbol targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub total_value: f64,
    pub cash_balance: f64,
    pub positions_value: f64,
    pub num_holdings: usize,
    pub targets: Vec<PortfolioTarget>,
}

impl fmt::Display for PortfolioSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total=${:.2} cash=${:.2} positions=${:.2} holdings={} targets={}",
            self.total_value,
            self.cash_balance,
            self.positions_value,
            self.num_holdings,
            self.targets.len(),
        )
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    #[serde(rename = "buy_quantity")]
    Buy,
    #[serde(rename = "sell_quantity")]
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Order sub-type sent to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    Market,
    Limit,
}

/// An order to submit. Consumed exactly once by the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub security_id: String,
    pub symbol: String,
    pub quantity: u64,
    pub side: OrderSide,
    pub kind: OrderKind,
    pub limit_price: f64,
}

/// Wire shape of `POST /orders`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderPayload {
    pub security_id: String,
    pub quantity: u64,
    pub order_type: OrderSide,
    pub order_sub_type: OrderKind,
    pub limit_price: Decimal,
    pub time_in_force: &'static str,
}

impl OrderRequest {
    /// Notional value at the limit price.
    pub fn trade_value(&self) -> f64 {
        self.limit_price * self.quantity as f64
    }

    /// Broker payload. Limit prices are sent rounded to cents, day orders only.
    pub fn to_payload(&self) -> OrderPayload {
        let limit_price = Decimal::from_f64(self.limit_price)
            .unwrap_or(Decimal::ZERO)
            .round_dp(2);
        OrderPayload {
            security_id: self.security_id.clone(),
            quantity: self.quantity,
            order_type: self.side,
            order_sub_type: self.kind,
            limit_price,
            time_in_force: "day",
        }
    }
}

impl fmt::Display for OrderRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} x {} @ ${:.2}",
            self.side, self.quantity, self.symbol, self.limit_price
        )
    }
}

/// Broker acknowledgement for a submitted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResponse {
    pub order_id: String,
    pub security_id: String,
    pub symbol: String,
    pub quantity: u64,
    pub order_type: String,
    pub status: String,
    pub limit_price: Option<f64>,
    pub filled_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
}

impl OrderResponse {
    /// Whether the broker rejected the order outright.
    pub fn is_rejected(&self) -> bool {
        self.status == "rejected"
    }

    /// Whether the order is still working at the broker.
    pub fn is_pending(&self) -> bool {
        matches!(self.status.as_str(), "submitted" | "pending" | "new")
    }
}

impl fmt::Display for OrderResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} x {}: {}",
            self.order_id, self.order_type, self.quantity, self.symbol, self.status
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors raised by the broker layer.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Login/refresh failure, missing token, or missing OTP secret.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Non-success HTTP status.
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    /// Unparseable or incomplete broker response.
    #[error("Data error: {0}")]
    Data(String),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

impl BrokerError {
    pub fn is_auth(&self) -> bool {
        matches!(self, BrokerError::Auth(_))
    }

    /// HTTP status carried by an API error.
    pub fn status(&self) -> Option<u16> {
        match self {
            BrokerError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type BrokerResult<T> = std::result::Result<T, BrokerError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
