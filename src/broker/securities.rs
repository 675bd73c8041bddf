//! Security search, id resolution and spot quotes.

use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::client::BrokerClient;
use super::{lenient_f64, ResultsEnvelope, SecuritySource};
use crate::types::{BrokerError, BrokerResult, Security, SpotQuote};

/// Exchange suffix the broker's search does not understand.
const TSX_SUFFIX: &str = ".TO";

#[derive(Debug, Deserialize, Default)]
struct RawStock {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    primary_exchange: String,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    security_type: String,
    #[serde(default)]
    is_buyable: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawQuote {
    #[serde(default, deserialize_with = "lenient_f64")]
    amount: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    ask: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    bid: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    high: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    low: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    volume: f64,
    #[serde(default)]
    quote_date: Option<String>,
}

/// Parse one `/securities` record. The stock fields sit under `stock`
/// in search results and at the top level in direct lookups.
pub(crate) fn parse_security(raw: serde_json::Value) -> BrokerResult<Security> {
    let stock_value = raw.get("stock").cloned().unwrap_or_else(|| raw.clone());
    let stock: RawStock = serde_json::from_value(stock_value)
        .map_err(|e| BrokerError::Data(format!("security record: {e}")))?;

    let quote = match raw.get("quote") {
        Some(q) if q.is_object() && q.as_object().is_some_and(|o| !o.is_empty()) => {
            let q: RawQuote = serde_json::from_value(q.clone())
                .map_err(|e| BrokerError::Data(format!("security quote: {e}")))?;
            Some(SpotQuote {
                amount: q.amount,
                ask: (q.ask > 0.0).then_some(q.ask),
                bid: (q.bid > 0.0).then_some(q.bid),
                high: q.high,
                low: q.low,
                volume: q.volume.max(0.0) as u64,
                quote_date: q.quote_date.unwrap_or_default(),
            })
        }
        _ => None,
    };

    let id = raw
        .get("id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or(stock.id)
        .unwrap_or_default();

    Ok(Security {
        id,
        symbol: stock.symbol,
        name: stock.name,
        exchange: stock.primary_exchange,
        currency: stock.currency.unwrap_or_else(|| "CAD".to_string()),
        security_type: stock.security_type,
        is_buyable: stock.is_buyable.unwrap_or(true),
        quote,
    })
}

/// HTTP `SecuritySource`.
pub struct SecurityService {
    client: Arc<BrokerClient>,
}

impl SecurityService {
    pub fn new(client: Arc<BrokerClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecuritySource for SecurityService {
    async fn search(&self, query: &str) -> BrokerResult<Vec<Security>> {
        let envelope: ResultsEnvelope = self.client.get("/securities", &[("query", query)]).await?;
        let mut securities = Vec::with_capacity(envelope.results.len());
        for raw in envelope.results {
            match parse_security(raw) {
                Ok(sec) => securities.push(sec),
                Err(e) => warn!(query, error = %e, "Skipping unparseable security"),
            }
        }
        Ok(securities)
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Maps universe symbols (e.g. "RY.TO") to broker securities, with a cache.
pub struct SecurityResolver {
    source: Arc<dyn SecuritySource>,
    cache: Mutex<HashMap<String, Security>>,
}

impl SecurityResolver {
    pub fn new(source: Arc<dyn SecuritySource>) -> Self {
        Self {
            source,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Look up a symbol: exact symbol match preferred, else the first result.
    pub async fn lookup(&self, symbol: &str) -> BrokerResult<Option<Security>> {
        if let Some(sec) = self.cache.lock().await.get(symbol) {
            return Ok(Some(sec.clone()));
        }

        let query = symbol.strip_suffix(TSX_SUFFIX).unwrap_or(symbol);
        let mut results = self.source.search(query).await?;

        let exact = results.iter().position(|s| {
            s.symbol.eq_ignore_ascii_case(query) || s.symbol.eq_ignore_ascii_case(symbol)
        });
        let chosen = match exact {
            Some(idx) => Some(results.swap_remove(idx)),
            None if !results.is_empty() => {
                debug!(symbol, first = %results[0].symbol, "No exact match, using first result");
                Some(results.swap_remove(0))
            }
            None => None,
        };

        match &chosen {
            Some(sec) => {
                self.cache
                    .lock()
                    .await
                    .insert(symbol.to_string(), sec.clone());
            }
            None => warn!(symbol, "Security not found"),
        }
        Ok(chosen)
    }

    /// Spot price for a symbol, or 0 when unknown.
    pub async fn quote(&self, symbol: &str) -> BrokerResult<f64> {
        Ok(self
            .lookup(symbol)
            .await?
            .and_then(|s| s.quote)
            .map(|q| q.amount)
            .unwrap_or(0.0))
    }

    /// Resolve security ids for many symbols concurrently. Symbols that fail
    /// or are not found are left out.
    pub async fn bulk_resolve(&self, symbols: &[String]) -> HashMap<String, String> {
        let lookups = join_all(symbols.iter().map(|s| self.lookup(s))).await;
        let mut resolved = HashMap::new();
        for (symbol, result) in symbols.iter().zip(lookups) {
            match result {
                Ok(Some(sec)) if !sec.id.is_empty() => {
                    resolved.insert(symbol.clone(), sec.id);
                }
                Ok(_) => warn!(symbol = %symbol, "Could not resolve security id"),
                Err(e) => warn!(symbol = %symbol, error = %e, "Security lookup failed"),
            }
        }
        info!(resolved = resolved.len(), requested = symbols.len(), "Resolved securities");
        resolved
    }

    /// Spot quotes for many symbols concurrently; only positive prices are kept.
    pub async fn bulk_quotes(&self, symbols: &[String]) -> HashMap<String, f64> {
        let quotes = join_all(symbols.iter().map(|s| self.quote(s))).await;
        let mut prices = HashMap::new();
        for (symbol, result) in symbols.iter().zip(quotes) {
            match result {
                Ok(price) if price > 0.0 => {
                    prices.insert(symbol.clone(), price);
                }
                Ok(_) => warn!(symbol = %symbol, "No usable quote"),
                Err(e) => warn!(symbol = %symbol, error = %e, "Quote lookup failed"),
            }
        }
        prices
    }
}
