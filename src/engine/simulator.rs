//! Dry-run execution.
//!
//! Plays the order lists against a simulated cash balance instead of the
//! broker: sells add proceeds at the quoted price, buys are skipped when
//! simulated cash cannot cover them.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt::Write as _;
use tracing::{info, warn};

use crate::types::{OrderRequest, OrderSide, PortfolioSummary};

const BANNER: &str = "*** DRY RUN - NO REAL TRADES EXECUTED ***";

/// One trade that would have been placed.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedTrade {
    pub side: OrderSide,
    pub symbol: String,
    pub quantity: u64,
    pub price: f64,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct DryRunSimulator {
    trades: Vec<SimulatedTrade>,
    starting_cash: f64,
    cash: f64,
}

impl DryRunSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate sells then buys. Prices come from `prices` when present,
    /// otherwise from the order's limit price. Replaces any earlier run.
    pub fn simulate_orders(
        &mut self,
        sells: &[OrderRequest],
        buys: &[OrderRequest],
        cash: f64,
        prices: &HashMap<String, f64>,
    ) -> &[SimulatedTrade] {
        self.trades.clear();
        self.starting_cash = cash;
        self.cash = cash;
        info!("{BANNER}");

        for order in sells {
            let price = prices.get(&order.symbol).copied().unwrap_or(order.limit_price);
            let value = price * order.quantity as f64;
            self.cash += value;
            info!(
                symbol = %order.symbol,
                quantity = order.quantity,
                price = format!("${:.2}", price),
                value = format!("${:.2}", value),
                "[DRY RUN] Would sell"
            );
            self.record(order, price, value);
        }

        for order in buys {
            let price = prices.get(&order.symbol).copied().unwrap_or(order.limit_price);
            let value = price * order.quantity as f64;
            if value > self.cash {
                warn!(
                    symbol = %order.symbol,
                    need = format!("${:.2}", value),
                    cash = format!("${:.2}", self.cash),
                    "[DRY RUN] Skipping buy, not enough cash"
                );
                continue;
            }
            self.cash -= value;
            info!(
                symbol = %order.symbol,
                quantity = order.quantity,
                price = format!("${:.2}", price),
                value = format!("${:.2}", value),
                "[DRY RUN] Would buy"
            );
            self.record(order, price, value);
        }

        &self.trades
    }

    fn record(&mut self, order: &OrderRequest, price: f64, value: f64) {
        self.trades.push(SimulatedTrade {
            side: order.side,
            symbol: order.symbol.clone(),
            quantity: order.quantity,
            price,
            value,
            timestamp: Utc::now(),
        });
    }

    /// Simulated cash after the last run.
    pub fn cash_after(&self) -> f64 {
        self.cash
    }

    /// Plain-text report of the targets and the simulated trades.
    pub fn report(&self, summary: &PortfolioSummary) -> String {
        let mut out = String::new();
        let rule = "=".repeat(64);

        let _ = writeln!(out, "{BANNER}");
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "  Total value:     ${:>12.2}", summary.total_value);
        let _ = writeln!(out, "  Cash balance:    ${:>12.2}", summary.cash_balance);
        let _ = writeln!(out, "  Positions value: ${:>12.2}", summary.positions_value);
        let _ = writeln!(out, "  Holdings:        {:>13}", summary.num_holdings);
        let _ = writeln!(out, "{rule}");

        let _ = writeln!(
            out,
            "  {:<12} {:>8} {:>9} {:>7} {:>6} {:>5} {:>11}",
            "Symbol", "Target%", "Current%", "Drift%", "Action", "Qty", "Value"
        );
        for t in &summary.targets {
            let _ = writeln!(
                out,
                "  {:<12} {:>7.1}% {:>8.1}% {:>6.1}% {:>6} {:>5} ${:>10.2}",
                t.symbol,
                t.target_weight * 100.0,
                t.current_weight * 100.0,
                t.drift_pct,
                t.action.to_string(),
                t.trade_quantity,
                t.trade_value,
            );
        }
        let _ = writeln!(out);

        if self.trades.is_empty() {
            let _ = writeln!(out, "  No trades needed, portfolio is within drift threshold.");
        } else {
            let _ = writeln!(out, "  Simulated trades:");
            let (mut sold, mut bought) = (0.0, 0.0);
            for trade in &self.trades {
                let _ = writeln!(
                    out,
                    "  {:<6} {:<12} {:>5} ${:>9.2} ${:>11.2}",
                    trade.side.to_string(),
                    trade.symbol,
                    trade.quantity,
                    trade.price,
                    trade.value,
                );
                match trade.side {
                    OrderSide::Sell => sold += trade.value,
                    OrderSide::Buy => bought += trade.value,
                }
            }
            let _ = writeln!(out);
            let _ = writeln!(out, "  Total sold:   ${:>12.2}", sold);
            let _ = writeln!(out, "  Total bought: ${:>12.2}", bought);
            let _ = writeln!(out, "  Cash before:  ${:>12.2}", self.starting_cash);
            let _ = writeln!(out, "  Cash after:   ${:>12.2}", self.cash);
        }
        let _ = writeln!(out, "{BANNER}");
        out
    }
}
