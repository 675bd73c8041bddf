//! Equal-weight rebalancing.
//!
//! Every selected symbol gets weight 1/N of total portfolio value (cash plus
//! positions). Holdings that drifted less than the threshold are left alone;
//! holdings outside the basket are liquidated in full.

use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::types::{
    OrderKind, OrderRequest, OrderSide, PortfolioSummary, PortfolioTarget, Position, StockScore,
    TargetAction,
};

pub struct RebalancerConfig {
    /// Minimum drift from target weight, in percent, before trading.
    pub drift_threshold_pct: f64,
    /// Trades smaller than this (CAD) are held.
    pub min_trade_value: f64,
    /// Per-trade sizing cap (CAD).
    pub max_single_trade: f64,
}

impl Default for RebalancerConfig {
    fn default() -> Self {
        Self {
            drift_threshold_pct: 5.0,
            min_trade_value: 1.0,
            max_single_trade: 5000.0,
        }
    }
}

impl From<&AppConfig> for RebalancerConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            drift_threshold_pct: cfg.rebalancer.drift_threshold_pct,
            min_trade_value: cfg.rebalancer.min_trade_value_cad,
            max_single_trade: cfg.safety.max_single_trade_cad,
        }
    }
}

pub struct Rebalancer {
    config: RebalancerConfig,
}

impl Rebalancer {
    pub fn new(config: RebalancerConfig) -> Self {
        Self { config }
    }

    /// Per-symbol targets for the selected basket plus liquidation targets
    /// for held symbols outside it.
    ///
    /// Selected symbols without a positive price get no target.
    pub fn calculate_targets(
        &self,
        selected: &[StockScore],
        positions: &[Position],
        cash_balance: f64,
        prices: &HashMap<String, f64>,
        security_ids: &HashMap<String, String>,
    ) -> PortfolioSummary {
        let positions_value: f64 = positions.iter().map(|p| p.market_value).sum();
        let total_value = cash_balance + positions_value;

        let mut summary = PortfolioSummary {
            total_value,
            cash_balance,
            positions_value,
            num_holdings: positions.len(),
            targets: Vec::new(),
        };

        if total_value <= 0.0 {
            warn!(total_value, "Portfolio value is zero or negative, nothing to rebalance");
            return summary;
        }

        let num_buckets = selected.len();
        let target_weight = if num_buckets > 0 {
            1.0 / num_buckets as f64
        } else {
            0.0
        };
        let target_value = total_value * target_weight;

        let held: HashMap<&str, &Position> =
            positions.iter().map(|p| (p.symbol.as_str(), p)).collect();

        for stock in selected {
            let symbol = stock.symbol.as_str();
            let price = prices.get(symbol).copied().unwrap_or(0.0);
            if price <= 0.0 {
                warn!(symbol, "No price, skipping target");
                continue;
            }

            let current_value = held.get(symbol).map(|p| p.market_value).unwrap_or(0.0);
            let current_weight = current_value / total_value;
            let drift_pct = if target_weight > 0.0 {
                (current_weight - target_weight).abs() / target_weight * 100.0
            } else {
                0.0
            };

            let trade = target_value - current_value;
            let trade_value = trade.abs();

            let (action, trade_quantity) = if drift_pct < self.config.drift_threshold_pct
                || trade_value < self.config.min_trade_value
            {
                (TargetAction::Hold, 0)
            } else {
                let capped = trade_value.min(self.config.max_single_trade);
                let quantity = (capped / price).floor() as u64;
                let action = if trade > 0.0 {
                    TargetAction::Buy
                } else {
                    TargetAction::Sell
                };
                (action, quantity)
            };

            debug!(
                symbol,
                action = %action,
                drift = format!("{:.1}%", drift_pct),
                trade = format!("${:.2}", trade_value),
                quantity = trade_quantity,
                "Target"
            );

            summary.targets.push(PortfolioTarget {
                symbol: symbol.to_string(),
                security_id: security_ids.get(symbol).cloned().unwrap_or_default(),
                target_weight,
                target_value,
                current_value,
                current_weight,
                drift_pct,
                action,
                trade_value,
                trade_quantity,
            });
        }

        let selected_symbols: HashSet<&str> = selected.iter().map(|s| s.symbol.as_str()).collect();
        for pos in positions {
            if selected_symbols.contains(pos.symbol.as_str()) || pos.quantity <= 0.0 {
                continue;
            }
            info!(symbol = %pos.symbol, quantity = pos.quantity, "Liquidating position outside basket");
            summary.targets.push(PortfolioTarget {
                symbol: pos.symbol.clone(),
                security_id: pos.security_id.clone(),
                target_weight: 0.0,
                target_value: 0.0,
                current_value: pos.market_value,
                current_weight: pos.market_value / total_value,
                drift_pct: 100.0,
                action: TargetAction::Sell,
                trade_value: pos.market_value,
                trade_quantity: pos.quantity.floor() as u64,
            });
        }

        info!(
            total = format!("${:.2}", total_value),
            cash = format!("${:.2}", cash_balance),
            targets = summary.targets.len(),
            buckets = num_buckets,
            "Calculated targets"
        );
        summary
    }

    /// Limit orders for every non-hold target with at least one share,
    /// split into (sells, buys). Sequencing is up to the executor.
    ///
    /// Sell limits are back-derived as current value / quantity and buy
    /// limits as target value / quantity.
    pub fn generate_orders(&self, summary: &PortfolioSummary) -> (Vec<OrderRequest>, Vec<OrderRequest>) {
        let mut sells = Vec::new();
        let mut buys = Vec::new();

        for target in &summary.targets {
            if target.action == TargetAction::Hold || target.trade_quantity < 1 {
                continue;
            }
            let quantity = target.trade_quantity;
            let (side, basis) = match target.action {
                TargetAction::Sell => (OrderSide::Sell, target.current_value),
                _ => (OrderSide::Buy, target.target_value),
            };
            let order = OrderRequest {
                security_id: target.security_id.clone(),
                symbol: target.symbol.clone(),
                quantity,
                side,
                kind: OrderKind::Limit,
                limit_price: basis / quantity as f64,
            };
            match side {
                OrderSide::Sell => sells.push(order),
                OrderSide::Buy => buys.push(order),
            }
        }

        info!(sells = sells.len(), buys = buys.len(), "Generated orders");
        (sells, buys)
    }
}
