//! Strategy layer: what to hold and what to trade.
//!
//! - `picker`: scores the universe and selects the target basket
//! - `rebalancer`: equal-weight targets and the sell/buy order lists

pub mod picker;
pub mod rebalancer;

pub use picker::{PickerConfig, StockPicker};
pub use rebalancer::{Rebalancer, RebalancerConfig};
