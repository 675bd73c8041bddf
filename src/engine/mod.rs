//! Execution engine.
//!
//! - `rate_limiter`: sliding-window cap on order submissions
//! - `executor`: sells-then-buys order submission with safety gates
//! - `simulator`: dry-run stand-in for the executor
//! - `pipeline`: one end-to-end rebalancing run
//! - `scheduler`: wall-clock run times for the long-running binary

pub mod executor;
pub mod pipeline;
pub mod rate_limiter;
pub mod scheduler;
pub mod simulator;

pub use executor::{ExecutionSummary, ExecutorConfig, OrderExecutor};
pub use pipeline::{RunOutcome, RunReport, TradingPipeline};
pub use rate_limiter::RateLimiter;
pub use scheduler::Schedule;
