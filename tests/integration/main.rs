//! End-to-end tests against an in-process fake broker.
//!
//! Exercises the HTTP broker layer and full pipeline runs over real
//! sockets; only the market data source is canned.

mod broker_http;
mod fake_broker;
mod pipeline_run;
