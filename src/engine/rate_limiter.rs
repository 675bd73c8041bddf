//! Sliding-window order rate limiter.
//!
//! Keeps the instants of recent grants in a queue. A grant is allowed while
//! fewer than `max_requests` instants lie within the last `window`. When the
//! window is full the caller sleeps until the oldest grant ages out, with the
//! lock released so other tasks can observe capacity meanwhile.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::types::{BrokerError, BrokerResult};

/// Slack added to every computed wait so the oldest grant has surely expired.
const WAIT_SLACK: Duration = Duration::from_secs(1);

pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    grants: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
            grants: Mutex::new(VecDeque::with_capacity(max_requests)),
        }
    }

    /// Wait for a slot and record it. Returns `BrokerError::Cancelled`
    /// if the token fires while waiting; no slot is taken in that case.
    pub async fn acquire(&self, cancel: &CancellationToken) -> BrokerResult<()> {
        loop {
            let wait = {
                let mut grants = self.grants.lock().await;
                let now = Instant::now();
                self.prune(&mut grants, now);

                if grants.len() < self.max_requests {
                    grants.push_back(now);
                    debug!(used = grants.len(), max = self.max_requests, "Rate limit slot granted");
                    return Ok(());
                }

                // Full: the front is the oldest grant still inside the window.
                let oldest = grants.front().copied().unwrap_or(now);
                let wait = self
                    .window
                    .saturating_sub(now.duration_since(oldest))
                    .saturating_add(WAIT_SLACK)
                    .max(WAIT_SLACK);
                warn!(
                    used = grants.len(),
                    max = self.max_requests,
                    wait_secs = wait.as_secs(),
                    "Rate limit reached, waiting"
                );
                wait
            };

            tokio::select! {
                _ = cancel.cancelled() => return Err(BrokerError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Whether `acquire` would grant immediately.
    pub async fn can_proceed(&self) -> bool {
        self.remaining_capacity().await > 0
    }

    /// Slots free in the current window.
    pub async fn remaining_capacity(&self) -> usize {
        let mut grants = self.grants.lock().await;
        self.prune(&mut grants, Instant::now());
        self.max_requests.saturating_sub(grants.len())
    }

    fn prune(&self, grants: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&front) = grants.front() {
            if now.duration_since(front) > self.window {
                grants.pop_front();
            } else {
                break;
            }
        }
    }
}
