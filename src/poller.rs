//! Bounded-time confirmation polling

use crate::Result;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Result of a polling run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// The query reported a terminal value
    Terminal(T),
    /// The timeout elapsed first
    TimedOut { attempts: u32 },
}

/// Queries at a fixed interval until a terminal value or the timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationPoller {
    interval: Duration,
    timeout: Duration,
}

impl ConfirmationPoller {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs `query` until it yields `Some`. Query errors count as "not yet" and
    /// polling goes on.
    pub async fn poll<T, F, Fut>(&self, label: &str, mut query: F) -> PollOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        let start = Instant::now();
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match query().await {
                Ok(Some(value)) => {
                    debug!("{} reached a terminal status after {} queries", label, attempts);
                    return PollOutcome::Terminal(value);
                }
                Ok(None) => {}
                Err(e) => warn!("Status query for {} failed: {}", label, e),
            }
            if start.elapsed() >= self.timeout {
                warn!(
                    "{} still pending after {:?} ({} queries)",
                    label, self.timeout, attempts
                );
                return PollOutcome::TimedOut { attempts };
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}
