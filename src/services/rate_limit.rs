// src/services/rate_limit.rs

//! Process-wide minimum interval between requests.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};

/// Enforces a minimum interval between successive acquisitions.
///
/// Acquisitions are serialized through an async mutex held across the
/// wait, so no two calls complete less than `interval` apart no matter
/// how many tasks share the limiter.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until `interval` has elapsed since the previous acquisition.
    ///
    /// The first call returns immediately.
    pub async fn acquire(&self) {
        let mut last = self.last.lock().await;

        if let Some(previous) = *last {
            // Re-check after every sleep; timers may wake early.
            loop {
                let elapsed = previous.elapsed();
                if elapsed >= self.interval {
                    break;
                }
                sleep(self.interval - elapsed).await;
            }
        }

        *last = Some(Instant::now());
    }
}
