//! Request pacing for one backend instance.
//!
//! Every caller of a backend instance goes through the same limiter, so
//! pacing is shared across all models routed through that instance rather
//! than tracked per model. Backends that should share a budget can be
//! handed the same `Arc<RateLimiter>`.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

/// Enforces a minimum interval of `60 / rpm` seconds between requests.
#[derive(Debug, Default)]
pub struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until a request at `rpm` requests per minute is allowed.
    ///
    /// `rpm == 0` disables pacing. The lock is held across the sleep, so
    /// concurrent callers are released one interval apart, in lock order.
    pub async fn acquire(&self, rpm: u32) {
        if rpm == 0 {
            return;
        }
        let interval = Duration::from_secs_f64(60.0 / f64::from(rpm));

        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < interval {
                let wait = interval - elapsed;
                trace!(wait_ms = wait.as_millis() as u64, "Pacing backend request");
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }
}
