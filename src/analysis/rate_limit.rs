//! Pacing for analysis service calls

use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::trace;

/// Fixed pause inserted after every call, success or failure
#[derive(Debug, Clone, Copy)]
pub struct PostCallDelay {
    delay: Duration,
}

impl PostCallDelay {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Sleep out the delay
    pub async fn wait(&self) {
        if self.delay.is_zero() {
            return;
        }
        trace!("Post-call delay: waiting {:?}", self.delay);
        tokio::time::sleep(self.delay).await;
    }
}

/// Optional requests-per-minute ceiling shared by all calls
pub struct RequestCeiling {
    limiter: RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl RequestCeiling {
    pub fn per_minute(requests_per_minute: u32) -> Self {
        let rpm = NonZeroU32::new(requests_per_minute).unwrap_or(nonzero!(1u32));
        let limiter = RateLimiter::direct(Quota::per_minute(rpm));
        Self { limiter }
    }

    /// Wait until a request is allowed
    pub async fn wait(&self) {
        self.limiter.until_ready().await;
    }
}
