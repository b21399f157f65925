use std::num::NonZeroU32;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};

/// Paces request dispatch to a fixed number of requests per second.
///
/// Burst is 1: dispatch `k` is released no earlier than `k / rate` seconds after
/// the first, so the schedule never front-loads.
pub struct DispatchLimiter {
    rate: NonZeroU32,
    inner: DefaultDirectRateLimiter,
}

impl DispatchLimiter {
    #[must_use]
    pub fn new(rate: NonZeroU32) -> Self {
        let quota = Quota::per_second(rate).allow_burst(NonZeroU32::MIN);
        Self {
            rate,
            inner: RateLimiter::direct(quota),
        }
    }

    #[must_use]
    pub fn rate(&self) -> NonZeroU32 {
        self.rate
    }

    /// Wait for the next dispatch slot.
    pub async fn acquire(&self) {
        self.inner.until_ready().await;
    }
}

impl std::fmt::Debug for DispatchLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchLimiter")
            .field("rate", &self.rate)
            .finish_non_exhaustive()
    }
}
