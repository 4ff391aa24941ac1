//! Global token bucket capping execution-create QPS against the admin
//! service.

use std::num::NonZeroU32;

use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// One limiter shared by catch-up and live ticks, so a large catch-up and
/// fresh ticks contend for the same QPS budget instead of one starving the
/// other outright.
///
/// The burst capacity is a single token: callers are paced one admin call
/// per `1/per_second` interval rather than being allowed to dump a bucket's
/// worth of requests at once.
pub struct AdminRateLimiter {
    inner: DirectLimiter,
}

impl AdminRateLimiter {
    /// `per_second` is clamped up to at least one request per second.
    pub fn new(per_second: u32) -> Self {
        let per_second = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_second(per_second).allow_burst(NonZeroU32::MIN);
        Self {
            inner: RateLimiter::direct(quota),
        }
    }

    /// Wait until a token is available.
    pub async fn acquire(&self) {
        self.inner.until_ready().await;
    }
}
