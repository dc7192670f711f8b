//! Rate limiting for the bootstrap listener.
//!
//! Token secrets are guessable only by brute force; the limiter caps how
//! fast anyone can try.

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use tonic::{Request, Status};

const DEFAULT_PER_SECOND: NonZeroU32 = match NonZeroU32::new(5) {
    Some(n) => n,
    None => unreachable!(),
};
const DEFAULT_BURST: NonZeroU32 = match NonZeroU32::new(20) {
    Some(n) => n,
    None => unreachable!(),
};

/// Shared limiter for `Join` calls.
#[derive(Clone)]
pub struct JoinRateLimiter {
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl JoinRateLimiter {
    /// Allow `per_second` sustained joins with bursts up to `burst`.
    ///
    /// Zero values fall back to the defaults (5/s, burst 20).
    pub fn new(per_second: u32, burst: u32) -> Self {
        let per_second = NonZeroU32::new(per_second).unwrap_or(DEFAULT_PER_SECOND);
        let burst = NonZeroU32::new(burst).unwrap_or(DEFAULT_BURST);
        let quota = Quota::per_second(per_second).allow_burst(burst);

        Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    /// `Err(Status::resource_exhausted)` once the quota is spent.
    pub fn check(&self) -> Result<(), Status> {
        match self.limiter.check() {
            Ok(()) => Ok(()),
            Err(_) => {
                tracing::warn!("Rate limit exceeded for bootstrap endpoint");
                Err(Status::resource_exhausted(
                    "Rate limit exceeded. Please try again later.",
                ))
            }
        }
    }
}

impl Default for JoinRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_PER_SECOND.get(), DEFAULT_BURST.get())
    }
}

impl std::fmt::Debug for JoinRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinRateLimiter").finish_non_exhaustive()
    }
}

/// Rate limiting interceptor for tonic services.
#[derive(Clone, Debug)]
pub struct RateLimitInterceptor {
    limiter: JoinRateLimiter,
}

impl RateLimitInterceptor {
    pub fn new(limiter: JoinRateLimiter) -> Self {
        Self { limiter }
    }
}

impl tonic::service::Interceptor for RateLimitInterceptor {
    fn call(&mut self, request: Request<()>) -> Result<Request<()>, Status> {
        self.limiter.check()?;
        Ok(request)
    }
}
