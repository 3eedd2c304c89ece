//! Rate limiting for inbound client frames

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Create a rate limiter with the specified requests per second
pub fn create_limiter(requests_per_second: u32) -> Arc<Limiter> {
    let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

/// Max inbound WebSocket frames per second per connection
pub const FRAME_RATE_LIMIT: u32 = 60;

/// Per-connection inbound frame limiter
#[derive(Clone)]
pub struct FrameRateLimiter {
    limiter: Arc<Limiter>,
    dropped: u64,
}

impl FrameRateLimiter {
    pub fn new() -> Self {
        Self::with_rate(FRAME_RATE_LIMIT)
    }

    pub fn with_rate(frames_per_second: u32) -> Self {
        Self {
            limiter: create_limiter(frames_per_second),
            dropped: 0,
        }
    }

    /// Check if a frame may be forwarded (returns true if allowed)
    pub fn check_frame(&mut self) -> bool {
        let allowed = self.limiter.check().is_ok();
        if !allowed {
            self.dropped += 1;
        }
        allowed
    }

    /// Frames rejected so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Default for FrameRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
