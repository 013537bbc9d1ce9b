//! Per-sender message rate limiting
//!
//! One message per sender per window, across all workflows. Backed by a
//! keyed GCRA limiter with a burst of one, so a rejected check never
//! consumes the sender's slot.

use collab_types::UserId;
use governor::clock::{Clock, DefaultClock};
use governor::middleware::NoOpMiddleware;
use governor::state::keyed::DashMapStateStore;
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::time::Duration;

/// Idle senders are dropped once the key count grows past this
const PRUNE_THRESHOLD: usize = 10_000;

type SenderLimiter<C> =
    RateLimiter<UserId, DashMapStateStore<UserId>, C, NoOpMiddleware<<C as Clock>::Instant>>;

/// Sender-keyed limiter; a zero window disables limiting
pub struct MessageRateLimiter<C: Clock = DefaultClock> {
    window: Duration,
    clock: C,
    limiter: Option<SenderLimiter<C>>,
}

impl MessageRateLimiter {
    pub fn new(window: Duration) -> Self {
        Self::with_clock(window, DefaultClock::default())
    }
}

impl<C: Clock> MessageRateLimiter<C> {
    pub fn with_clock(window: Duration, clock: C) -> Self {
        let limiter = Quota::with_period(window).map(|quota| {
            RateLimiter::dashmap_with_clock(quota.allow_burst(NonZeroU32::MIN), &clock)
        });

        Self {
            window,
            clock,
            limiter,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Take the sender's slot, or return how long until one opens
    pub fn check(&self, sender: &UserId) -> Result<(), Duration> {
        let Some(limiter) = &self.limiter else {
            return Ok(());
        };

        if limiter.len() > PRUNE_THRESHOLD {
            limiter.retain_recent();
        }

        limiter
            .check_key(sender)
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }
}
