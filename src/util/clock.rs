//! Monotonic clock helpers.
//!
//! All broker deadlines are `tokio::time::Instant`s so that tests can drive
//! lease and wait timeouts with a paused runtime clock.

use std::time::Duration;

use tokio::time::Instant;

/// Horizon used when a deadline would overflow the clock (roughly 30 years).
pub const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Current monotonic time.
#[must_use]
pub fn now() -> Instant {
    Instant::now()
}

/// `now + delay`, saturating at [`FAR_FUTURE`] instead of panicking.
#[must_use]
pub fn deadline_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay)
        .unwrap_or_else(|| now + FAR_FUTURE)
}
