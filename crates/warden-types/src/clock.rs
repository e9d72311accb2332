//! [`Clock`] – the single time source read by every governance component.
//!
//! Expiry in Warden is always lazy: nothing is scheduled, and every access
//! re-checks `deadline.is_expired(clock.now())` before acting.  Injecting the
//! clock lets tests step time forward deterministically with
//! [`ManualClock::advance`] instead of sleeping.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use warden_types::clock::{Clock, Deadline, ManualClock};
//!
//! let clock = ManualClock::new();
//! let deadline = Deadline::after(clock.now(), Duration::from_secs(5));
//!
//! assert!(!deadline.is_expired(clock.now()));
//! clock.advance(Duration::from_secs(6));
//! assert!(deadline.is_expired(clock.now()));
//! ```

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Monotonic plus wall-clock time source.
pub trait Clock: Send + Sync {
    /// Monotonic instant used for cooldowns, TTLs and recovery timeouts.
    fn now(&self) -> Instant;

    /// Wall-clock time used for audit timestamps.
    fn utc(&self) -> DateTime<Utc>;
}

/// The real clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    origin_utc: DateTime<Utc>,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            origin_utc: Utc::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move both the monotonic and the wall clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }

    /// Time elapsed since construction.
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }

    fn utc(&self) -> DateTime<Utc> {
        let offset = *self.offset.lock();
        chrono::TimeDelta::from_std(offset)
            .ok()
            .and_then(|d| self.origin_utc.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Deadline
// ─────────────────────────────────────────────────────────────────────────────

/// An explicit monotonic deadline: `start + ttl`.
///
/// Expired strictly *after* the TTL has elapsed, i.e. `now - start > ttl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    start: Instant,
    ttl: Duration,
}

impl Deadline {
    pub fn after(start: Instant, ttl: Duration) -> Self {
        Self { start, ttl }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.start) > self.ttl
    }

    /// Time left before expiry; zero once expired.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.ttl
            .saturating_sub(now.saturating_duration_since(self.start))
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_moves_both_clocks_together() {
        let clock = ManualClock::new();
        let t0 = clock.now();
        let w0 = clock.utc();
        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now() - t0, Duration::from_secs(90));
        assert_eq!((clock.utc() - w0).num_seconds(), 90);
        assert_eq!(clock.elapsed(), Duration::from_secs(90));
    }

    #[test]
    fn deadline_is_not_expired_exactly_at_ttl() {
        let clock = ManualClock::new();
        let d = Deadline::after(clock.now(), Duration::from_secs(10));
        clock.advance(Duration::from_secs(10));
        assert!(!d.is_expired(clock.now()));
        clock.advance(Duration::from_millis(1));
        assert!(d.is_expired(clock.now()));
    }

    #[test]
    fn deadline_remaining_saturates_at_zero() {
        let clock = ManualClock::new();
        let d = Deadline::after(clock.now(), Duration::from_secs(3));
        clock.advance(Duration::from_secs(1));
        assert_eq!(d.remaining(clock.now()), Duration::from_secs(2));
        clock.advance(Duration::from_secs(10));
        assert_eq!(d.remaining(clock.now()), Duration::ZERO);
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
