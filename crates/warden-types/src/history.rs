//! [`BoundedLog`] – fixed-capacity, append-only FIFO history, and
//! [`SlidingWindow`] – a rolling-time event counter.
//!
//! Every audit trail in Warden (breaker events, recovery decisions, replay
//! traces, archived confirmations) is a rolling window: pushing past capacity
//! drops the oldest entry.  Budgets (restarts per service, live replays) are
//! rolling time windows instead.
//!
//! ```
//! use warden_types::history::BoundedLog;
//!
//! let mut log = BoundedLog::new(2);
//! log.push("a");
//! log.push("b");
//! log.push("c");
//! assert_eq!(log.recent(10), vec!["c", "b"]);
//! assert_eq!(log.total_pushed(), 3);
//! ```

use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct BoundedLog<T> {
    capacity: usize,
    entries: VecDeque<T>,
    total_pushed: u64,
}

impl<T> BoundedLog<T> {
    /// A `capacity` of zero keeps nothing but still counts pushes.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity.min(1024)),
            total_pushed: 0,
        }
    }

    pub fn push(&mut self, entry: T) {
        self.total_pushed += 1;
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries ever pushed, including evicted ones.
    pub fn total_pushed(&self) -> u64 {
        self.total_pushed
    }

    /// Oldest-first iteration over the retained window.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.entries.iter()
    }
}

impl<T: Clone> BoundedLog<T> {
    /// Up to `limit` entries, newest first.
    pub fn recent(&self, limit: usize) -> Vec<T> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SlidingWindow
// ─────────────────────────────────────────────────────────────────────────────

/// At most `limit` events within any trailing `window`.
///
/// Pruning is lazy: every query first drops timestamps older than
/// `now - window`.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    limit: u32,
    window: Duration,
    hits: VecDeque<Instant>,
}

impl SlidingWindow {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            hits: VecDeque::new(),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Events still inside the window at `now`.
    pub fn used(&self, now: Instant) -> u32 {
        let live = self.hits.iter().filter(|t| !self.is_stale(**t, now)).count();
        u32::try_from(live).unwrap_or(u32::MAX)
    }

    pub fn remaining(&self, now: Instant) -> u32 {
        self.limit.saturating_sub(self.used(now))
    }

    pub fn is_exhausted(&self, now: Instant) -> bool {
        self.remaining(now) == 0
    }

    /// Record an event unconditionally.
    pub fn record(&mut self, now: Instant) {
        self.prune(now);
        self.hits.push_back(now);
    }

    /// Record only if the budget has room.  Returns whether it did.
    pub fn try_record(&mut self, now: Instant) -> bool {
        self.prune(now);
        if self.hits.len() >= self.limit as usize {
            return false;
        }
        self.hits.push_back(now);
        true
    }

    /// Time until the oldest live event leaves the window.
    pub fn retry_after(&self, now: Instant) -> Option<Duration> {
        self.hits
            .iter()
            .find(|t| !self.is_stale(**t, now))
            .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
    }

    fn is_stale(&self, at: Instant, now: Instant) -> bool {
        now.saturating_duration_since(at) >= self.window
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.hits.front() {
            if self.is_stale(*front, now) {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_past_capacity() {
        let mut log = BoundedLog::new(3);
        for i in 0..5 {
            log.push(i);
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(log.total_pushed(), 5);
        assert_eq!(log.iter().rev().next(), Some(&4));
    }

    #[test]
    fn recent_is_newest_first_and_limited() {
        let mut log = BoundedLog::new(10);
        for i in 0..4 {
            log.push(i);
        }
        assert_eq!(log.recent(2), vec![3, 2]);
        assert_eq!(log.recent(100), vec![3, 2, 1, 0]);
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let mut log = BoundedLog::new(0);
        log.push("x");
        assert!(log.is_empty());
        assert_eq!(log.total_pushed(), 1);
    }

    #[test]
    fn sliding_window_caps_events_in_window() {
        let t0 = Instant::now();
        let mut w = SlidingWindow::new(2, Duration::from_secs(10));
        assert!(w.try_record(t0));
        assert!(w.try_record(t0 + Duration::from_secs(1)));
        assert!(!w.try_record(t0 + Duration::from_secs(2)));
        assert!(w.is_exhausted(t0 + Duration::from_secs(2)));
        assert_eq!(
            w.retry_after(t0 + Duration::from_secs(2)),
            Some(Duration::from_secs(8))
        );
        // The first event ages out exactly at the window boundary.
        assert!(w.try_record(t0 + Duration::from_secs(10)));
        assert_eq!(w.used(t0 + Duration::from_secs(10)), 2);
    }

    #[test]
    fn sliding_window_queries_do_not_mutate() {
        let t0 = Instant::now();
        let mut w = SlidingWindow::new(1, Duration::from_secs(5));
        w.record(t0);
        let later = t0 + Duration::from_secs(60);
        assert_eq!(w.remaining(later), 1);
        assert_eq!(w.remaining(t0), 0);
    }
}
