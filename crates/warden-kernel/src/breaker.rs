//! [`CircuitBreaker`] – per-dependency health guard.
//!
//! ```text
//!            failure_threshold consecutive failures
//!   CLOSED ──────────────────────────────────────────▶ OPEN
//!     ▲                                                 │
//!     │ success_threshold          recovery_timeout +   │
//!     │ probe successes            uniform(0, jitter)   │
//!     │                                                 ▼
//!     └──────────────────── HALF_OPEN ◀─────────────────┘
//!                               │  any probe failure
//!                               └──────────────▶ OPEN
//! ```
//!
//! Every transition is checked against [`TransitionMatrix::STANDARD`] before
//! it is applied.  The breaker lock covers bookkeeping only: admission and
//! outcome recording each take it briefly, and the wrapped call runs with no
//! lock held.
//!
//! Admission hands out a [`CallPermit`].  A permit that is dropped without an
//! outcome (e.g. its future was cancelled) frees its half-open probe slot.
//! Each transition bumps a generation counter, and outcomes from a permit
//! issued under an older generation only update the aggregate counters.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use warden_kernel::breaker::{BreakerConfig, CircuitBreaker};
//! use warden_types::{BreakerState, ManualClock};
//!
//! let clock = Arc::new(ManualClock::new());
//! let config = BreakerConfig {
//!     failure_threshold: 2,
//!     jitter_max: Duration::ZERO,
//!     ..BreakerConfig::default()
//! };
//! let breaker = CircuitBreaker::new("search", config, clock.clone());
//!
//! breaker.acquire().unwrap().failure();
//! breaker.acquire().unwrap().failure();
//! assert_eq!(breaker.state(), BreakerState::Open);
//! assert!(breaker.acquire().is_err());
//!
//! clock.advance(Duration::from_secs(31));
//! let probe = breaker.acquire().unwrap();
//! assert_eq!(breaker.state(), BreakerState::HalfOpen);
//! probe.success();
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use warden_types::{BoundedLog, BreakerState, CircuitOpenError, Clock, OpenReason, WardenError};

use crate::transition::{RecordedTransition, TransitionKind, TransitionMatrix};

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures in CLOSED that open the breaker.
    pub failure_threshold: u32,
    /// Minimum time spent OPEN before a probe is admitted.
    pub recovery_timeout: Duration,
    /// Upper bound of the random delay added to `recovery_timeout`, sampled
    /// once per trip.
    pub jitter_max: Duration,
    /// Concurrent probes admitted in HALF_OPEN.
    pub half_open_max_calls: u32,
    /// Probe successes required to close again.
    pub success_threshold: u32,
    /// Size of the state-change event ring.
    pub event_capacity: usize,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            jitter_max: Duration::from_secs(5),
            half_open_max_calls: 1,
            success_threshold: 2,
            event_capacity: 200,
        }
    }
}

impl BreakerConfig {
    pub fn validate(&self) -> Result<(), WardenError> {
        if self.failure_threshold == 0 {
            return Err(WardenError::Configuration(
                "breaker failure_threshold must be at least 1".into(),
            ));
        }
        if self.half_open_max_calls == 0 {
            return Err(WardenError::Configuration(
                "breaker half_open_max_calls must be at least 1".into(),
            ));
        }
        if self.success_threshold == 0 {
            return Err(WardenError::Configuration(
                "breaker success_threshold must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Public records
// ────────────────────────────────────────────────────────────────────────────

/// One recorded state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerEvent {
    pub at: DateTime<Utc>,
    pub from: BreakerState,
    pub to: BreakerState,
    pub kind: TransitionKind,
    pub consecutive_failures: u32,
}

impl RecordedTransition for BreakerEvent {
    fn from_state(&self) -> BreakerState {
        self.from
    }

    fn to_state(&self) -> BreakerState {
        self.to
    }

    fn kind(&self) -> TransitionKind {
        self.kind
    }
}

/// Lifetime totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerCounters {
    pub calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub short_circuits: u64,
    pub half_open_rejections: u64,
    pub trips: u64,
    pub illegal_transition_attempts: u64,
}

/// Read-only view returned by [`CircuitBreaker::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub half_open_in_flight: u32,
    pub counters: BreakerCounters,
    pub event_counts: BTreeMap<TransitionKind, u64>,
    pub recent_events: Vec<BreakerEvent>,
}

/// Either the breaker refused the call, or the call itself failed.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    #[error(transparent)]
    Open(CircuitOpenError),
    #[error("{0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open(_))
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            BreakerError::Inner(e) => Some(e),
            BreakerError::Open(_) => None,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Internal state
// ────────────────────────────────────────────────────────────────────────────

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    /// When OPEN: the instant the next probe may be admitted.
    probe_at: Option<Instant>,
    half_open_in_flight: u32,
    generation: u64,
    counters: BreakerCounters,
    events: BoundedLog<BreakerEvent>,
    event_counts: BTreeMap<TransitionKind, u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
}

// ────────────────────────────────────────────────────────────────────────────
// CircuitBreaker
// ────────────────────────────────────────────────────────────────────────────

pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    matrix: TransitionMatrix,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            config,
            matrix: TransitionMatrix::STANDARD,
            clock,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                probe_at: None,
                half_open_in_flight: 0,
                generation: 0,
                counters: BreakerCounters::default(),
                events: BoundedLog::new(config.event_capacity),
                event_counts: BTreeMap::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Stored state.  Does not evaluate the recovery timeout.
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// The state the next call would observe: an OPEN breaker whose probe
    /// deadline has passed reports HALF_OPEN.  Mutates nothing.
    pub fn observed_state(&self) -> BreakerState {
        let inner = self.inner.lock();
        match (inner.state, inner.probe_at) {
            (BreakerState::Open, Some(at)) if self.clock.now() >= at => BreakerState::HalfOpen,
            (state, _) => state,
        }
    }

    /// Run `f` under the breaker.  `f` is not invoked when the breaker
    /// refuses admission.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.acquire().map_err(BreakerError::Open)?;
        match f().await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(e) => {
                permit.failure();
                Err(BreakerError::Inner(e))
            }
        }
    }

    /// Admission only.  The caller must report the outcome on the returned
    /// permit.
    pub fn acquire(&self) -> Result<CallPermit<'_>, CircuitOpenError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        match inner.state {
            BreakerState::Closed => {}
            BreakerState::Open => {
                let due = inner.probe_at.is_some_and(|at| now >= at);
                if !due {
                    inner.counters.short_circuits += 1;
                    debug!(
                        breaker = %self.name,
                        consecutive_failures = inner.consecutive_failures,
                        "circuit open; call short-circuited"
                    );
                    return Err(self.open_error(&inner, OpenReason::Open));
                }
                if !self.transition(&mut inner, BreakerState::HalfOpen, TransitionKind::ProbeStarted)
                {
                    inner.counters.short_circuits += 1;
                    return Err(self.open_error(&inner, OpenReason::Open));
                }
                inner.probe_at = None;
                inner.consecutive_successes = 0;
                inner.half_open_in_flight = 0;
            }
            BreakerState::HalfOpen => {
                if inner.half_open_in_flight >= self.config.half_open_max_calls {
                    inner.counters.half_open_rejections += 1;
                    debug!(breaker = %self.name, "half-open probe slots full; call rejected");
                    return Err(self.open_error(&inner, OpenReason::HalfOpenSaturated));
                }
            }
        }

        let probe = inner.state == BreakerState::HalfOpen;
        if probe {
            inner.half_open_in_flight += 1;
        }
        inner.counters.calls += 1;

        Ok(CallPermit {
            breaker: self,
            generation: inner.generation,
            probe,
            settled: false,
        })
    }

    /// Force CLOSED and clear the consecutive counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        if inner.state != BreakerState::Closed {
            self.transition(&mut inner, BreakerState::Closed, TransitionKind::Reset);
        }
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        inner.half_open_in_flight = 0;
        inner.probe_at = None;
    }

    pub fn counters(&self) -> BreakerCounters {
        self.inner.lock().counters
    }

    /// Up to `limit` state-change events, newest first.
    pub fn events(&self, limit: usize) -> Vec<BreakerEvent> {
        self.inner.lock().events.recent(limit)
    }

    pub fn event_counts(&self) -> BTreeMap<TransitionKind, u64> {
        self.inner.lock().event_counts.clone()
    }

    /// Re-verify the retained event ring against the transition matrix.
    pub fn verify_history(&self) -> Result<(), WardenError> {
        let inner = self.inner.lock();
        self.matrix.verify_events(inner.events.iter())
    }

    pub fn snapshot(&self, event_limit: usize) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            half_open_in_flight: inner.half_open_in_flight,
            counters: inner.counters,
            event_counts: inner.event_counts.clone(),
            recent_events: inner.events.recent(event_limit),
        }
    }

    // ── internals ───────────────────────────────────────────────────────────

    fn open_error(&self, inner: &Inner, reason: OpenReason) -> CircuitOpenError {
        CircuitOpenError {
            name: self.name.clone(),
            consecutive_failures: inner.consecutive_failures,
            reason,
        }
    }

    /// Apply a matrix-checked transition.  Returns `false` (and counts the
    /// attempt) when the matrix refuses it.
    fn transition(&self, inner: &mut Inner, to: BreakerState, kind: TransitionKind) -> bool {
        let from = inner.state;
        if let Err(e) = self.matrix.check(from, to, kind) {
            inner.counters.illegal_transition_attempts += 1;
            error!(breaker = %self.name, %from, %to, %kind, error = %e, "illegal breaker transition refused");
            return false;
        }

        inner.state = to;
        inner.generation += 1;
        *inner.event_counts.entry(kind).or_insert(0) += 1;
        inner.events.push(BreakerEvent {
            at: self.clock.utc(),
            from,
            to,
            kind,
            consecutive_failures: inner.consecutive_failures,
        });

        match kind {
            TransitionKind::Tripped | TransitionKind::Reopened => {
                inner.counters.trips += 1;
                inner.probe_at = Some(self.clock.now() + self.config.recovery_timeout + self.sample_jitter());
                warn!(
                    breaker = %self.name,
                    %from,
                    consecutive_failures = inner.consecutive_failures,
                    "circuit opened"
                );
            }
            _ => info!(breaker = %self.name, %from, %to, %kind, "circuit state changed"),
        }
        true
    }

    fn sample_jitter(&self) -> Duration {
        let max_ms = u64::try_from(self.config.jitter_max.as_millis()).unwrap_or(u64::MAX);
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }

    fn settle(&self, generation: u64, probe: bool, outcome: Option<Outcome>) {
        let mut inner = self.inner.lock();

        match outcome {
            Some(Outcome::Success) => inner.counters.successes += 1,
            Some(Outcome::Failure) => inner.counters.failures += 1,
            None => {}
        }

        if generation != inner.generation {
            return;
        }
        if probe {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }

        match outcome {
            None => {}
            Some(Outcome::Success) => {
                inner.consecutive_failures = 0;
                inner.consecutive_successes += 1;
                if inner.state == BreakerState::HalfOpen
                    && inner.consecutive_successes >= self.config.success_threshold
                    && self.transition(&mut inner, BreakerState::Closed, TransitionKind::Recovered)
                {
                    inner.consecutive_successes = 0;
                    inner.half_open_in_flight = 0;
                }
            }
            Some(Outcome::Failure) => {
                inner.consecutive_successes = 0;
                inner.consecutive_failures += 1;
                let state = inner.state;
                match state {
                    BreakerState::HalfOpen => {
                        if self.transition(&mut inner, BreakerState::Open, TransitionKind::Reopened) {
                            inner.half_open_in_flight = 0;
                        }
                    }
                    BreakerState::Closed
                        if inner.consecutive_failures >= self.config.failure_threshold =>
                    {
                        self.transition(&mut inner, BreakerState::Open, TransitionKind::Tripped);
                    }
                    _ => {}
                }
            }
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// CallPermit
// ────────────────────────────────────────────────────────────────────────────

/// Proof of admission.  Report exactly one outcome; dropping the permit
/// without one releases its probe slot and counts nothing.
#[must_use = "report the call outcome with success() or failure()"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    probe: bool,
    settled: bool,
}

impl CallPermit<'_> {
    /// `true` if this call is a half-open probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker
            .settle(self.generation, self.probe, Some(Outcome::Success));
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker
            .settle(self.generation, self.probe, Some(Outcome::Failure));
    }
}

impl fmt::Debug for CallPermit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallPermit")
            .field("breaker", &self.breaker.name)
            .field("generation", &self.generation)
            .field("probe", &self.probe)
            .finish()
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.settle(self.generation, self.probe, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use warden_types::ManualClock;

    fn breaker(threshold: u32) -> (Arc<ManualClock>, CircuitBreaker) {
        let clock = Arc::new(ManualClock::new());
        let config = BreakerConfig {
            failure_threshold: threshold,
            recovery_timeout: Duration::from_secs(30),
            jitter_max: Duration::ZERO,
            half_open_max_calls: 1,
            success_threshold: 2,
            event_capacity: 200,
        };
        (clock.clone(), CircuitBreaker::new("dep", config, clock))
    }

    fn trip(b: &CircuitBreaker, n: u32) {
        for _ in 0..n {
            b.acquire().unwrap().failure();
        }
    }

    #[tokio::test]
    async fn opens_after_threshold_and_skips_wrapped_call() {
        let (_clock, b) = breaker(3);
        let invoked = AtomicU32::new(0);

        for _ in 0..3 {
            let r: Result<(), BreakerError<&str>> = b
                .call(|| async {
                    invoked.fetch_add(1, Ordering::SeqCst);
                    Err("boom")
                })
                .await;
            assert!(matches!(r, Err(BreakerError::Inner("boom"))));
        }
        assert_eq!(b.state(), BreakerState::Open);

        let r: Result<(), BreakerError<&str>> = b
            .call(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        let Err(BreakerError::Open(e)) = r else {
            panic!("expected CircuitOpenError");
        };
        assert_eq!(e.name, "dep");
        assert_eq!(e.consecutive_failures, 3);
        assert_eq!(invoked.load(Ordering::SeqCst), 3);
        assert_eq!(b.counters().short_circuits, 1);
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let (_clock, b) = breaker(3);
        trip(&b, 2);
        b.acquire().unwrap().success();
        trip(&b, 2);
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn stays_open_until_recovery_timeout() {
        let (clock, b) = breaker(1);
        trip(&b, 1);
        clock.advance(Duration::from_secs(29));
        assert!(b.acquire().is_err());
        assert_eq!(b.observed_state(), BreakerState::Open);
        clock.advance(Duration::from_secs(1));
        assert_eq!(b.observed_state(), BreakerState::HalfOpen);
        // observed_state is read-only.
        assert_eq!(b.state(), BreakerState::Open);
        let _probe = b.acquire().unwrap();
        assert_eq!(b.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn jitter_delays_probe_within_bound() {
        let clock = Arc::new(ManualClock::new());
        let config = BreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(10),
            jitter_max: Duration::from_secs(5),
            ..BreakerConfig::default()
        };
        let b = CircuitBreaker::new("jittery", config, clock.clone());
        trip(&b, 1);
        clock.advance(Duration::from_millis(9_999));
        assert!(b.acquire().is_err());
        clock.advance(Duration::from_millis(5_001));
        assert!(b.acquire().is_ok());
    }

    #[test]
    fn half_open_admits_bounded_probes() {
        let (clock, b) = breaker(1);
        trip(&b, 1);
        clock.advance(Duration::from_secs(30));
        let probe = b.acquire().unwrap();
        assert!(probe.is_probe());
        let err = b.acquire().unwrap_err();
        assert_eq!(err.reason, OpenReason::HalfOpenSaturated);
        assert_eq!(b.counters().half_open_rejections, 1);
        probe.success();
    }

    #[test]
    fn success_threshold_probes_close_the_breaker() {
        let (clock, b) = breaker(1);
        trip(&b, 1);
        clock.advance(Duration::from_secs(30));
        b.acquire().unwrap().success();
        assert_eq!(b.state(), BreakerState::HalfOpen);
        b.acquire().unwrap().success();
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.event_counts()[&TransitionKind::Recovered], 1);
    }

    #[test]
    fn single_probe_failure_reopens() {
        let (clock, b) = breaker(1);
        trip(&b, 1);
        clock.advance(Duration::from_secs(30));
        b.acquire().unwrap().failure();
        assert_eq!(b.state(), BreakerState::Open);
        assert!(b.acquire().is_err());
        assert_eq!(b.counters().trips, 2);
    }

    #[test]
    fn dropped_probe_frees_its_slot() {
        let (clock, b) = breaker(1);
        trip(&b, 1);
        clock.advance(Duration::from_secs(30));
        drop(b.acquire().unwrap());
        assert_eq!(b.state(), BreakerState::HalfOpen);
        assert!(b.acquire().is_ok());
    }

    #[test]
    fn stale_outcome_does_not_move_state() {
        let (clock, b) = breaker(1);
        let old = b.acquire().unwrap();
        trip(&b, 1);
        clock.advance(Duration::from_secs(30));
        let probe = b.acquire().unwrap();
        // Admitted before the trip: counted, but ignored by the state machine.
        old.failure();
        assert_eq!(b.state(), BreakerState::HalfOpen);
        probe.success();
        assert_eq!(b.counters().failures, 2);
    }

    #[tokio::test]
    async fn lock_is_free_while_the_wrapped_call_is_in_flight() {
        let (_clock, b) = breaker(3);
        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let in_flight = b.call(|| async move {
            let _ = started_tx.send(());
            let _ = release_rx.await;
            Err::<(), _>("slow dependency")
        });
        let bookkeeping = async {
            started_rx.await.unwrap();
            assert!(b.inner.try_lock().is_some());

            b.acquire().unwrap().success();
            let snap = b.snapshot(10);
            assert_eq!(snap.state, BreakerState::Closed);
            assert_eq!(snap.counters.successes, 1);
            b.reset();

            release_tx.send(()).unwrap();
        };

        let (result, ()) = tokio::join!(in_flight, bookkeeping);
        assert!(matches!(result, Err(BreakerError::Inner("slow dependency"))));
        let snap = b.snapshot(10);
        assert_eq!(snap.counters.failures, 1);
        assert_eq!(snap.consecutive_failures, 1);
        assert_eq!(snap.state, BreakerState::Closed);
    }

    #[test]
    fn reset_forces_closed_and_is_recorded() {
        let (_clock, b) = breaker(1);
        trip(&b, 1);
        b.reset();
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(b.acquire().is_ok());
        let events = b.events(10);
        assert_eq!(events[0].kind, TransitionKind::Reset);
        assert_eq!(events[0].from, BreakerState::Open);
    }

    #[test]
    fn event_ring_is_bounded_and_verifiable() {
        let clock = Arc::new(ManualClock::new());
        let config = BreakerConfig {
            failure_threshold: 1,
            jitter_max: Duration::ZERO,
            event_capacity: 4,
            ..BreakerConfig::default()
        };
        let b = CircuitBreaker::new("ring", config, clock.clone());
        for _ in 0..5 {
            trip(&b, 1);
            clock.advance(Duration::from_secs(30));
            b.acquire().unwrap().failure();
            b.reset();
        }
        assert_eq!(b.events(100).len(), 4);
        assert_eq!(b.event_counts()[&TransitionKind::Tripped], 5);
        b.verify_history().unwrap();
        assert_eq!(b.counters().illegal_transition_attempts, 0);
    }

    #[test]
    fn config_validation_rejects_zero_thresholds() {
        let config = BreakerConfig {
            failure_threshold: 0,
            ..BreakerConfig::default()
        };
        assert!(config.validate().is_err());
        BreakerConfig::default().validate().unwrap();
    }
}
