//! [`DLQReplayPolicyEngine`] – deterministic replay decisions for dead letters.
//!
//! [`evaluate`][DLQReplayPolicyEngine::evaluate] runs an ordered list of
//! checks; the first match decides:
//!
//! | # | Check | Decision | Reason |
//! |---|-------|----------|--------|
//! | 1 | letter already replayed | `REJECT` | `ALREADY_REPLAYED` |
//! | 2 | letter manually blocked | `REJECT` | `MANUAL_BLOCK` |
//! | 3 | failure class non-retryable | `REJECT` | `FAILURE_CLASS_NON_RETRYABLE` |
//! | 4 | dependency breaker OPEN | `DEFER` | `CIRCUIT_STILL_OPEN` |
//! | 5 | per-letter cooldown active | `DEFER` | `COOLDOWN_ACTIVE` |
//! | 6 | rolling replay budget spent | `DEFER` | `BUDGET_EXHAUSTED` |
//! | 7 | otherwise | `APPROVE` | |
//!
//! A dry run never touches cooldown or budget state, so two dry runs on the
//! same inputs return identical [`ReplayTrace`]s.  A live `APPROVE` stamps
//! both.  Every evaluation, whatever its outcome, lands in a bounded trace
//! log.
//!
//! Correlation lineage ties every replay of an action back to the original
//! request so a chain of attempts can be reconstructed from either end.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use warden_types::{
    BoundedLog, BreakerState, Clock, DeadLetter, FailureClass, ReplayDecision, ReplayReason,
    SlidingWindow,
};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayConfig {
    /// Minimum gap between two live replays of the same letter.
    pub cooldown: Duration,
    /// Live replays allowed per `budget_window` across all letters.
    pub budget_max: u32,
    pub budget_window: Duration,
    pub trace_capacity: usize,
    /// Classes that are never worth replaying.  Defaults to the classes the
    /// retry taxonomy treats as terminal.
    pub non_retryable: Vec<FailureClass>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(30),
            budget_max: 10,
            budget_window: Duration::from_secs(300),
            trace_capacity: 500,
            non_retryable: vec![
                FailureClass::CircuitOpen,
                FailureClass::PolicyDenied,
                FailureClass::ValidationFailed,
            ],
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Inputs and outputs
// ─────────────────────────────────────────────────────────────────────────────

/// The facts a replay decision depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayCandidate {
    pub letter_id: String,
    pub already_replayed: bool,
    pub failure_class: FailureClass,
    pub error_code: String,
    pub correlation_id: String,
    /// State of the breaker guarding the letter's dependency, if known.
    pub breaker_state: Option<BreakerState>,
}

impl ReplayCandidate {
    pub fn from_letter(letter: &DeadLetter, breaker_state: Option<BreakerState>) -> Self {
        Self {
            letter_id: letter.letter_id.clone(),
            already_replayed: letter.replayed,
            failure_class: letter.failure_class,
            error_code: letter.error_code.clone(),
            correlation_id: letter.correlation_id.clone(),
            breaker_state,
        }
    }
}

/// Outcome of one evaluation.  Carries no timestamps so identical inputs
/// compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayTrace {
    pub letter_id: String,
    pub decision: ReplayDecision,
    pub reason: Option<ReplayReason>,
    pub dry_run: bool,
    pub failure_class: FailureClass,
    pub error_code: String,
    pub correlation_id: String,
}

impl ReplayTrace {
    pub fn is_approved(&self) -> bool {
        self.decision == ReplayDecision::Approve
    }
}

/// A trace as stored in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub seq: u64,
    pub evaluated_at: DateTime<Utc>,
    pub trace: ReplayTrace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineageStatus {
    Pending,
    Replayed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayAttempt {
    pub replay_correlation_id: String,
    pub replay_action_id: Option<String>,
}

/// Every replay descended from one original request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationLineage {
    pub original_correlation_id: String,
    pub original_action_id: String,
    pub replays: Vec<ReplayAttempt>,
    pub status: LineageStatus,
}

impl CorrelationLineage {
    /// Correlation ids in chain order, original first.
    pub fn chain(&self) -> Vec<&str> {
        std::iter::once(self.original_correlation_id.as_str())
            .chain(self.replays.iter().map(|r| r.replay_correlation_id.as_str()))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayStats {
    pub evaluations: u64,
    pub dry_runs: u64,
    pub approved: u64,
    pub rejected: u64,
    pub deferred: u64,
    pub by_reason: BTreeMap<String, u64>,
    pub budget_used: u32,
    pub budget_max: u32,
    pub blocked_letters: usize,
    pub lineages: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// DLQReplayPolicyEngine
// ─────────────────────────────────────────────────────────────────────────────

struct EngineState {
    cooldowns: HashMap<String, Instant>,
    budget: SlidingWindow,
    blocks: HashMap<String, String>,
    traces: BoundedLog<TraceRecord>,
    lineage: HashMap<String, CorrelationLineage>,
    stats: ReplayStats,
}

/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use warden_memory::replay::{DLQReplayPolicyEngine, ReplayCandidate, ReplayConfig};
/// use warden_types::{FailureClass, ManualClock, ReplayDecision, ReplayReason};
///
/// let engine = DLQReplayPolicyEngine::new(ReplayConfig::default(), Arc::new(ManualClock::new()));
/// let candidate = ReplayCandidate {
///     letter_id: "dl-1".into(),
///     already_replayed: false,
///     failure_class: FailureClass::Timeout,
///     error_code: "TIMEOUT".into(),
///     correlation_id: "corr-1".into(),
///     breaker_state: None,
/// };
///
/// assert_eq!(engine.evaluate(&candidate, true).decision, ReplayDecision::Approve);
/// assert_eq!(engine.evaluate(&candidate, false).decision, ReplayDecision::Approve);
/// assert_eq!(engine.evaluate(&candidate, true).reason, Some(ReplayReason::CooldownActive));
/// ```
pub struct DLQReplayPolicyEngine {
    config: ReplayConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<EngineState>,
}

impl DLQReplayPolicyEngine {
    pub fn new(config: ReplayConfig, clock: Arc<dyn Clock>) -> Self {
        let state = EngineState {
            cooldowns: HashMap::new(),
            budget: SlidingWindow::new(config.budget_max, config.budget_window),
            blocks: HashMap::new(),
            traces: BoundedLog::new(config.trace_capacity),
            lineage: HashMap::new(),
            stats: ReplayStats::default(),
        };
        Self {
            config,
            clock,
            state: Mutex::new(state),
        }
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// Decide whether `candidate` may be replayed now.
    pub fn evaluate(&self, candidate: &ReplayCandidate, dry_run: bool) -> ReplayTrace {
        let now = self.clock.now();
        let mut state = self.state.lock();

        let verdict = self.check(&state, candidate, now);
        let (decision, reason) = match verdict {
            Some(reason) => (Self::decision_for(reason), Some(reason)),
            None => (ReplayDecision::Approve, None),
        };

        if decision == ReplayDecision::Approve && !dry_run {
            state.cooldowns.insert(candidate.letter_id.clone(), now);
            state.budget.record(now);
        }

        let trace = ReplayTrace {
            letter_id: candidate.letter_id.clone(),
            decision,
            reason,
            dry_run,
            failure_class: candidate.failure_class,
            error_code: candidate.error_code.clone(),
            correlation_id: candidate.correlation_id.clone(),
        };

        let stats = &mut state.stats;
        stats.evaluations += 1;
        if dry_run {
            stats.dry_runs += 1;
        }
        match decision {
            ReplayDecision::Approve => stats.approved += 1,
            ReplayDecision::Reject => stats.rejected += 1,
            ReplayDecision::Defer => stats.deferred += 1,
        }
        if let Some(reason) = reason {
            *stats.by_reason.entry(reason.to_string()).or_insert(0) += 1;
        }
        let seq = state.traces.total_pushed();
        state.traces.push(TraceRecord {
            seq,
            evaluated_at: self.clock.utc(),
            trace: trace.clone(),
        });
        drop(state);

        if dry_run {
            debug!(letter_id = %trace.letter_id, %decision, ?reason, "replay dry run evaluated");
        } else {
            info!(
                letter_id = %trace.letter_id,
                correlation_id = %trace.correlation_id,
                %decision,
                ?reason,
                "replay evaluated"
            );
        }
        trace
    }

    fn check(
        &self,
        state: &EngineState,
        candidate: &ReplayCandidate,
        now: Instant,
    ) -> Option<ReplayReason> {
        if candidate.already_replayed {
            return Some(ReplayReason::AlreadyReplayed);
        }
        if state.blocks.contains_key(&candidate.letter_id) {
            return Some(ReplayReason::ManualBlock);
        }
        if self.config.non_retryable.contains(&candidate.failure_class) {
            return Some(ReplayReason::FailureClassNonRetryable);
        }
        if candidate.breaker_state == Some(BreakerState::Open) {
            return Some(ReplayReason::CircuitStillOpen);
        }
        let cooling = state
            .cooldowns
            .get(&candidate.letter_id)
            .is_some_and(|at| now.saturating_duration_since(*at) < self.config.cooldown);
        if cooling {
            return Some(ReplayReason::CooldownActive);
        }
        if state.budget.is_exhausted(now) {
            return Some(ReplayReason::BudgetExhausted);
        }
        None
    }

    fn decision_for(reason: ReplayReason) -> ReplayDecision {
        match reason {
            ReplayReason::AlreadyReplayed
            | ReplayReason::ManualBlock
            | ReplayReason::FailureClassNonRetryable => ReplayDecision::Reject,
            ReplayReason::CircuitStillOpen
            | ReplayReason::CooldownActive
            | ReplayReason::BudgetExhausted => ReplayDecision::Defer,
        }
    }

    // ── manual blocks ───────────────────────────────────────────────────────

    /// Block a letter from replay until [`unblock`][Self::unblock].
    pub fn block(&self, letter_id: &str, reason: &str) {
        self.state
            .lock()
            .blocks
            .insert(letter_id.to_string(), reason.to_string());
        info!(letter_id, reason, "replay blocked");
    }

    /// Returns `false` if the letter was not blocked.
    pub fn unblock(&self, letter_id: &str) -> bool {
        let removed = self.state.lock().blocks.remove(letter_id).is_some();
        if removed {
            info!(letter_id, "replay unblocked");
        }
        removed
    }

    /// Active blocks as `(letter_id, reason)`, sorted by id.
    pub fn blocked(&self) -> Vec<(String, String)> {
        let mut blocks: Vec<(String, String)> = self
            .state
            .lock()
            .blocks
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        blocks.sort();
        blocks
    }

    // ── lineage ─────────────────────────────────────────────────────────────

    /// Register an original request and, optionally, one replay of it.
    ///
    /// Calling with no replay ids creates a `pending` lineage (or leaves an
    /// existing one untouched).  Each call with a replay correlation id appends
    /// one attempt and marks the lineage `replayed`.
    pub fn record_lineage(
        &self,
        original_correlation_id: &str,
        original_action_id: &str,
        replay_correlation_id: Option<&str>,
        replay_action_id: Option<&str>,
    ) -> CorrelationLineage {
        let mut state = self.state.lock();
        let lineage = state
            .lineage
            .entry(original_correlation_id.to_string())
            .or_insert_with(|| CorrelationLineage {
                original_correlation_id: original_correlation_id.to_string(),
                original_action_id: original_action_id.to_string(),
                replays: Vec::new(),
                status: LineageStatus::Pending,
            });
        if let Some(replay_correlation_id) = replay_correlation_id {
            lineage.replays.push(ReplayAttempt {
                replay_correlation_id: replay_correlation_id.to_string(),
                replay_action_id: replay_action_id.map(str::to_string),
            });
            lineage.status = LineageStatus::Replayed;
        }
        lineage.clone()
    }

    pub fn get_lineage(&self, original_correlation_id: &str) -> Option<CorrelationLineage> {
        self.state
            .lock()
            .lineage
            .get(original_correlation_id)
            .cloned()
    }

    /// Look a lineage up from any correlation id in its chain.
    pub fn find_lineage(&self, correlation_id: &str) -> Option<CorrelationLineage> {
        let state = self.state.lock();
        if let Some(lineage) = state.lineage.get(correlation_id) {
            return Some(lineage.clone());
        }
        state
            .lineage
            .values()
            .find(|l| {
                l.replays
                    .iter()
                    .any(|r| r.replay_correlation_id == correlation_id)
            })
            .cloned()
    }

    // ── observability ───────────────────────────────────────────────────────

    /// Up to `limit` trace records, newest first.
    pub fn get_trace_log(&self, limit: usize) -> Vec<TraceRecord> {
        self.state.lock().traces.recent(limit)
    }

    pub fn stats(&self) -> ReplayStats {
        let now = self.clock.now();
        let state = self.state.lock();
        let mut stats = state.stats.clone();
        stats.budget_used = state.budget.used(now);
        stats.budget_max = state.budget.limit();
        stats.blocked_letters = state.blocks.len();
        stats.lineages = state.lineage.len();
        stats
    }
}
