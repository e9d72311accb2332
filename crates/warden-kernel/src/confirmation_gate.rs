//! [`ConfirmationGate`] – explicit human approval before autonomous actions.
//!
//! Any action an agent proposes on its own must pass through the gate before
//! its side effects happen:
//!
//! 1. [`require_confirmation`][ConfirmationGate::require_confirmation] opens a
//!    `PENDING` requirement with a TTL and a risk level.
//! 2. A human calls [`approve`][ConfirmationGate::approve] or
//!    [`deny`][ConfirmationGate::deny].
//! 3. The executor calls
//!    [`validate_execution`][ConfirmationGate::validate_execution] immediately
//!    before acting.  This is the only way to reach `EXECUTED`, and it
//!    succeeds at most once per requirement.
//!
//! ```text
//! PENDING ──approve──▶ APPROVED ──validate_execution──▶ EXECUTED
//!    │                    │
//!    ├──deny──────────▶ DENIED
//!    └──ttl elapsed───▶ EXPIRED ◀──ttl elapsed
//! ```
//!
//! The TTL runs from `created_at` and binds an unexecuted approval too, so an
//! approval cannot be banked and spent later.  Expiry is checked lazily on
//! every access.
//!
//! Terminal requirements leave the active set and go to a bounded archive so
//! a replayed `validate_execution` can still be told *why* it failed.
//!
//! | Action | Risk |
//! |--------|------|
//! | `shell.run` | critical |
//! | `file.delete`, `email.send` | high |
//! | `file.write`, `calendar.create` | medium |
//! | `notification.send`, `web.search` | low |
//! | anything else | high |
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use warden_kernel::confirmation_gate::{ConfirmationConfig, ConfirmationGate, ConfirmationRequest};
//! use warden_types::{ManualClock, RiskLevel};
//!
//! let gate = ConfirmationGate::new(ConfirmationConfig::default(), Arc::new(ManualClock::new()));
//! let req = gate
//!     .require_confirmation(ConfirmationRequest::new("file.delete", serde_json::json!({"path": "/tmp/x"})))
//!     .unwrap();
//! assert_eq!(req.risk_level, RiskLevel::High);
//!
//! // Executing before approval is a bypass attempt.
//! assert!(gate.validate_execution(&req.requirement_id).is_err());
//!
//! gate.approve(&req.requirement_id).unwrap();
//! assert!(gate.validate_execution(&req.requirement_id).is_ok());
//! assert!(gate.validate_execution(&req.requirement_id).is_err());
//! assert_eq!(gate.stats().bypass_attempts, 2);
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;
use warden_types::{
    BoundedLog, BypassReason, Clock, ConfirmationBypassError, ConfirmationRequirement,
    ConfirmationState, ConfirmationStore, Deadline, RequirementUpdate, RiskLevel, WardenError,
};

const RISK_TABLE: &[(&str, RiskLevel)] = &[
    ("shell.run", RiskLevel::Critical),
    ("file.delete", RiskLevel::High),
    ("email.send", RiskLevel::High),
    ("file.write", RiskLevel::Medium),
    ("calendar.create", RiskLevel::Medium),
    ("notification.send", RiskLevel::Low),
    ("web.search", RiskLevel::Low),
];

/// Static action → risk lookup.  Unknown actions are treated as high risk.
pub fn risk_for(action: &str) -> RiskLevel {
    RISK_TABLE
        .iter()
        .find(|(name, _)| *name == action)
        .map(|(_, risk)| *risk)
        .unwrap_or(RiskLevel::High)
}

// ────────────────────────────────────────────────────────────────────────────
// Configuration and inputs
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationConfig {
    pub default_ttl: Duration,
    pub max_pending: usize,
    pub archive_capacity: usize,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(120),
            max_pending: 50,
            archive_capacity: 500,
        }
    }
}

/// Input to [`ConfirmationGate::require_confirmation`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmationRequest {
    pub action: String,
    pub args: Value,
    pub scene_id: Option<String>,
    pub session_id: Option<String>,
    pub correlation_id: Option<String>,
    /// Overrides the gate's default TTL.
    pub ttl: Option<Duration>,
}

impl ConfirmationRequest {
    pub fn new(action: impl Into<String>, args: Value) -> Self {
        Self {
            action: action.into(),
            args,
            scene_id: None,
            session_id: None,
            correlation_id: None,
            ttl: None,
        }
    }

    pub fn scene(mut self, scene_id: impl Into<String>) -> Self {
        self.scene_id = Some(scene_id.into());
        self
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationStats {
    pub pending: usize,
    pub approved_awaiting_execution: usize,
    pub created: u64,
    pub approved: u64,
    pub denied: u64,
    pub expired: u64,
    pub executed: u64,
    pub bypass_attempts: u64,
    pub archived: usize,
}

// ────────────────────────────────────────────────────────────────────────────
// Internal state
// ────────────────────────────────────────────────────────────────────────────

struct Entry {
    requirement: ConfirmationRequirement,
    deadline: Deadline,
}

impl Entry {
    /// An unexecuted approval is bound by the same TTL as the request.
    fn is_stale(&self, now: Instant) -> bool {
        matches!(
            self.requirement.state,
            ConfirmationState::Pending | ConfirmationState::Approved
        ) && self.deadline.is_expired(now)
    }
}

struct GateState {
    active: HashMap<String, Entry>,
    archive: BoundedLog<ConfirmationRequirement>,
    stats: ConfirmationStats,
}

/// Store writes collected under the lock and flushed after it is released.
enum StoreWrite {
    Persist(ConfirmationRequirement),
    Update(String, RequirementUpdate),
}

impl GateState {
    /// Move a requirement out of the active set and into the archive.
    fn archive(&mut self, id: &str) {
        if let Some(entry) = self.active.remove(id) {
            self.archive.push(entry.requirement);
        }
    }

    /// Lazy TTL check for one live (pending or approved) requirement.
    fn expire_one(&mut self, id: &str, clock: &dyn Clock, writes: &mut Vec<StoreWrite>) {
        let now = clock.now();
        let expired = self.active.get(id).is_some_and(|e| e.is_stale(now));
        if !expired {
            return;
        }
        let resolved_at = clock.utc();
        if let Some(entry) = self.active.get_mut(id) {
            entry.requirement.state = ConfirmationState::Expired;
            entry.requirement.resolved_at = Some(resolved_at);
        }
        self.stats.expired += 1;
        writes.push(StoreWrite::Update(
            id.to_string(),
            RequirementUpdate {
                state: ConfirmationState::Expired,
                resolved_at: Some(resolved_at),
            },
        ));
        info!(requirement_id = id, "confirmation requirement expired");
        self.archive(id);
    }

    fn expire_all(&mut self, clock: &dyn Clock, writes: &mut Vec<StoreWrite>) {
        let now = clock.now();
        let stale: Vec<String> = self
            .active
            .iter()
            .filter(|(_, e)| e.is_stale(now))
            .map(|(id, _)| id.clone())
            .collect();
        for id in stale {
            self.expire_one(&id, clock, writes);
        }
    }

    fn pending_count(&self) -> usize {
        self.active
            .values()
            .filter(|e| e.requirement.state == ConfirmationState::Pending)
            .count()
    }

    fn find_archived(&self, id: &str) -> Option<&ConfirmationRequirement> {
        self.archive.iter().rev().find(|r| r.requirement_id == id)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ConfirmationGate
// ────────────────────────────────────────────────────────────────────────────

pub struct ConfirmationGate {
    config: ConfirmationConfig,
    clock: Arc<dyn Clock>,
    store: Option<Arc<dyn ConfirmationStore>>,
    state: Mutex<GateState>,
}

impl ConfirmationGate {
    pub fn new(config: ConfirmationConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            store: None,
            state: Mutex::new(GateState {
                active: HashMap::new(),
                archive: BoundedLog::new(config.archive_capacity),
                stats: ConfirmationStats::default(),
            }),
        }
    }

    /// Attach a best-effort write-through store.
    pub fn with_store(mut self, store: Arc<dyn ConfirmationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &ConfirmationConfig {
        &self.config
    }

    /// Open a new `PENDING` requirement.
    ///
    /// # Errors
    ///
    /// [`WardenError::PendingLimitReached`] when `max_pending` live requirements
    /// already await a decision.  Stale ones are expired first.
    pub fn require_confirmation(
        &self,
        request: ConfirmationRequest,
    ) -> Result<ConfirmationRequirement, WardenError> {
        let mut writes = Vec::new();
        let result = {
            let mut state = self.state.lock();
            state.expire_all(self.clock.as_ref(), &mut writes);

            if state.pending_count() >= self.config.max_pending {
                warn!(
                    action = %request.action,
                    limit = self.config.max_pending,
                    "pending confirmation limit reached"
                );
                Err(WardenError::PendingLimitReached {
                    limit: self.config.max_pending,
                })
            } else {
                let requirement = ConfirmationRequirement {
                    requirement_id: Uuid::new_v4().to_string(),
                    risk_level: risk_for(&request.action),
                    action: request.action,
                    args: request.args,
                    scene_id: request.scene_id,
                    session_id: request.session_id,
                    correlation_id: request.correlation_id,
                    state: ConfirmationState::Pending,
                    created_at: self.clock.utc(),
                    resolved_at: None,
                };
                let ttl = request.ttl.unwrap_or(self.config.default_ttl);
                state.active.insert(
                    requirement.requirement_id.clone(),
                    Entry {
                        requirement: requirement.clone(),
                        deadline: Deadline::after(self.clock.now(), ttl),
                    },
                );
                state.stats.created += 1;
                info!(
                    requirement_id = %requirement.requirement_id,
                    action = %requirement.action,
                    risk = ?requirement.risk_level,
                    "confirmation required"
                );
                writes.push(StoreWrite::Persist(requirement.clone()));
                Ok(requirement)
            }
        };
        self.flush(writes);
        result
    }

    /// `PENDING → APPROVED`.  `None` if the requirement is missing, already
    /// resolved, or expired.
    pub fn approve(&self, requirement_id: &str) -> Option<ConfirmationRequirement> {
        let mut writes = Vec::new();
        let approved = {
            let mut state = self.state.lock();
            state.expire_one(requirement_id, self.clock.as_ref(), &mut writes);
            let now = self.clock.utc();
            match state.active.get_mut(requirement_id) {
                Some(entry) if entry.requirement.state == ConfirmationState::Pending => {
                    entry.requirement.state = ConfirmationState::Approved;
                    entry.requirement.resolved_at = Some(now);
                    let snapshot = entry.requirement.clone();
                    state.stats.approved += 1;
                    writes.push(StoreWrite::Update(
                        requirement_id.to_string(),
                        RequirementUpdate {
                            state: ConfirmationState::Approved,
                            resolved_at: Some(now),
                        },
                    ));
                    info!(requirement_id, "confirmation approved");
                    Some(snapshot)
                }
                _ => None,
            }
        };
        self.flush(writes);
        approved
    }

    /// `PENDING → DENIED`.  `false` if the requirement is missing, already
    /// resolved, or expired.
    pub fn deny(&self, requirement_id: &str, reason: &str) -> bool {
        let mut writes = Vec::new();
        let denied = {
            let mut state = self.state.lock();
            state.expire_one(requirement_id, self.clock.as_ref(), &mut writes);
            let now = self.clock.utc();
            match state.active.get_mut(requirement_id) {
                Some(entry) if entry.requirement.state == ConfirmationState::Pending => {
                    entry.requirement.state = ConfirmationState::Denied;
                    entry.requirement.resolved_at = Some(now);
                    state.stats.denied += 1;
                    state.archive(requirement_id);
                    writes.push(StoreWrite::Update(
                        requirement_id.to_string(),
                        RequirementUpdate {
                            state: ConfirmationState::Denied,
                            resolved_at: Some(now),
                        },
                    ));
                    info!(requirement_id, reason, "confirmation denied");
                    true
                }
                _ => false,
            }
        };
        self.flush(writes);
        denied
    }

    /// The enforcement chokepoint.  Call immediately before side effects.
    ///
    /// On success the requirement atomically moves `APPROVED → EXECUTED` and
    /// is archived, so the same approval can never be consumed twice.
    ///
    /// # Errors
    ///
    /// [`ConfirmationBypassError`] for anything but a live approval.  Every
    /// error increments the bypass-attempt counter.
    pub fn validate_execution(
        &self,
        requirement_id: &str,
    ) -> Result<ConfirmationRequirement, ConfirmationBypassError> {
        let mut writes = Vec::new();
        let result = {
            let mut state = self.state.lock();
            state.expire_one(requirement_id, self.clock.as_ref(), &mut writes);

            let current = state
                .active
                .get(requirement_id)
                .map(|e| e.requirement.state);

            match current {
                Some(ConfirmationState::Approved) => {
                    let now = self.clock.utc();
                    let mut executed = None;
                    if let Some(entry) = state.active.get_mut(requirement_id) {
                        entry.requirement.state = ConfirmationState::Executed;
                        entry.requirement.resolved_at = Some(now);
                        executed = Some(entry.requirement.clone());
                    }
                    state.stats.executed += 1;
                    state.archive(requirement_id);
                    writes.push(StoreWrite::Update(
                        requirement_id.to_string(),
                        RequirementUpdate {
                            state: ConfirmationState::Executed,
                            resolved_at: Some(now),
                        },
                    ));
                    info!(requirement_id, "confirmed action released for execution");
                    executed.ok_or(BypassReason::Unknown)
                }
                Some(other) => Err(BypassReason::NotApproved(other)),
                None => Err(match state.find_archived(requirement_id).map(|r| r.state) {
                    Some(ConfirmationState::Executed) => BypassReason::AlreadyExecuted,
                    Some(ConfirmationState::Expired) => BypassReason::Expired,
                    Some(other) => BypassReason::NotApproved(other),
                    None => BypassReason::Unknown,
                }),
            }
            .map_err(|reason| {
                state.stats.bypass_attempts += 1;
                error!(
                    requirement_id,
                    ?reason,
                    bypass_attempts = state.stats.bypass_attempts,
                    "confirmation bypass attempt"
                );
                ConfirmationBypassError {
                    requirement_id: requirement_id.to_string(),
                    reason,
                }
            })
        };
        self.flush(writes);
        result
    }

    /// Live `PENDING` requirements, oldest first, optionally for one session.
    pub fn get_pending(&self, session_id: Option<&str>) -> Vec<ConfirmationRequirement> {
        let mut writes = Vec::new();
        let mut pending: Vec<ConfirmationRequirement> = {
            let mut state = self.state.lock();
            state.expire_all(self.clock.as_ref(), &mut writes);
            state
                .active
                .values()
                .map(|e| &e.requirement)
                .filter(|r| r.state == ConfirmationState::Pending)
                .filter(|r| session_id.is_none_or(|s| r.session_id.as_deref() == Some(s)))
                .cloned()
                .collect()
        };
        self.flush(writes);
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        pending
    }

    /// Current view of one requirement, active or archived.  Read-only: an
    /// expired-but-unobserved requirement still reports `PENDING`.
    pub fn get(&self, requirement_id: &str) -> Option<ConfirmationRequirement> {
        let state = self.state.lock();
        state
            .active
            .get(requirement_id)
            .map(|e| e.requirement.clone())
            .or_else(|| state.find_archived(requirement_id).cloned())
    }

    /// Up to `limit` resolved requirements, most recently archived first.
    pub fn get_archived(&self, limit: usize) -> Vec<ConfirmationRequirement> {
        self.state.lock().archive.recent(limit)
    }

    pub fn bypass_attempts(&self) -> u64 {
        self.state.lock().stats.bypass_attempts
    }

    pub fn stats(&self) -> ConfirmationStats {
        let state = self.state.lock();
        let mut stats = state.stats.clone();
        stats.pending = state.pending_count();
        stats.approved_awaiting_execution = state
            .active
            .values()
            .filter(|e| e.requirement.state == ConfirmationState::Approved)
            .count();
        stats.archived = state.archive.len();
        stats
    }

    /// Reload live requirements from the attached store.  Terminal rows are
    /// ignored.  Store failures leave the gate empty.
    ///
    /// The persisted record carries no TTL, so every restored requirement
    /// gets `default_ttl` measured from its `created_at`.  A request opened
    /// with a custom TTL may therefore live longer or shorter after a restart.
    pub fn restore_requirements(&self) -> usize {
        let Some(store) = &self.store else {
            return 0;
        };
        let loaded = match store.load_requirements() {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "failed to restore confirmation requirements");
                return 0;
            }
        };

        let now = self.clock.now();
        let now_utc = self.clock.utc();
        let mut state = self.state.lock();
        let mut restored = 0;
        for requirement in loaded {
            if requirement.state.is_terminal() {
                continue;
            }
            let age = (now_utc - requirement.created_at)
                .to_std()
                .unwrap_or(Duration::ZERO);
            let start = now.checked_sub(age).unwrap_or(now);
            state.active.insert(
                requirement.requirement_id.clone(),
                Entry {
                    requirement,
                    deadline: Deadline::after(start, self.config.default_ttl),
                },
            );
            restored += 1;
        }
        info!(restored, "confirmation requirements restored");
        restored
    }

    fn flush(&self, writes: Vec<StoreWrite>) {
        let Some(store) = &self.store else {
            return;
        };
        for write in writes {
            let result = match &write {
                StoreWrite::Persist(r) => store.persist_requirement(r),
                StoreWrite::Update(id, update) => store.update_requirement(id, update),
            };
            if let Err(e) = result {
                warn!(error = %e, "confirmation store write failed; continuing in memory");
            }
        }
    }
}
