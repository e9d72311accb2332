//! [`RecoveryPolicyEngine`] – `(ServiceState, RecoveryTrigger) → RecoveryAction`.
//!
//! The engine never probes health and never executes anything.  It consumes
//! state reported by an external supervisor and answers one question: *which
//! action, and is it allowed right now?*
//!
//! ```text
//! decide(service, state, trigger)
//!   │
//!   ├─ no row for (state, trigger)          → NO_ACTION, allowed = false
//!   ├─ cooldown(service+state+trigger) live → allowed = false, remaining time
//!   ├─ RESTART_SERVICE and budget exhausted → allowed = false
//!   └─ otherwise: mark cooldown (+ budget)  → allowed = true
//! ```
//!
//! Every decision, allowed or not, is appended to a bounded decision log.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use warden_types::{
    BoundedLog, Clock, RecoveryAction, RecoveryTrigger, ServiceState, SlidingWindow, WardenError,
};

// ────────────────────────────────────────────────────────────────────────────
// Rule table
// ────────────────────────────────────────────────────────────────────────────

/// One row of the decision table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryRule {
    pub state: ServiceState,
    pub trigger: RecoveryTrigger,
    pub action: RecoveryAction,
    pub cooldown: Duration,
    /// How many times the caller may retry the action itself.
    pub max_retries: u32,
    /// Base delay between those retries.
    pub backoff_base: Duration,
    pub description: &'static str,
}

const fn rule(
    state: ServiceState,
    trigger: RecoveryTrigger,
    action: RecoveryAction,
    cooldown_secs: u64,
    max_retries: u32,
    backoff_base_secs: u64,
    description: &'static str,
) -> RecoveryRule {
    RecoveryRule {
        state,
        trigger,
        action,
        cooldown: Duration::from_secs(cooldown_secs),
        max_retries,
        backoff_base: Duration::from_secs(backoff_base_secs),
        description,
    }
}

use RecoveryAction as A;
use RecoveryTrigger as T;
use ServiceState as S;

/// The built-in decision table.
#[rustfmt::skip]
pub const STANDARD_RULES: &[RecoveryRule] = &[
    rule(S::Healthy, T::HealthCheckFailed, A::MarkDegraded, 30, 0, 0,
        "first failed health check; mark degraded and keep serving"),
    rule(S::Healthy, T::LatencyHigh, A::ShedLoad, 60, 0, 0,
        "latency above threshold; shed non-critical load"),
    rule(S::Degraded, T::HealthCheckFailed, A::RestartService, 60, 2, 5,
        "degraded service still failing health checks; restart"),
    rule(S::Degraded, T::ErrorRateHigh, A::ShedLoad, 60, 0, 0,
        "error rate high while degraded; shed load"),
    rule(S::Degraded, T::CircuitOpened, A::FailoverProvider, 30, 1, 2,
        "dependency circuit opened; fail over to the secondary provider"),
    rule(S::Unhealthy, T::HealthCheckFailed, A::RestartService, 60, 3, 5,
        "unhealthy service failing health checks; restart"),
    rule(S::Unhealthy, T::ProcessCrashed, A::RestartService, 15, 3, 2,
        "process crashed; restart immediately"),
    rule(S::Unhealthy, T::CircuitOpened, A::FailoverProvider, 30, 1, 2,
        "unhealthy with open circuit; fail over"),
    rule(S::Recovering, T::HealthCheckFailed, A::EscalateOperator, 300, 0, 0,
        "recovery attempt failed; page an operator"),
    rule(S::Recovering, T::HealthCheckPassed, A::ResetCircuit, 10, 0, 0,
        "recovery confirmed; close the dependency circuit"),
    rule(S::Failed, T::ProcessCrashed, A::EscalateOperator, 300, 0, 0,
        "failed service crashed again; page an operator"),
    rule(S::Failed, T::HealthCheckFailed, A::EscalateOperator, 300, 0, 0,
        "failed service still down; page an operator"),
];

// ────────────────────────────────────────────────────────────────────────────
// Decisions
// ────────────────────────────────────────────────────────────────────────────

/// Why a decision was not allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DenyReason {
    NoMatchingRule,
    CooldownActive { remaining_ms: u64 },
    RestartBudgetExhausted { used: u32, max: u32 },
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::NoMatchingRule => write!(f, "no recovery rule for this state and trigger"),
            DenyReason::CooldownActive { remaining_ms } => {
                write!(f, "cooldown active, {:.1}s remaining", *remaining_ms as f64 / 1000.0)
            }
            DenyReason::RestartBudgetExhausted { used, max } => {
                write!(f, "restart budget exhausted ({used}/{max} in window)")
            }
        }
    }
}

/// Result of [`RecoveryPolicyEngine::decide`].  Also the decision-log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryDecision {
    pub service: String,
    pub state: ServiceState,
    pub trigger: RecoveryTrigger,
    pub action: RecoveryAction,
    pub allowed: bool,
    pub deny_reason: Option<DenyReason>,
    pub description: String,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub decided_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryConfig {
    pub max_restarts: u32,
    pub restart_window: Duration,
    pub decision_log_capacity: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_restarts: 3,
            restart_window: Duration::from_secs(600),
            decision_log_capacity: 500,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryStats {
    pub decisions: u64,
    pub allowed: u64,
    pub denied_no_rule: u64,
    pub denied_cooldown: u64,
    pub denied_budget: u64,
    pub active_cooldowns: usize,
}

// ────────────────────────────────────────────────────────────────────────────
// RestartBudget
// ────────────────────────────────────────────────────────────────────────────

/// Per-service rolling cap on `RESTART_SERVICE` grants.
#[derive(Debug, Clone)]
pub struct RestartBudget {
    max_restarts: u32,
    window: Duration,
    per_service: HashMap<String, SlidingWindow>,
}

impl RestartBudget {
    pub fn new(max_restarts: u32, window: Duration) -> Self {
        Self {
            max_restarts,
            window,
            per_service: HashMap::new(),
        }
    }

    pub fn used(&self, service: &str, now: Instant) -> u32 {
        self.per_service.get(service).map_or(0, |w| w.used(now))
    }

    pub fn is_exhausted(&self, service: &str, now: Instant) -> bool {
        self.used(service, now) >= self.max_restarts
    }

    /// Consume one restart.  Returns `false` if none is left.
    pub fn try_consume(&mut self, service: &str, now: Instant) -> bool {
        let (max, window) = (self.max_restarts, self.window);
        self.per_service
            .entry(service.to_string())
            .or_insert_with(|| SlidingWindow::new(max, window))
            .try_record(now)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// RecoveryPolicyEngine
// ────────────────────────────────────────────────────────────────────────────

type CooldownKey = (String, ServiceState, RecoveryTrigger);

struct EngineState {
    cooldowns: HashMap<CooldownKey, Instant>,
    budget: RestartBudget,
    log: BoundedLog<RecoveryDecision>,
    stats: RecoveryStats,
}

/// Stateful wrapper around the static rule table.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use warden_kernel::recovery::{RecoveryConfig, RecoveryPolicyEngine};
/// use warden_types::{ManualClock, RecoveryAction, RecoveryTrigger, ServiceState};
///
/// let engine = RecoveryPolicyEngine::new(RecoveryConfig::default(), Arc::new(ManualClock::new()));
///
/// let d = engine.decide("tts", ServiceState::Healthy, RecoveryTrigger::HealthCheckFailed);
/// assert!(d.allowed);
/// assert_eq!(d.action, RecoveryAction::MarkDegraded);
///
/// // Same key again inside the 30 s cooldown.
/// let d = engine.decide("tts", ServiceState::Healthy, RecoveryTrigger::HealthCheckFailed);
/// assert!(!d.allowed);
/// ```
pub struct RecoveryPolicyEngine {
    rules: Vec<RecoveryRule>,
    clock: Arc<dyn Clock>,
    state: Mutex<EngineState>,
}

impl RecoveryPolicyEngine {
    pub fn new(config: RecoveryConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            rules: STANDARD_RULES.to_vec(),
            clock,
            state: Mutex::new(EngineState {
                cooldowns: HashMap::new(),
                budget: RestartBudget::new(config.max_restarts, config.restart_window),
                log: BoundedLog::new(config.decision_log_capacity),
                stats: RecoveryStats::default(),
            }),
        }
    }

    /// Replace the rule table.  Rejects tables with duplicate rows.
    pub fn with_rules(mut self, rules: Vec<RecoveryRule>) -> Result<Self, WardenError> {
        audit_rules(&rules)?;
        self.rules = rules;
        Ok(self)
    }

    pub fn rules(&self) -> &[RecoveryRule] {
        &self.rules
    }

    pub fn rule_for(&self, state: ServiceState, trigger: RecoveryTrigger) -> Option<&RecoveryRule> {
        self.rules
            .iter()
            .find(|r| r.state == state && r.trigger == trigger)
    }

    pub fn decide(
        &self,
        service: &str,
        state: ServiceState,
        trigger: RecoveryTrigger,
    ) -> RecoveryDecision {
        let now = self.clock.now();
        let mut decision = RecoveryDecision {
            service: service.to_string(),
            state,
            trigger,
            action: RecoveryAction::NoAction,
            allowed: false,
            deny_reason: None,
            description: String::new(),
            max_retries: 0,
            backoff_base_ms: 0,
            decided_at: self.clock.utc(),
        };

        let mut inner = self.state.lock();
        inner.stats.decisions += 1;

        let Some(rule) = self.rule_for(state, trigger) else {
            decision.deny_reason = Some(DenyReason::NoMatchingRule);
            decision.description = format!("no rule for {state} + {trigger}");
            inner.stats.denied_no_rule += 1;
            debug!(service, %state, %trigger, "no recovery rule");
            inner.log.push(decision.clone());
            return decision;
        };

        decision.action = rule.action;
        decision.description = rule.description.to_string();
        decision.max_retries = rule.max_retries;
        decision.backoff_base_ms = u64::try_from(rule.backoff_base.as_millis()).unwrap_or(u64::MAX);

        let key = (service.to_string(), state, trigger);
        if let Some(last) = inner.cooldowns.get(&key).copied() {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < rule.cooldown {
                let remaining = rule.cooldown - elapsed;
                let remaining_ms = u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX);
                decision.deny_reason = Some(DenyReason::CooldownActive { remaining_ms });
                inner.stats.denied_cooldown += 1;
                debug!(service, %state, %trigger, remaining_ms, "recovery action in cooldown");
                inner.log.push(decision.clone());
                return decision;
            }
        }

        if rule.action == RecoveryAction::RestartService && !inner.budget.try_consume(service, now)
        {
            let used = inner.budget.used(service, now);
            decision.deny_reason = Some(DenyReason::RestartBudgetExhausted {
                used,
                max: inner.budget.max_restarts,
            });
            inner.stats.denied_budget += 1;
            info!(service, used, "restart budget exhausted");
            inner.log.push(decision.clone());
            return decision;
        }

        inner.cooldowns.insert(key, now);
        decision.allowed = true;
        inner.stats.allowed += 1;
        info!(service, %state, %trigger, action = %rule.action, "recovery action allowed");
        inner.log.push(decision.clone());
        decision
    }

    /// Up to `limit` decisions, newest first.
    pub fn get_decision_log(&self, limit: usize) -> Vec<RecoveryDecision> {
        self.state.lock().log.recent(limit)
    }

    pub fn restarts_used(&self, service: &str) -> u32 {
        let now = self.clock.now();
        self.state.lock().budget.used(service, now)
    }

    pub fn stats(&self) -> RecoveryStats {
        let now = self.clock.now();
        let inner = self.state.lock();
        let mut stats = inner.stats.clone();
        stats.active_cooldowns = inner
            .cooldowns
            .iter()
            .filter(|((_, state, trigger), at)| {
                self.rule_for(*state, *trigger)
                    .is_some_and(|r| now.saturating_duration_since(**at) < r.cooldown)
            })
            .count();
        stats
    }

    /// Table audit: no `(state, trigger)` row appears twice.
    pub fn audit_table(&self) -> Result<(), WardenError> {
        audit_rules(&self.rules)
    }
}

fn audit_rules(rules: &[RecoveryRule]) -> Result<(), WardenError> {
    let mut duplicates = Vec::new();
    for (i, r) in rules.iter().enumerate() {
        if rules[..i]
            .iter()
            .any(|other| other.state == r.state && other.trigger == r.trigger)
        {
            duplicates.push(format!("{} + {}", r.state, r.trigger));
        }
    }
    if duplicates.is_empty() {
        Ok(())
    } else {
        Err(WardenError::Configuration(format!(
            "duplicate recovery rules: {}",
            duplicates.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_types::ManualClock;

    fn engine() -> (Arc<ManualClock>, RecoveryPolicyEngine) {
        let clock = Arc::new(ManualClock::new());
        let engine = RecoveryPolicyEngine::new(RecoveryConfig::default(), clock.clone());
        (clock, engine)
    }

    #[test]
    fn standard_table_has_no_duplicates() {
        let (_, e) = engine();
        e.audit_table().unwrap();
    }

    #[test]
    fn missing_rows_are_no_action_and_not_allowed() {
        let (_, e) = engine();
        for state in ServiceState::ALL {
            for trigger in RecoveryTrigger::ALL {
                if e.rule_for(state, trigger).is_some() {
                    continue;
                }
                let d = e.decide("svc", state, trigger);
                assert_eq!(d.action, RecoveryAction::NoAction);
                assert!(!d.allowed);
                assert_eq!(d.deny_reason, Some(DenyReason::NoMatchingRule));
            }
        }
    }

    #[test]
    fn cooldown_blocks_second_decision_with_remaining_time() {
        let (clock, e) = engine();
        let first = e.decide("svc", ServiceState::Healthy, RecoveryTrigger::HealthCheckFailed);
        assert!(first.allowed);

        clock.advance(Duration::from_secs(10));
        let second = e.decide("svc", ServiceState::Healthy, RecoveryTrigger::HealthCheckFailed);
        assert!(!second.allowed);
        assert_eq!(
            second.deny_reason,
            Some(DenyReason::CooldownActive { remaining_ms: 20_000 })
        );

        clock.advance(Duration::from_secs(20));
        assert!(e.decide("svc", ServiceState::Healthy, RecoveryTrigger::HealthCheckFailed).allowed);
    }

    #[test]
    fn cooldown_is_keyed_per_service() {
        let (_, e) = engine();
        assert!(e.decide("a", ServiceState::Healthy, RecoveryTrigger::LatencyHigh).allowed);
        assert!(e.decide("b", ServiceState::Healthy, RecoveryTrigger::LatencyHigh).allowed);
    }

    #[test]
    fn restart_budget_caps_restarts_in_window() {
        let (clock, e) = engine();
        let mut granted = 0;
        for _ in 0..6 {
            let d = e.decide("llm", ServiceState::Unhealthy, RecoveryTrigger::ProcessCrashed);
            if d.allowed {
                granted += 1;
            }
            clock.advance(Duration::from_secs(16));
        }
        assert_eq!(granted, 3);
        assert_eq!(e.restarts_used("llm"), 3);

        let last = e.get_decision_log(1).remove(0);
        assert!(matches!(
            last.deny_reason,
            Some(DenyReason::RestartBudgetExhausted { used: 3, max: 3 })
        ));

        clock.advance(Duration::from_secs(600));
        assert!(e.decide("llm", ServiceState::Unhealthy, RecoveryTrigger::ProcessCrashed).allowed);
    }

    #[test]
    fn denied_restart_does_not_start_cooldown() {
        let config = RecoveryConfig {
            max_restarts: 0,
            ..RecoveryConfig::default()
        };
        let clock = Arc::new(ManualClock::new());
        let e = RecoveryPolicyEngine::new(config, clock);
        let d = e.decide("x", ServiceState::Unhealthy, RecoveryTrigger::ProcessCrashed);
        assert!(!d.allowed);
        let d = e.decide("x", ServiceState::Unhealthy, RecoveryTrigger::ProcessCrashed);
        assert!(matches!(d.deny_reason, Some(DenyReason::RestartBudgetExhausted { .. })));
        assert_eq!(e.stats().active_cooldowns, 0);
    }

    #[test]
    fn every_decision_is_logged() {
        let (_, e) = engine();
        e.decide("s", ServiceState::Healthy, RecoveryTrigger::HealthCheckFailed);
        e.decide("s", ServiceState::Healthy, RecoveryTrigger::HealthCheckFailed);
        e.decide("s", ServiceState::Failed, RecoveryTrigger::HealthCheckPassed);
        let log = e.get_decision_log(10);
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].action, RecoveryAction::NoAction);
        let stats = e.stats();
        assert_eq!(stats.decisions, 3);
        assert_eq!(stats.allowed, 1);
        assert_eq!(stats.denied_cooldown, 1);
        assert_eq!(stats.denied_no_rule, 1);
    }

    #[test]
    fn with_rules_rejects_duplicates() {
        let (_, e) = engine();
        let mut rules = STANDARD_RULES.to_vec();
        rules.push(STANDARD_RULES[0]);
        let err = e.with_rules(rules).err().unwrap();
        assert!(matches!(err, WardenError::Configuration(m) if m.contains("HEALTHY + HEALTH_CHECK_FAILED")));
    }
}
