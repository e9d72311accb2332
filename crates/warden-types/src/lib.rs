//! `warden-types` – shared vocabulary for the Warden control plane.
//!
//! Every crate in the workspace speaks in the enums defined here: the failure
//! taxonomy, breaker and service states, recovery triggers/actions, replay
//! decisions and confirmation states.  The persisted audit record shapes live
//! in [`records`], the injected durable-store contracts in [`store`], and the
//! time source every component reads from in [`clock`].

pub mod clock;
pub mod error;
pub mod history;
pub mod records;
pub mod store;

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use clock::{Clock, Deadline, ManualClock, SystemClock};
pub use error::{
    BypassReason, CircuitOpenError, ConfirmationBypassError, OpenReason, StoreError, WardenError,
};
pub use history::{BoundedLog, SlidingWindow};
pub use records::{ConfirmationRequirement, DeadLetter};
pub use store::{ConfirmationStore, DeadLetterStore, DeadLetterUpdate, RequirementUpdate};

// ─────────────────────────────────────────────────────────────────────────────
// FailureClass
// ─────────────────────────────────────────────────────────────────────────────

/// Why an operation failed.  Drives the retry policy and replay eligibility.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// The dependency could not be reached at all (refused, reset, DNS).
    ConnectionBootstrap,
    /// The dependency was reached but did not answer in time.
    Timeout,
    /// A circuit breaker short-circuited the call.
    CircuitOpen,
    /// A policy layer refused the action.
    PolicyDenied,
    /// The request itself was malformed.
    ValidationFailed,
    /// The dependency ran the action and it failed.
    ExecutionError,
    /// The dependency asked callers to slow down.
    Backpressure,
    /// Nothing matched.
    Unknown,
}

impl FailureClass {
    /// Every variant, in declaration order.
    pub const ALL: [FailureClass; 8] = [
        FailureClass::ConnectionBootstrap,
        FailureClass::Timeout,
        FailureClass::CircuitOpen,
        FailureClass::PolicyDenied,
        FailureClass::ValidationFailed,
        FailureClass::ExecutionError,
        FailureClass::Backpressure,
        FailureClass::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::ConnectionBootstrap => "connection_bootstrap",
            FailureClass::Timeout => "timeout",
            FailureClass::CircuitOpen => "circuit_open",
            FailureClass::PolicyDenied => "policy_denied",
            FailureClass::ValidationFailed => "validation_failed",
            FailureClass::ExecutionError => "execution_error",
            FailureClass::Backpressure => "backpressure",
            FailureClass::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureClass {
    type Err = WardenError;

    /// Accepts both `"timeout"` and `"TIMEOUT"` spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        FailureClass::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| WardenError::Configuration(format!("unknown failure class: {s}")))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// BreakerState
// ─────────────────────────────────────────────────────────────────────────────

/// Circuit breaker state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    /// Calls pass; failures are counted.
    Closed,
    /// Calls are rejected immediately.
    Open,
    /// A bounded number of probe calls are admitted.
    HalfOpen,
}

impl BreakerState {
    pub const ALL: [BreakerState; 3] = [
        BreakerState::Closed,
        BreakerState::Open,
        BreakerState::HalfOpen,
    ];
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "CLOSED"),
            BreakerState::Open => write!(f, "OPEN"),
            BreakerState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Recovery vocabulary
// ─────────────────────────────────────────────────────────────────────────────

/// Health of a supervised service, as reported by the external supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceState {
    Healthy,
    Degraded,
    Unhealthy,
    Recovering,
    Failed,
}

impl ServiceState {
    pub const ALL: [ServiceState; 5] = [
        ServiceState::Healthy,
        ServiceState::Degraded,
        ServiceState::Unhealthy,
        ServiceState::Recovering,
        ServiceState::Failed,
    ];
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceState::Healthy => "HEALTHY",
            ServiceState::Degraded => "DEGRADED",
            ServiceState::Unhealthy => "UNHEALTHY",
            ServiceState::Recovering => "RECOVERING",
            ServiceState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Event that prompts a recovery decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryTrigger {
    HealthCheckFailed,
    HealthCheckPassed,
    ErrorRateHigh,
    LatencyHigh,
    CircuitOpened,
    ProcessCrashed,
}

impl RecoveryTrigger {
    pub const ALL: [RecoveryTrigger; 6] = [
        RecoveryTrigger::HealthCheckFailed,
        RecoveryTrigger::HealthCheckPassed,
        RecoveryTrigger::ErrorRateHigh,
        RecoveryTrigger::LatencyHigh,
        RecoveryTrigger::CircuitOpened,
        RecoveryTrigger::ProcessCrashed,
    ];
}

impl fmt::Display for RecoveryTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecoveryTrigger::HealthCheckFailed => "HEALTH_CHECK_FAILED",
            RecoveryTrigger::HealthCheckPassed => "HEALTH_CHECK_PASSED",
            RecoveryTrigger::ErrorRateHigh => "ERROR_RATE_HIGH",
            RecoveryTrigger::LatencyHigh => "LATENCY_HIGH",
            RecoveryTrigger::CircuitOpened => "CIRCUIT_OPENED",
            RecoveryTrigger::ProcessCrashed => "PROCESS_CRASHED",
        };
        f.write_str(s)
    }
}

/// What the caller should do in response to a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryAction {
    NoAction,
    MarkDegraded,
    ShedLoad,
    RestartService,
    FailoverProvider,
    ResetCircuit,
    EscalateOperator,
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecoveryAction::NoAction => "NO_ACTION",
            RecoveryAction::MarkDegraded => "MARK_DEGRADED",
            RecoveryAction::ShedLoad => "SHED_LOAD",
            RecoveryAction::RestartService => "RESTART_SERVICE",
            RecoveryAction::FailoverProvider => "FAILOVER_PROVIDER",
            RecoveryAction::ResetCircuit => "RESET_CIRCUIT",
            RecoveryAction::EscalateOperator => "ESCALATE_OPERATOR",
        };
        f.write_str(s)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Replay vocabulary
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of a replay policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplayDecision {
    Approve,
    Reject,
    Defer,
}

/// Why a replay was rejected or deferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplayReason {
    AlreadyReplayed,
    ManualBlock,
    FailureClassNonRetryable,
    CircuitStillOpen,
    CooldownActive,
    BudgetExhausted,
}

impl fmt::Display for ReplayDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReplayDecision::Approve => "APPROVE",
            ReplayDecision::Reject => "REJECT",
            ReplayDecision::Defer => "DEFER",
        };
        f.write_str(s)
    }
}

impl fmt::Display for ReplayReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReplayReason::AlreadyReplayed => "ALREADY_REPLAYED",
            ReplayReason::ManualBlock => "MANUAL_BLOCK",
            ReplayReason::FailureClassNonRetryable => "FAILURE_CLASS_NON_RETRYABLE",
            ReplayReason::CircuitStillOpen => "CIRCUIT_STILL_OPEN",
            ReplayReason::CooldownActive => "COOLDOWN_ACTIVE",
            ReplayReason::BudgetExhausted => "BUDGET_EXHAUSTED",
        };
        f.write_str(s)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Confirmation vocabulary
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle of a confirmation requirement.
///
/// `Pending → {Approved, Denied, Expired}`, `Approved → {Executed, Expired}`.
/// Nothing else is legal; see [`ConfirmationState::can_transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfirmationState {
    Pending,
    Approved,
    Denied,
    Expired,
    Executed,
}

impl ConfirmationState {
    /// `true` for the legal edges of the confirmation state machine.
    pub fn can_transition_to(self, next: ConfirmationState) -> bool {
        use ConfirmationState::*;
        matches!(
            (self, next),
            (Pending, Approved)
                | (Pending, Denied)
                | (Pending, Expired)
                | (Approved, Executed)
                | (Approved, Expired)
        )
    }

    /// Denied, Expired and Executed end the requirement's life.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConfirmationState::Denied | ConfirmationState::Expired | ConfirmationState::Executed
        )
    }
}

impl fmt::Display for ConfirmationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConfirmationState::Pending => "PENDING",
            ConfirmationState::Approved => "APPROVED",
            ConfirmationState::Denied => "DENIED",
            ConfirmationState::Expired => "EXPIRED",
            ConfirmationState::Executed => "EXECUTED",
        };
        f.write_str(s)
    }
}

/// How dangerous an action is if executed without a human looking at it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_class_parses_both_spellings() {
        assert_eq!("timeout".parse::<FailureClass>().unwrap(), FailureClass::Timeout);
        assert_eq!(
            "CIRCUIT_OPEN".parse::<FailureClass>().unwrap(),
            FailureClass::CircuitOpen
        );
        assert!("nonsense".parse::<FailureClass>().is_err());
    }

    #[test]
    fn failure_class_serializes_snake_case() {
        let json = serde_json::to_string(&FailureClass::ConnectionBootstrap).unwrap();
        assert_eq!(json, "\"connection_bootstrap\"");
        for class in FailureClass::ALL {
            let json = serde_json::to_string(&class).unwrap();
            assert_eq!(json, format!("\"{}\"", class.as_str()));
        }
    }

    #[test]
    fn breaker_state_display_matches_wire_name() {
        for state in BreakerState::ALL {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{state}\""));
        }
    }

    #[test]
    fn confirmation_state_machine_edges() {
        use ConfirmationState::*;
        assert!(Pending.can_transition_to(Approved));
        assert!(Pending.can_transition_to(Denied));
        assert!(Pending.can_transition_to(Expired));
        assert!(Approved.can_transition_to(Executed));
        assert!(Approved.can_transition_to(Expired));

        assert!(!Pending.can_transition_to(Executed));
        assert!(!Approved.can_transition_to(Denied));
        assert!(!Executed.can_transition_to(Executed));
        assert!(!Denied.can_transition_to(Approved));
        assert!(!Expired.can_transition_to(Approved));
    }

    #[test]
    fn terminal_states() {
        assert!(!ConfirmationState::Pending.is_terminal());
        assert!(!ConfirmationState::Approved.is_terminal());
        assert!(ConfirmationState::Denied.is_terminal());
        assert!(ConfirmationState::Expired.is_terminal());
        assert!(ConfirmationState::Executed.is_terminal());
    }

    #[test]
    fn risk_levels_are_ordered() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::High < RiskLevel::Critical);
    }
}
