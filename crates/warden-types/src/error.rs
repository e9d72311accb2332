//! Error vocabulary shared across the workspace.
//!
//! The taxonomy is deliberately split so callers can always tell a policy
//! outcome from an infrastructure failure:
//!
//! | Kind | Types |
//! |---|---|
//! | Expected rejection | [`CircuitOpenError`] |
//! | Safety violation | [`ConfirmationBypassError`], [`WardenError::IllegalTransition`] |
//! | Degraded persistence | [`StoreError`] |
//! | Configuration | [`WardenError::Configuration`] |

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{BreakerState, ConfirmationState};

/// Why a breaker refused a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenReason {
    /// The breaker is OPEN and its recovery timeout has not elapsed.
    Open,
    /// The breaker is HALF_OPEN and every probe slot is taken.
    HalfOpenSaturated,
}

/// Returned instead of invoking the wrapped call when a breaker is open.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("circuit '{name}' is open ({consecutive_failures} consecutive failures)")]
pub struct CircuitOpenError {
    pub name: String,
    pub consecutive_failures: u32,
    pub reason: OpenReason,
}

/// Why [`ConfirmationBypassError`] was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "state", rename_all = "snake_case")]
pub enum BypassReason {
    /// No requirement with this id was ever issued.
    Unknown,
    /// The requirement's TTL elapsed before approval.
    Expired,
    /// The requirement exists but has not been approved.
    NotApproved(ConfirmationState),
    /// The approval was already consumed.
    AlreadyExecuted,
}

/// An executor tried to run an action without a live approval.
///
/// This is a safety violation, not a policy outcome: it must be propagated,
/// and every occurrence is counted by the gate.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("confirmation bypass attempt on requirement {requirement_id}: {reason:?}")]
pub struct ConfirmationBypassError {
    pub requirement_id: String,
    pub reason: BypassReason,
}

/// A durable store call failed.  Always caught at the component boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("store '{store}' failed during {operation}: {message}")]
pub struct StoreError {
    pub store: String,
    pub operation: String,
    pub message: String,
}

impl StoreError {
    pub fn new(
        store: impl Into<String>,
        operation: impl Into<String>,
        message: impl ToString,
    ) -> Self {
        Self {
            store: store.into(),
            operation: operation.into(),
            message: message.to_string(),
        }
    }
}

/// Global error type for the governance layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WardenError {
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    #[error(transparent)]
    ConfirmationBypass(#[from] ConfirmationBypassError),

    #[error("illegal breaker transition {from} -> {to}")]
    IllegalTransition { from: BreakerState, to: BreakerState },

    #[error("pending confirmation limit reached ({limit})")]
    PendingLimitReached { limit: usize },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WardenError {
    /// `true` for outcomes callers are expected to branch on.
    pub fn is_expected_rejection(&self) -> bool {
        matches!(
            self,
            WardenError::CircuitOpen(_) | WardenError::PendingLimitReached { .. }
        )
    }

    /// `true` for errors that must never be swallowed.
    pub fn is_safety_violation(&self) -> bool {
        matches!(
            self,
            WardenError::ConfirmationBypass(_) | WardenError::IllegalTransition { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circuit_open_display_names_dependency() {
        let err = CircuitOpenError {
            name: "search-api".to_string(),
            consecutive_failures: 3,
            reason: OpenReason::Open,
        };
        assert_eq!(
            err.to_string(),
            "circuit 'search-api' is open (3 consecutive failures)"
        );
    }

    #[test]
    fn warden_error_classification() {
        let open: WardenError = CircuitOpenError {
            name: "x".into(),
            consecutive_failures: 1,
            reason: OpenReason::Open,
        }
        .into();
        assert!(open.is_expected_rejection());
        assert!(!open.is_safety_violation());

        let bypass: WardenError = ConfirmationBypassError {
            requirement_id: "r1".into(),
            reason: BypassReason::Expired,
        }
        .into();
        assert!(bypass.is_safety_violation());
        assert!(!bypass.is_expected_rejection());

        let store: WardenError = StoreError::new("sqlite", "persist", "disk full").into();
        assert!(!store.is_safety_violation());
        assert!(store.to_string().contains("disk full"));
    }

    #[test]
    fn bypass_reason_serializes_with_state() {
        let reason = BypassReason::NotApproved(ConfirmationState::Pending);
        let json = serde_json::to_string(&reason).unwrap();
        assert_eq!(json, r#"{"kind":"not_approved","state":"PENDING"}"#);
    }
}
