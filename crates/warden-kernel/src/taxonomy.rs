//! [`RetryTaxonomy`] – failure classification and retry/escalate decisions.
//!
//! Classification is a pure, total function of `(error_code, error_message)`:
//!
//! 1. **Exact code match** against a static code table (case-insensitive).
//! 2. **Substring match** on the lower-cased message, first pattern wins.
//! 3. Otherwise [`FailureClass::Unknown`].
//!
//! Each [`FailureClass`] carries exactly one [`RetryPolicy`].  Coverage is
//! checked by [`RetryTaxonomy::audit`], which runs at startup and in tests,
//! never on the request path.
//!
//! # Example
//!
//! ```
//! use warden_kernel::taxonomy::{RetryDecision, RetryTaxonomy};
//! use warden_types::FailureClass;
//!
//! let taxonomy = RetryTaxonomy::standard();
//! let class = taxonomy.classify("CIRCUIT_OPEN", "");
//! assert_eq!(class, FailureClass::CircuitOpen);
//! assert_eq!(taxonomy.decide(class, 0), RetryDecision::NoRetry);
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use warden_types::{FailureClass, WardenError};

// ─────────────────────────────────────────────────────────────────────────────
// Policy table
// ─────────────────────────────────────────────────────────────────────────────

/// Retry behaviour for one failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub retryable: bool,
}

impl RetryPolicy {
    pub const fn retryable(max_attempts: u32, backoff_base_ms: u64) -> Self {
        Self {
            max_attempts,
            backoff_base_ms,
            retryable: true,
        }
    }

    pub const fn terminal() -> Self {
        Self {
            max_attempts: 0,
            backoff_base_ms: 0,
            retryable: false,
        }
    }
}

/// Default policy per class.
pub const STANDARD_POLICIES: &[(FailureClass, RetryPolicy)] = &[
    (FailureClass::ConnectionBootstrap, RetryPolicy::retryable(3, 500)),
    (FailureClass::Timeout, RetryPolicy::retryable(3, 1_000)),
    (FailureClass::CircuitOpen, RetryPolicy::terminal()),
    (FailureClass::PolicyDenied, RetryPolicy::terminal()),
    (FailureClass::ValidationFailed, RetryPolicy::terminal()),
    (FailureClass::ExecutionError, RetryPolicy::retryable(2, 250)),
    (FailureClass::Backpressure, RetryPolicy::retryable(5, 2_000)),
    (FailureClass::Unknown, RetryPolicy::retryable(1, 1_000)),
];

/// Exact error codes, compared case-insensitively.
const CODE_TABLE: &[(&str, FailureClass)] = &[
    ("CONNECTION_BOOTSTRAP", FailureClass::ConnectionBootstrap),
    ("CONNECTION_REFUSED", FailureClass::ConnectionBootstrap),
    ("CONNECTION_RESET", FailureClass::ConnectionBootstrap),
    ("ECONNREFUSED", FailureClass::ConnectionBootstrap),
    ("ECONNRESET", FailureClass::ConnectionBootstrap),
    ("DNS_FAILURE", FailureClass::ConnectionBootstrap),
    ("TIMEOUT", FailureClass::Timeout),
    ("ETIMEDOUT", FailureClass::Timeout),
    ("DEADLINE_EXCEEDED", FailureClass::Timeout),
    ("GATEWAY_TIMEOUT", FailureClass::Timeout),
    ("504", FailureClass::Timeout),
    ("CIRCUIT_OPEN", FailureClass::CircuitOpen),
    ("POLICY_DENIED", FailureClass::PolicyDenied),
    ("PERMISSION_DENIED", FailureClass::PolicyDenied),
    ("CONFIRMATION_REQUIRED", FailureClass::PolicyDenied),
    ("FORBIDDEN", FailureClass::PolicyDenied),
    ("403", FailureClass::PolicyDenied),
    ("VALIDATION_FAILED", FailureClass::ValidationFailed),
    ("INVALID_ARGUMENT", FailureClass::ValidationFailed),
    ("BAD_REQUEST", FailureClass::ValidationFailed),
    ("400", FailureClass::ValidationFailed),
    ("422", FailureClass::ValidationFailed),
    ("EXECUTION_ERROR", FailureClass::ExecutionError),
    ("INTERNAL", FailureClass::ExecutionError),
    ("500", FailureClass::ExecutionError),
    ("BACKPRESSURE", FailureClass::Backpressure),
    ("RATE_LIMITED", FailureClass::Backpressure),
    ("RESOURCE_EXHAUSTED", FailureClass::Backpressure),
    ("UNAVAILABLE", FailureClass::Backpressure),
    ("429", FailureClass::Backpressure),
    ("503", FailureClass::Backpressure),
];

/// Message fragments, checked in order against the lower-cased message.
const MESSAGE_PATTERNS: &[(&str, FailureClass)] = &[
    ("circuit open", FailureClass::CircuitOpen),
    ("circuit breaker", FailureClass::CircuitOpen),
    ("connection refused", FailureClass::ConnectionBootstrap),
    ("connection reset", FailureClass::ConnectionBootstrap),
    ("failed to connect", FailureClass::ConnectionBootstrap),
    ("name resolution", FailureClass::ConnectionBootstrap),
    ("timed out", FailureClass::Timeout),
    ("timeout", FailureClass::Timeout),
    ("deadline exceeded", FailureClass::Timeout),
    ("rate limit", FailureClass::Backpressure),
    ("too many requests", FailureClass::Backpressure),
    ("overloaded", FailureClass::Backpressure),
    ("queue full", FailureClass::Backpressure),
    ("not permitted", FailureClass::PolicyDenied),
    ("permission denied", FailureClass::PolicyDenied),
    ("policy", FailureClass::PolicyDenied),
    ("forbidden", FailureClass::PolicyDenied),
    ("validation", FailureClass::ValidationFailed),
    ("invalid", FailureClass::ValidationFailed),
    ("malformed", FailureClass::ValidationFailed),
    ("missing required", FailureClass::ValidationFailed),
    ("execution failed", FailureClass::ExecutionError),
    ("exit status", FailureClass::ExecutionError),
    ("panicked", FailureClass::ExecutionError),
];

// ─────────────────────────────────────────────────────────────────────────────
// RetryDecision
// ─────────────────────────────────────────────────────────────────────────────

/// What a caller should do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetryDecision {
    /// Try again after `backoff`.
    Retry { backoff: Duration },
    /// The class is never retryable.
    NoRetry,
    /// Retryable, but the attempt budget is spent.
    Escalate,
}

// ─────────────────────────────────────────────────────────────────────────────
// RetryTaxonomy
// ─────────────────────────────────────────────────────────────────────────────

/// Classifier plus per-class retry policies.
#[derive(Debug, Clone)]
pub struct RetryTaxonomy {
    policies: Vec<(FailureClass, RetryPolicy)>,
}

impl RetryTaxonomy {
    /// The built-in policy table.
    pub fn standard() -> Self {
        Self {
            policies: STANDARD_POLICIES.to_vec(),
        }
    }

    /// Build from an explicit policy table, rejecting incomplete or duplicated
    /// coverage.
    pub fn with_policies(policies: Vec<(FailureClass, RetryPolicy)>) -> Result<Self, WardenError> {
        let taxonomy = Self { policies };
        taxonomy.audit()?;
        Ok(taxonomy)
    }

    /// Standard table with selected classes replaced.
    pub fn with_overrides(
        overrides: &BTreeMap<FailureClass, RetryPolicy>,
    ) -> Result<Self, WardenError> {
        let policies = STANDARD_POLICIES
            .iter()
            .map(|(class, policy)| (*class, overrides.get(class).copied().unwrap_or(*policy)))
            .collect();
        Self::with_policies(policies)
    }

    /// Map a failure signal onto a [`FailureClass`].  Never fails.
    pub fn classify(&self, error_code: &str, error_message: &str) -> FailureClass {
        let code = error_code.trim();
        if !code.is_empty() {
            if let Some((_, class)) = CODE_TABLE
                .iter()
                .find(|(known, _)| known.eq_ignore_ascii_case(code))
            {
                return *class;
            }
        }

        let message = error_message.to_ascii_lowercase();
        MESSAGE_PATTERNS
            .iter()
            .find(|(fragment, _)| message.contains(fragment))
            .map(|(_, class)| *class)
            .unwrap_or(FailureClass::Unknown)
    }

    /// Policy for `class`.  Falls back to a terminal policy if the table was
    /// built without it, which [`audit`][Self::audit] prevents.
    pub fn policy(&self, class: FailureClass) -> RetryPolicy {
        self.policies
            .iter()
            .find(|(c, _)| *c == class)
            .map(|(_, p)| *p)
            .unwrap_or(RetryPolicy::terminal())
    }

    /// Decide what to do after failed attempt number `attempt` (zero-based).
    ///
    /// Backoff is `backoff_base_ms * 2^attempt`, saturating.
    pub fn decide(&self, class: FailureClass, attempt: u32) -> RetryDecision {
        let policy = self.policy(class);
        if !policy.retryable {
            return RetryDecision::NoRetry;
        }
        if attempt >= policy.max_attempts {
            return RetryDecision::Escalate;
        }
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let backoff_ms = policy.backoff_base_ms.saturating_mul(factor);
        RetryDecision::Retry {
            backoff: Duration::from_millis(backoff_ms),
        }
    }

    /// Completeness audit: every [`FailureClass`] has exactly one policy.
    pub fn audit(&self) -> Result<(), WardenError> {
        let mut problems = Vec::new();
        for class in FailureClass::ALL {
            match self.policies.iter().filter(|(c, _)| *c == class).count() {
                1 => {}
                0 => problems.push(format!("{class}: no retry policy")),
                n => problems.push(format!("{class}: {n} retry policies")),
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(WardenError::Configuration(format!(
                "retry taxonomy incomplete: {}",
                problems.join("; ")
            )))
        }
    }

    /// Snapshot of the policy table.
    pub fn policies(&self) -> &[(FailureClass, RetryPolicy)] {
        &self.policies
    }
}

impl Default for RetryTaxonomy {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn taxonomy() -> RetryTaxonomy {
        RetryTaxonomy::standard()
    }

    #[test]
    fn standard_table_passes_audit() {
        taxonomy().audit().unwrap();
    }

    #[test]
    fn every_class_has_exactly_one_policy() {
        let t = taxonomy();
        for class in FailureClass::ALL {
            assert_eq!(
                t.policies().iter().filter(|(c, _)| *c == class).count(),
                1,
                "{class}"
            );
        }
    }

    #[test]
    fn audit_rejects_missing_class() {
        let mut policies = STANDARD_POLICIES.to_vec();
        policies.retain(|(c, _)| *c != FailureClass::Backpressure);
        let err = RetryTaxonomy::with_policies(policies).unwrap_err();
        assert!(matches!(err, WardenError::Configuration(ref m) if m.contains("backpressure")));
    }

    #[test]
    fn audit_rejects_duplicate_class() {
        let mut policies = STANDARD_POLICIES.to_vec();
        policies.push((FailureClass::Timeout, RetryPolicy::retryable(9, 1)));
        assert!(RetryTaxonomy::with_policies(policies).is_err());
    }

    #[test]
    fn exact_code_wins_over_message() {
        let t = taxonomy();
        assert_eq!(
            t.classify("CIRCUIT_OPEN", "connection refused"),
            FailureClass::CircuitOpen
        );
        assert_eq!(t.classify("circuit_open", ""), FailureClass::CircuitOpen);
    }

    #[test]
    fn message_substring_fallback() {
        let t = taxonomy();
        assert_eq!(
            t.classify("", "dial tcp 10.0.0.1:443: Connection refused"),
            FailureClass::ConnectionBootstrap
        );
        assert_eq!(
            t.classify("E_WEIRD", "request timed out after 30s"),
            FailureClass::Timeout
        );
        assert_eq!(
            t.classify("", "429 Too Many Requests"),
            FailureClass::Backpressure
        );
    }

    #[test]
    fn unmatched_signal_is_unknown() {
        let t = taxonomy();
        assert_eq!(t.classify("", ""), FailureClass::Unknown);
        assert_eq!(t.classify("XYZ", "something odd"), FailureClass::Unknown);
    }

    #[test]
    fn classify_is_deterministic() {
        let t = taxonomy();
        let inputs = [
            ("TIMEOUT", ""),
            ("", "connection reset by peer"),
            ("", "totally novel"),
            ("403", "nope"),
        ];
        for (code, msg) in inputs {
            assert_eq!(t.classify(code, msg), t.classify(code, msg));
        }
    }

    #[test]
    fn non_retryable_classes_never_retry() {
        let t = taxonomy();
        for class in [
            FailureClass::CircuitOpen,
            FailureClass::PolicyDenied,
            FailureClass::ValidationFailed,
        ] {
            assert_eq!(t.decide(class, 0), RetryDecision::NoRetry);
            assert_eq!(t.decide(class, 10), RetryDecision::NoRetry);
        }
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let t = taxonomy();
        assert_eq!(
            t.decide(FailureClass::Timeout, 0),
            RetryDecision::Retry {
                backoff: Duration::from_millis(1_000)
            }
        );
        assert_eq!(
            t.decide(FailureClass::Timeout, 2),
            RetryDecision::Retry {
                backoff: Duration::from_millis(4_000)
            }
        );
    }

    #[test]
    fn exhausted_attempts_escalate() {
        let t = taxonomy();
        assert_eq!(t.decide(FailureClass::Timeout, 3), RetryDecision::Escalate);
        assert_eq!(t.decide(FailureClass::Unknown, 1), RetryDecision::Escalate);
    }

    #[test]
    fn huge_attempt_saturates_instead_of_overflowing() {
        let mut overrides = BTreeMap::new();
        overrides.insert(FailureClass::Backpressure, RetryPolicy::retryable(u32::MAX, 2_000));
        let t = RetryTaxonomy::with_overrides(&overrides).unwrap();
        assert_eq!(
            t.decide(FailureClass::Backpressure, 100),
            RetryDecision::Retry {
                backoff: Duration::from_millis(u64::MAX)
            }
        );
    }

    #[test]
    fn overrides_replace_only_named_classes() {
        let mut overrides = BTreeMap::new();
        overrides.insert(FailureClass::Unknown, RetryPolicy::terminal());
        let t = RetryTaxonomy::with_overrides(&overrides).unwrap();
        assert_eq!(t.decide(FailureClass::Unknown, 0), RetryDecision::NoRetry);
        assert_eq!(t.policy(FailureClass::Timeout), RetryPolicy::retryable(3, 1_000));
    }
}
