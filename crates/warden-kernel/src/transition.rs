//! [`TransitionMatrix`] – the legal breaker transitions as a first-class value.
//!
//! The same table is consulted by the runtime breaker before every state
//! change and by the audit path that re-verifies recorded event rings, so
//! enforcement and its own check can never drift apart.
//!
//! | From | To | Kind |
//! |------|----|------|
//! | `CLOSED` | `OPEN` | [`TransitionKind::Tripped`] |
//! | `OPEN` | `HALF_OPEN` | [`TransitionKind::ProbeStarted`] |
//! | `HALF_OPEN` | `CLOSED` | [`TransitionKind::Recovered`] |
//! | `HALF_OPEN` | `OPEN` | [`TransitionKind::Reopened`] |
//! | `OPEN` | `CLOSED` | [`TransitionKind::Reset`] |
//! | `HALF_OPEN` | `CLOSED` | [`TransitionKind::Reset`] |
//!
//! # Example
//!
//! ```
//! use warden_kernel::transition::{TransitionKind, TransitionMatrix};
//! use warden_types::BreakerState;
//!
//! let matrix = TransitionMatrix::STANDARD;
//! assert!(matrix.permits(BreakerState::Closed, BreakerState::Open, TransitionKind::Tripped));
//! assert!(matrix.check(BreakerState::Closed, BreakerState::HalfOpen, TransitionKind::ProbeStarted).is_err());
//! matrix.audit().unwrap();
//! ```

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use warden_types::{BreakerState, WardenError};

// ────────────────────────────────────────────────────────────────────────────
// TransitionKind
// ────────────────────────────────────────────────────────────────────────────

/// Why a breaker changed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    /// `failure_threshold` consecutive failures in CLOSED.
    Tripped,
    /// Recovery timeout plus jitter elapsed; first probe admitted.
    ProbeStarted,
    /// `success_threshold` probe successes.
    Recovered,
    /// A probe failed.
    Reopened,
    /// Operator-forced close.
    Reset,
}

impl TransitionKind {
    pub const ALL: [TransitionKind; 5] = [
        TransitionKind::Tripped,
        TransitionKind::ProbeStarted,
        TransitionKind::Recovered,
        TransitionKind::Reopened,
        TransitionKind::Reset,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionKind::Tripped => "tripped",
            TransitionKind::ProbeStarted => "probe_started",
            TransitionKind::Recovered => "recovered",
            TransitionKind::Reopened => "reopened",
            TransitionKind::Reset => "reset",
        }
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One legal `(from, to, kind)` triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: BreakerState,
    pub to: BreakerState,
    pub kind: TransitionKind,
}

impl Transition {
    pub const fn new(from: BreakerState, to: BreakerState, kind: TransitionKind) -> Self {
        Self { from, to, kind }
    }
}

/// Anything recorded with a `(from, to, kind)` shape, such as a breaker
/// event, can be re-verified against a matrix.
pub trait RecordedTransition {
    fn from_state(&self) -> BreakerState;
    fn to_state(&self) -> BreakerState;
    fn kind(&self) -> TransitionKind;
}

// ────────────────────────────────────────────────────────────────────────────
// TransitionMatrix
// ────────────────────────────────────────────────────────────────────────────

/// A static table of legal transitions.
#[derive(Debug, Clone, Copy)]
pub struct TransitionMatrix {
    rows: &'static [Transition],
}

const STANDARD_ROWS: &[Transition] = &[
    Transition::new(BreakerState::Closed, BreakerState::Open, TransitionKind::Tripped),
    Transition::new(BreakerState::Open, BreakerState::HalfOpen, TransitionKind::ProbeStarted),
    Transition::new(BreakerState::HalfOpen, BreakerState::Closed, TransitionKind::Recovered),
    Transition::new(BreakerState::HalfOpen, BreakerState::Open, TransitionKind::Reopened),
    Transition::new(BreakerState::Open, BreakerState::Closed, TransitionKind::Reset),
    Transition::new(BreakerState::HalfOpen, BreakerState::Closed, TransitionKind::Reset),
];

impl TransitionMatrix {
    /// The matrix every breaker in Warden runs on.
    pub const STANDARD: TransitionMatrix = TransitionMatrix { rows: STANDARD_ROWS };

    /// Build a matrix from arbitrary rows.  Mostly useful for testing the
    /// audit itself.
    pub const fn from_rows(rows: &'static [Transition]) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &'static [Transition] {
        self.rows
    }

    pub fn permits(&self, from: BreakerState, to: BreakerState, kind: TransitionKind) -> bool {
        self.rows
            .iter()
            .any(|t| t.from == from && t.to == to && t.kind == kind)
    }

    /// Like [`permits`][Self::permits] but returns
    /// [`WardenError::IllegalTransition`] on refusal.
    pub fn check(
        &self,
        from: BreakerState,
        to: BreakerState,
        kind: TransitionKind,
    ) -> Result<(), WardenError> {
        if self.permits(from, to, kind) {
            Ok(())
        } else {
            Err(WardenError::IllegalTransition { from, to })
        }
    }

    /// Structural soundness:
    ///
    /// - every state has at least one exit, so nothing is a dead end;
    /// - `CLOSED` is reachable from every state.
    pub fn audit(&self) -> Result<(), WardenError> {
        let mut problems = Vec::new();

        for state in BreakerState::ALL {
            if !self.rows.iter().any(|t| t.from == state) {
                problems.push(format!("{state} has no exit"));
            }
            if !self.reaches(state, BreakerState::Closed) {
                problems.push(format!("{state} cannot reach CLOSED"));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(WardenError::Configuration(format!(
                "breaker transition matrix unsound: {}",
                problems.join("; ")
            )))
        }
    }

    /// Re-check a recorded event sequence: every event must be a legal row and
    /// consecutive events must chain (`prev.to == next.from`).
    pub fn verify_events<'a, E, I>(&self, events: I) -> Result<(), WardenError>
    where
        E: RecordedTransition + 'a,
        I: IntoIterator<Item = &'a E>,
    {
        let mut previous: Option<BreakerState> = None;
        for event in events {
            let (from, to) = (event.from_state(), event.to_state());
            self.check(from, to, event.kind())?;
            if let Some(prev_to) = previous {
                if prev_to != from {
                    return Err(WardenError::IllegalTransition { from: prev_to, to: from });
                }
            }
            previous = Some(to);
        }
        Ok(())
    }

    fn reaches(&self, start: BreakerState, goal: BreakerState) -> bool {
        let mut seen = BTreeSet::new();
        let mut frontier = vec![start];
        while let Some(state) = frontier.pop() {
            if state == goal {
                return true;
            }
            if !seen.insert(state) {
                continue;
            }
            frontier.extend(self.rows.iter().filter(|t| t.from == state).map(|t| t.to));
        }
        false
    }
}

impl Default for TransitionMatrix {
    fn default() -> Self {
        Self::STANDARD
    }
}
