//! `warden-kernel` – Decision engines of the control plane.
//!
//! Everything in this crate is synchronous bookkeeping behind short-lived
//! locks.  The only suspension point is the wrapped call inside
//! [`CircuitBreaker::call`], and it never runs under a lock.
//!
//! # Modules
//!
//! - [`taxonomy`] – [`RetryTaxonomy`][taxonomy::RetryTaxonomy]: classifies a
//!   failure signal into one of eight [`FailureClass`][warden_types::FailureClass]es
//!   and decides retry, no-retry or escalate.
//! - [`transition`] – [`TransitionMatrix`][transition::TransitionMatrix]: the
//!   legal breaker transitions, shared by enforcement and audit.
//! - [`breaker`] – [`CircuitBreaker`][breaker::CircuitBreaker]: per-dependency
//!   CLOSED/OPEN/HALF_OPEN guard with jittered re-probing.
//! - [`registry`] – [`BreakerRegistry`][registry::BreakerRegistry]: lazily
//!   creates one breaker per dependency name.
//! - [`recovery`] – [`RecoveryPolicyEngine`][recovery::RecoveryPolicyEngine]:
//!   `(state, trigger) → action` table with cooldowns and a restart budget.
//! - [`confirmation_gate`] – [`ConfirmationGate`][confirmation_gate::ConfirmationGate]:
//!   one-shot human approval for autonomously proposed actions.

pub mod breaker;
pub mod confirmation_gate;
pub mod recovery;
pub mod registry;
pub mod taxonomy;
pub mod transition;

pub use breaker::{
    BreakerConfig, BreakerCounters, BreakerError, BreakerEvent, BreakerSnapshot, CallPermit,
    CircuitBreaker,
};
pub use confirmation_gate::{
    ConfirmationConfig, ConfirmationGate, ConfirmationRequest, ConfirmationStats, risk_for,
};
pub use recovery::{
    DenyReason, RecoveryConfig, RecoveryDecision, RecoveryPolicyEngine, RecoveryRule,
    RecoveryStats, RestartBudget,
};
pub use registry::BreakerRegistry;
pub use taxonomy::{RetryDecision, RetryPolicy, RetryTaxonomy};
pub use transition::{Transition, TransitionKind, TransitionMatrix};
