//! `warden-runtime` – wiring the governance components into one process.
//!
//! # Modules
//!
//! - [`context`] – [`GovernanceContext`][context::GovernanceContext]: builds
//!   and owns every component from a single
//!   [`GovernanceConfig`][context::GovernanceConfig], runs the startup audits.
//! - [`executor`] – [`GovernedExecutor`][executor::GovernedExecutor]: the
//!   confirm → breaker → retry → dead-letter pipeline, plus live replay.
//! - [`telemetry`] – tracing subscriber and optional OTLP export.

pub mod context;
pub mod executor;
pub mod telemetry;

pub use context::{AuditCheck, AuditReport, GovernanceConfig, GovernanceContext, GovernanceStats};
pub use executor::{
    ActionFailure, ActionRequest, AttemptContext, ExecutionError, GovernedExecutor, ReplayOutcome,
};
pub use telemetry::{TelemetryConfig, TracerProviderGuard, init_tracing};
