//! `warden-memory` – Holding and replaying failed work.
//!
//! Keeps actions that failed beyond recovery, decides when they may be
//! replayed, and persists both dead letters and confirmation requirements to
//! a local SQLite substrate.
//!
//! # Modules
//!
//! - [`dead_letter`] – [`DeadLetterQueue`][dead_letter::DeadLetterQueue]: a
//!   bounded, created-at-ordered queue with best-effort write-through to a
//!   durable store.
//! - [`replay`] – [`DLQReplayPolicyEngine`][replay::DLQReplayPolicyEngine]:
//!   first-match-wins replay checks with cooldowns, a rolling budget, manual
//!   blocks and correlation lineage.
//! - [`sqlite_store`] – [`SqliteStore`][sqlite_store::SqliteStore]: the
//!   rusqlite implementation of both durable-store contracts.

pub mod dead_letter;
pub mod replay;
pub mod sqlite_store;

pub use dead_letter::{DeadLetterQueue, DeadLetterRequest, DeadLetterStats, MAX_DEAD_LETTERS};
pub use replay::{
    CorrelationLineage, DLQReplayPolicyEngine, LineageStatus, ReplayAttempt, ReplayCandidate,
    ReplayConfig, ReplayStats, ReplayTrace, TraceRecord,
};
pub use sqlite_store::{SqliteStore, SqliteStoreError};
