//! [`GovernanceContext`] – every governance component, built once.
//!
//! The context owns one instance of each component and hands out references.
//! Collaborators receive the context (usually behind an `Arc`) instead of
//! reaching for module-level state.
//!
//! ```text
//!                 GovernanceConfig
//!                        │
//!                        ▼
//!   ┌──────────────── GovernanceContext ────────────────┐
//!   │  BreakerRegistry      RetryTaxonomy               │
//!   │  RecoveryPolicyEngine ConfirmationGate ──┐        │
//!   │  DeadLetterQueue ──────────────────────┐ │        │
//!   │  DLQReplayPolicyEngine                 ▼ ▼        │
//!   │                               SqliteStore (opt.)  │
//!   └───────────────────────────────────────────────────┘
//! ```
//!
//! Opening the store is best effort: a path that cannot be opened is logged
//! and the context runs in-memory only.
//!
//! # Example
//!
//! ```
//! use warden_runtime::context::{GovernanceConfig, GovernanceContext};
//!
//! let ctx = GovernanceContext::new(GovernanceConfig::default()).unwrap();
//! assert!(ctx.audit().passed());
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use warden_kernel::{
    BreakerConfig, BreakerRegistry, BreakerSnapshot, ConfirmationConfig, ConfirmationGate,
    ConfirmationStats, RecoveryConfig, RecoveryPolicyEngine, RecoveryStats, RetryPolicy,
    RetryTaxonomy, TransitionMatrix,
};
use warden_memory::{
    DLQReplayPolicyEngine, DeadLetterQueue, DeadLetterStats, MAX_DEAD_LETTERS, ReplayConfig,
    ReplayStats, SqliteStore,
};
use warden_types::{Clock, FailureClass, SystemClock, WardenError};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Everything needed to build a [`GovernanceContext`].
#[derive(Debug, Clone)]
pub struct GovernanceConfig {
    pub breaker: BreakerConfig,
    /// Per-dependency replacements for [`breaker`][Self::breaker].
    pub breaker_overrides: BTreeMap<String, BreakerConfig>,
    /// Replacements for individual rows of the standard retry table.
    pub retry_overrides: BTreeMap<FailureClass, RetryPolicy>,
    pub recovery: RecoveryConfig,
    pub max_dead_letters: usize,
    pub replay: ReplayConfig,
    pub confirmation: ConfirmationConfig,
    /// SQLite database for dead letters and confirmation requirements.
    /// `None` keeps everything in memory.
    pub store_path: Option<PathBuf>,
    /// Upper bound on a single retry sleep in the executor.
    pub max_backoff: Duration,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            breaker: BreakerConfig::default(),
            breaker_overrides: BTreeMap::new(),
            retry_overrides: BTreeMap::new(),
            recovery: RecoveryConfig::default(),
            max_dead_letters: MAX_DEAD_LETTERS,
            replay: ReplayConfig::default(),
            confirmation: ConfirmationConfig::default(),
            store_path: None,
            max_backoff: Duration::from_secs(30),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Audit report
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of one startup audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditCheck {
    pub name: String,
    /// `None` when the check passed.
    pub failure: Option<String>,
}

impl AuditCheck {
    fn from_result(name: &str, result: Result<(), WardenError>) -> Self {
        Self {
            name: name.to_string(),
            failure: result.err().map(|e| e.to_string()),
        }
    }

    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    pub checks: Vec<AuditCheck>,
}

impl AuditReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(AuditCheck::passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &AuditCheck> {
        self.checks.iter().filter(|c| !c.passed())
    }
}

/// Combined read-only view of every component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceStats {
    pub breakers: BTreeMap<String, BreakerSnapshot>,
    pub recovery: RecoveryStats,
    pub dead_letters: DeadLetterStats,
    pub replay: ReplayStats,
    pub confirmations: ConfirmationStats,
}

// ─────────────────────────────────────────────────────────────────────────────
// GovernanceContext
// ─────────────────────────────────────────────────────────────────────────────

pub struct GovernanceContext {
    clock: Arc<dyn Clock>,
    breakers: BreakerRegistry,
    taxonomy: RetryTaxonomy,
    recovery: RecoveryPolicyEngine,
    dead_letters: DeadLetterQueue,
    replay: DLQReplayPolicyEngine,
    confirmations: ConfirmationGate,
    store: Option<Arc<SqliteStore>>,
    max_backoff: Duration,
}

impl GovernanceContext {
    /// Build against the system clock.
    pub fn new(config: GovernanceConfig) -> Result<Self, WardenError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build against an explicit clock.
    ///
    /// # Errors
    ///
    /// [`WardenError::Configuration`] when a breaker config is invalid or the
    /// retry overrides leave the taxonomy incomplete.  Store problems are
    /// never fatal.
    pub fn with_clock(config: GovernanceConfig, clock: Arc<dyn Clock>) -> Result<Self, WardenError> {
        config.breaker.validate()?;
        let mut breakers = BreakerRegistry::new(config.breaker, Arc::clone(&clock));
        for (name, breaker_config) in &config.breaker_overrides {
            breaker_config.validate().map_err(|e| {
                WardenError::Configuration(format!("breaker override '{name}': {e}"))
            })?;
            breakers = breakers.with_override(name.clone(), *breaker_config);
        }

        let taxonomy = RetryTaxonomy::with_overrides(&config.retry_overrides)?;
        let recovery = RecoveryPolicyEngine::new(config.recovery, Arc::clone(&clock));
        let replay = DLQReplayPolicyEngine::new(config.replay, Arc::clone(&clock));

        let store = config.store_path.as_ref().and_then(|path| open_store(path));
        let mut dead_letters = DeadLetterQueue::new(config.max_dead_letters, Arc::clone(&clock));
        let mut confirmations = ConfirmationGate::new(config.confirmation, Arc::clone(&clock));
        if let Some(store) = &store {
            dead_letters = dead_letters.with_store(store.clone());
            confirmations = confirmations.with_store(store.clone());
            let letters = dead_letters.restore_dead_letters();
            let requirements = confirmations.restore_requirements();
            info!(letters, requirements, "governance state restored");
        }

        Ok(Self {
            clock,
            breakers,
            taxonomy,
            recovery,
            dead_letters,
            replay,
            confirmations,
            store,
            max_backoff: config.max_backoff,
        })
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    pub fn taxonomy(&self) -> &RetryTaxonomy {
        &self.taxonomy
    }

    pub fn recovery(&self) -> &RecoveryPolicyEngine {
        &self.recovery
    }

    pub fn dead_letters(&self) -> &DeadLetterQueue {
        &self.dead_letters
    }

    pub fn replay(&self) -> &DLQReplayPolicyEngine {
        &self.replay
    }

    pub fn confirmations(&self) -> &ConfirmationGate {
        &self.confirmations
    }

    /// The durable store, when one was opened.
    pub fn store(&self) -> Option<&SqliteStore> {
        self.store.as_deref()
    }

    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// Run every completeness audit.  Meant for startup and tests, not the
    /// request path.
    pub fn audit(&self) -> AuditReport {
        let mut checks = vec![
            AuditCheck::from_result("retry_taxonomy", self.taxonomy.audit()),
            AuditCheck::from_result("transition_matrix", TransitionMatrix::STANDARD.audit()),
            AuditCheck::from_result("recovery_rules", self.recovery.audit_table()),
        ];
        for name in self.breakers.names() {
            let history = self.breakers.get(&name).verify_history();
            checks.push(AuditCheck::from_result(&format!("breaker_history:{name}"), history));
        }
        AuditReport { checks }
    }

    pub fn stats(&self, event_limit: usize) -> GovernanceStats {
        GovernanceStats {
            breakers: self.breakers.snapshot(event_limit),
            recovery: self.recovery.stats(),
            dead_letters: self.dead_letters.stats(),
            replay: self.replay.stats(),
            confirmations: self.confirmations.stats(),
        }
    }
}

impl std::fmt::Debug for GovernanceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GovernanceContext")
            .field("breakers", &self.breakers.names())
            .field("dead_letters", &self.dead_letters.count())
            .field("store", &self.store.is_some())
            .finish()
    }
}

fn open_store(path: &PathBuf) -> Option<Arc<SqliteStore>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!(path = %path.display(), error = %e, "cannot create store directory; running in-memory");
            return None;
        }
    }
    match SqliteStore::open(path) {
        Ok(store) => {
            info!(path = %path.display(), "governance store opened");
            Some(Arc::new(store))
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot open governance store; running in-memory");
            None
        }
    }
}
