//! [`GovernedExecutor`] – the path every side-effecting action takes.
//!
//! ```text
//!  ActionRequest
//!       │
//!       ▼
//!  requirement_id? ──yes──► ConfirmationGate::validate_execution ──✗──► Bypass
//!       │                                 │
//!       ▼◄────────────────────────────────┘
//!  CircuitBreaker::call(op) ──ok──► value
//!       │ err
//!       ▼
//!  RetryTaxonomy::classify + decide
//!       ├── Retry { backoff } ──sleep──► next attempt
//!       └── NoRetry / Escalate ──► DeadLetterQueue::enqueue ──► DeadLettered
//! ```
//!
//! The correlation id on the request is handed to every attempt and lands on
//! the dead letter.  [`GovernedExecutor::replay`] re-runs a dead letter under a
//! fresh correlation id and links the two through the replay engine's
//! lineage.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;
use warden_kernel::{BreakerError, RetryDecision};
use warden_memory::{DeadLetterRequest, ReplayCandidate, ReplayTrace};
use warden_types::{ConfirmationBypassError, FailureClass, ReplayDecision, ReplayReason};

use crate::context::GovernanceContext;

// ─────────────────────────────────────────────────────────────────────────────
// Requests and failures
// ─────────────────────────────────────────────────────────────────────────────

/// One action to run under governance.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    pub action_id: String,
    pub intent: String,
    pub params: Value,
    /// Breaker name for the dependency the action calls.
    pub dependency: String,
    pub correlation_id: String,
    pub session_id: Option<String>,
    /// Approval that must be consumed before the action runs.
    pub requirement_id: Option<String>,
}

impl ActionRequest {
    /// New request with generated action and correlation ids.
    pub fn new(intent: impl Into<String>, dependency: impl Into<String>, params: Value) -> Self {
        Self {
            action_id: Uuid::new_v4().to_string(),
            intent: intent.into(),
            params,
            dependency: dependency.into(),
            correlation_id: Uuid::new_v4().to_string(),
            session_id: None,
            requirement_id: None,
        }
    }

    pub fn correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn confirmed_by(mut self, requirement_id: impl Into<String>) -> Self {
        self.requirement_id = Some(requirement_id.into());
        self
    }
}

/// Handed to the operation on every attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptContext {
    pub correlation_id: String,
    /// Zero-based.
    pub attempt: u32,
}

/// Failure signal returned by an operation.  Classified by the retry
/// taxonomy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct ActionFailure {
    pub code: String,
    pub message: String,
}

impl ActionFailure {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    /// The action carried a requirement that was not approved.
    #[error(transparent)]
    Bypass(#[from] ConfirmationBypassError),

    #[error("action {action_id} dead-lettered as {letter_id} ({failure_class}) after {attempts} attempt(s): {error_code}: {error_message}")]
    DeadLettered {
        letter_id: String,
        action_id: String,
        correlation_id: String,
        failure_class: FailureClass,
        error_code: String,
        error_message: String,
        attempts: u32,
        /// `true` when retries ran out, `false` when the class is terminal.
        escalated: bool,
    },

    #[error("replay of {} {}: {}", .0.letter_id, .0.decision, reason_label(.0))]
    ReplayNotApproved(ReplayTrace),

    #[error("dead letter {0} not found")]
    UnknownLetter(String),
}

fn reason_label(trace: &ReplayTrace) -> String {
    trace
        .reason
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "-".to_string())
}

impl ExecutionError {
    /// Denied or blocked for a policy reason.  Render as "not now", not as
    /// an outage.
    pub fn is_policy_rejection(&self) -> bool {
        match self {
            ExecutionError::ReplayNotApproved(_) => true,
            ExecutionError::DeadLettered { failure_class, .. } => matches!(
                failure_class,
                FailureClass::CircuitOpen
                    | FailureClass::PolicyDenied
                    | FailureClass::ValidationFailed
            ),
            _ => false,
        }
    }

    /// Must never be swallowed.
    pub fn is_safety_violation(&self) -> bool {
        matches!(self, ExecutionError::Bypass(_))
    }

    /// Dependency or infrastructure failure.
    pub fn is_infrastructure_failure(&self) -> bool {
        !self.is_policy_rejection() && !self.is_safety_violation()
    }

    pub fn letter_id(&self) -> Option<&str> {
        match self {
            ExecutionError::DeadLettered { letter_id, .. } => Some(letter_id),
            _ => None,
        }
    }
}

/// Result of [`GovernedExecutor::replay`].
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayOutcome<T> {
    /// Dry run: the decision only.  Nothing was recorded or executed.
    Evaluated(ReplayTrace),
    Executed {
        trace: ReplayTrace,
        replay_correlation_id: String,
        replay_action_id: String,
        value: T,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// GovernedExecutor
// ─────────────────────────────────────────────────────────────────────────────

/// Runs operations through the confirmation gate, breaker and retry policy.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use serde_json::json;
/// use warden_runtime::context::{GovernanceConfig, GovernanceContext};
/// use warden_runtime::executor::{ActionFailure, ActionRequest, GovernedExecutor};
///
/// # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
/// let ctx = Arc::new(GovernanceContext::new(GovernanceConfig::default()).unwrap());
/// let executor = GovernedExecutor::new(ctx);
///
/// let request = ActionRequest::new("search.web", "search-api", json!({"q": "rust"}));
/// let hits = executor
///     .execute(&request, |_attempt| async { Ok::<_, ActionFailure>(3) })
///     .await
///     .unwrap();
/// assert_eq!(hits, 3);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct GovernedExecutor {
    ctx: Arc<GovernanceContext>,
}

impl GovernedExecutor {
    pub fn new(ctx: Arc<GovernanceContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &GovernanceContext {
        &self.ctx
    }

    /// Run `op` for `request`.
    ///
    /// # Errors
    ///
    /// - [`ExecutionError::Bypass`] before `op` is ever invoked when the
    ///   request's requirement is missing, expired, unapproved or spent.
    /// - [`ExecutionError::DeadLettered`] once the retry policy gives up.
    pub async fn execute<T, F, Fut>(
        &self,
        request: &ActionRequest,
        op: F,
    ) -> Result<T, ExecutionError>
    where
        F: FnMut(AttemptContext) -> Fut,
        Fut: Future<Output = Result<T, ActionFailure>>,
    {
        if let Some(requirement_id) = &request.requirement_id {
            self.ctx.confirmations().validate_execution(requirement_id)?;
        }
        self.run(request, None, op).await
    }

    /// Evaluate a dead letter for replay against `dependency`'s breaker and,
    /// on a live approval, run it again.
    ///
    /// A dry run only evaluates.  A live run that is not approved returns
    /// [`ExecutionError::ReplayNotApproved`] without invoking `op`.  An
    /// approved replay marks the letter replayed and extends its lineage
    /// before `op` runs, so a replay that fails again is still recorded.
    ///
    /// The lineage is always the one rooted at the first request.  A replay
    /// that dead-letters again produces a letter under the replay's
    /// correlation id, and replaying that letter appends to the same chain.
    pub async fn replay<T, F, Fut>(
        &self,
        letter_id: &str,
        dependency: &str,
        dry_run: bool,
        op: F,
    ) -> Result<ReplayOutcome<T>, ExecutionError>
    where
        F: FnMut(AttemptContext) -> Fut,
        Fut: Future<Output = Result<T, ActionFailure>>,
    {
        let letter = self
            .ctx
            .dead_letters()
            .get(letter_id)
            .ok_or_else(|| ExecutionError::UnknownLetter(letter_id.to_string()))?;

        let breaker_state = self.ctx.breakers().observed_state_of(dependency);
        let candidate = ReplayCandidate::from_letter(&letter, breaker_state);
        let trace = self.ctx.replay().evaluate(&candidate, dry_run);
        if dry_run {
            return Ok(ReplayOutcome::Evaluated(trace));
        }
        if !trace.is_approved() {
            return Err(ExecutionError::ReplayNotApproved(trace));
        }

        let (root_correlation_id, root_action_id) =
            match self.ctx.replay().find_lineage(&letter.correlation_id) {
                Some(lineage) => (lineage.original_correlation_id, lineage.original_action_id),
                None => (letter.correlation_id.clone(), letter.action_id.clone()),
            };

        let request = ActionRequest {
            action_id: Uuid::new_v4().to_string(),
            intent: letter.intent.clone(),
            params: letter.params.clone(),
            dependency: dependency.to_string(),
            correlation_id: Uuid::new_v4().to_string(),
            session_id: letter.session_id.clone(),
            requirement_id: None,
        };
        self.claim_letter(letter_id, &request.action_id, &trace)?;
        self.ctx.replay().record_lineage(
            &root_correlation_id,
            &root_action_id,
            Some(&request.correlation_id),
            Some(&request.action_id),
        );
        info!(
            letter_id,
            original_correlation_id = %root_correlation_id,
            replay_correlation_id = %request.correlation_id,
            "replaying dead letter"
        );

        let value = self.run(&request, Some(&root_correlation_id), op).await?;
        Ok(ReplayOutcome::Executed {
            trace,
            replay_correlation_id: request.correlation_id,
            replay_action_id: request.action_id,
            value,
        })
    }

    /// Flag the letter replayed.  Fails if it was evicted, purged or claimed
    /// by a concurrent replay after it was evaluated.
    fn claim_letter(
        &self,
        letter_id: &str,
        replay_action_id: &str,
        trace: &ReplayTrace,
    ) -> Result<(), ExecutionError> {
        let queue = self.ctx.dead_letters();
        if queue.mark_replayed(letter_id, replay_action_id) {
            return Ok(());
        }
        warn!(letter_id, "dead letter changed between evaluation and replay");
        match queue.get(letter_id) {
            None => Err(ExecutionError::UnknownLetter(letter_id.to_string())),
            Some(_) => Err(ExecutionError::ReplayNotApproved(ReplayTrace {
                decision: ReplayDecision::Reject,
                reason: Some(ReplayReason::AlreadyReplayed),
                ..trace.clone()
            })),
        }
    }

    /// `lineage_root` is the first request's correlation id when `request`
    /// is a replay; its lineage already exists and must not fork.
    async fn run<T, F, Fut>(
        &self,
        request: &ActionRequest,
        lineage_root: Option<&str>,
        mut op: F,
    ) -> Result<T, ExecutionError>
    where
        F: FnMut(AttemptContext) -> Fut,
        Fut: Future<Output = Result<T, ActionFailure>>,
    {
        let breaker = self.ctx.breakers().get(&request.dependency);
        let taxonomy = self.ctx.taxonomy();
        let mut attempt = 0u32;
        loop {
            let attempt_ctx = AttemptContext {
                correlation_id: request.correlation_id.clone(),
                attempt,
            };
            let failure = match breaker.call(|| op(attempt_ctx)).await {
                Ok(value) => return Ok(value),
                Err(BreakerError::Open(e)) => ActionFailure::new("CIRCUIT_OPEN", e.to_string()),
                Err(BreakerError::Inner(e)) => e,
            };

            let class = taxonomy.classify(&failure.code, &failure.message);
            let decision = taxonomy.decide(class, attempt);
            match decision {
                RetryDecision::Retry { backoff } => {
                    let wait = backoff.min(self.ctx.max_backoff());
                    debug!(
                        action_id = %request.action_id,
                        correlation_id = %request.correlation_id,
                        %class,
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        "retrying action"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                RetryDecision::NoRetry | RetryDecision::Escalate => {
                    let escalated = matches!(decision, RetryDecision::Escalate);
                    return Err(self.dead_letter(
                        request,
                        lineage_root,
                        failure,
                        class,
                        attempt + 1,
                        escalated,
                    ));
                }
            }
        }
    }

    fn dead_letter(
        &self,
        request: &ActionRequest,
        lineage_root: Option<&str>,
        failure: ActionFailure,
        class: FailureClass,
        attempts: u32,
        escalated: bool,
    ) -> ExecutionError {
        let letter_id = self.ctx.dead_letters().enqueue(DeadLetterRequest {
            action_id: request.action_id.clone(),
            intent: request.intent.clone(),
            params: request.params.clone(),
            error_code: failure.code.clone(),
            error_message: failure.message.clone(),
            failure_class: class,
            correlation_id: request.correlation_id.clone(),
            session_id: request.session_id.clone(),
            retries_exhausted: escalated,
        });
        if lineage_root.is_none() {
            self.ctx
                .replay()
                .record_lineage(&request.correlation_id, &request.action_id, None, None);
        }
        warn!(
            action_id = %request.action_id,
            correlation_id = %request.correlation_id,
            lineage_root = lineage_root.unwrap_or(&request.correlation_id),
            %letter_id,
            %class,
            attempts,
            escalated,
            "action gave up"
        );
        ExecutionError::DeadLettered {
            letter_id,
            action_id: request.action_id.clone(),
            correlation_id: request.correlation_id.clone(),
            failure_class: class,
            error_code: failure.code,
            error_message: failure.message,
            attempts,
            escalated,
        }
    }
}
