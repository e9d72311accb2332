//! Durable-store contracts.
//!
//! Stores are external collaborators.  They may fail at any time; the
//! components that hold one treat every [`StoreError`] as non-fatal, log it,
//! and keep their in-memory state authoritative for the process lifetime.

use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::records::{ConfirmationRequirement, DeadLetter};
use crate::ConfirmationState;

/// Fields of a [`DeadLetter`] that change after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterUpdate {
    pub replayed: bool,
    pub replayed_at: Option<DateTime<Utc>>,
    pub replay_action_id: Option<String>,
}

/// Fields of a [`ConfirmationRequirement`] that change after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequirementUpdate {
    pub state: ConfirmationState,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Write-through target for the dead-letter queue.
pub trait DeadLetterStore: Send + Sync {
    fn persist_dead_letter(&self, letter: &DeadLetter) -> Result<(), StoreError>;

    fn load_dead_letters(&self) -> Result<Vec<DeadLetter>, StoreError>;

    fn update_dead_letter(&self, letter_id: &str, update: &DeadLetterUpdate)
    -> Result<(), StoreError>;

    fn delete_dead_letters(&self, letter_ids: &[String]) -> Result<(), StoreError>;
}

/// Write-through target for the confirmation gate.
pub trait ConfirmationStore: Send + Sync {
    fn persist_requirement(&self, requirement: &ConfirmationRequirement) -> Result<(), StoreError>;

    fn load_requirements(&self) -> Result<Vec<ConfirmationRequirement>, StoreError>;

    fn update_requirement(
        &self,
        requirement_id: &str,
        update: &RequirementUpdate,
    ) -> Result<(), StoreError>;
}
