//! [`DeadLetterQueue`] – bounded holding area for unrecoverable actions.
//!
//! An action lands here once the retry taxonomy gives up on it (no-retry or
//! escalate).  Letters leave the queue in exactly two ways:
//!
//! - **eviction**: the queue is bounded to `max_letters`; overflow drops the
//!   oldest letter by `created_at`.  A full queue means "investigate now".
//! - **purge**: [`purge`][DeadLetterQueue::purge] removes letters older than
//!   a given age, replayed or not.
//!
//! Replaying a letter never deletes it; [`mark_replayed`][DeadLetterQueue::mark_replayed]
//! only flips its flag and records the replay action id.
//!
//! An optional [`DeadLetterStore`] receives every change as a best-effort
//! write-through.  Store failures are logged and counted; the in-memory
//! queue stays authoritative for the lifetime of the process.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use warden_memory::dead_letter::{DeadLetterQueue, DeadLetterRequest};
//! use warden_types::{FailureClass, ManualClock};
//!
//! let dlq = DeadLetterQueue::new(1000, Arc::new(ManualClock::new()));
//! let id = dlq.enqueue(DeadLetterRequest {
//!     action_id: "act-1".into(),
//!     intent: "email.send".into(),
//!     params: serde_json::json!({"to": "ops@example.com"}),
//!     error_code: "TIMEOUT".into(),
//!     error_message: "smtp timed out".into(),
//!     failure_class: FailureClass::Timeout,
//!     correlation_id: "corr-1".into(),
//!     session_id: None,
//!     retries_exhausted: true,
//! });
//!
//! assert_eq!(dlq.count(), 1);
//! assert!(dlq.mark_replayed(&id, "act-2"));
//! assert!(dlq.get(&id).unwrap().replayed);
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;
use warden_types::{Clock, DeadLetter, DeadLetterStore, DeadLetterUpdate, FailureClass};

/// Default queue bound.
pub const MAX_DEAD_LETTERS: usize = 1000;

/// Everything the caller knows about a failed action.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetterRequest {
    pub action_id: String,
    pub intent: String,
    pub params: Value,
    pub error_code: String,
    pub error_message: String,
    pub failure_class: FailureClass,
    pub correlation_id: String,
    pub session_id: Option<String>,
    /// `true` when the retry budget was spent, `false` when the failure was
    /// never retryable in the first place.
    pub retries_exhausted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterStats {
    pub count: usize,
    pub max_letters: usize,
    pub replayed: usize,
    pub awaiting_replay: usize,
    pub by_failure_class: BTreeMap<FailureClass, usize>,
    pub oldest_created_at: Option<DateTime<Utc>>,
    pub enqueued_total: u64,
    pub evicted_total: u64,
    pub purged_total: u64,
    pub store_failures: u64,
}

struct QueueState {
    /// Sorted by `created_at`, oldest at the front.
    letters: VecDeque<DeadLetter>,
    enqueued_total: u64,
    evicted_total: u64,
    purged_total: u64,
    store_failures: u64,
}

pub struct DeadLetterQueue {
    max_letters: usize,
    clock: Arc<dyn Clock>,
    store: Option<Arc<dyn DeadLetterStore>>,
    state: Mutex<QueueState>,
}

impl DeadLetterQueue {
    pub fn new(max_letters: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_letters,
            clock,
            store: None,
            state: Mutex::new(QueueState {
                letters: VecDeque::new(),
                enqueued_total: 0,
                evicted_total: 0,
                purged_total: 0,
                store_failures: 0,
            }),
        }
    }

    /// Attach a best-effort write-through store.
    pub fn with_store(mut self, store: Arc<dyn DeadLetterStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn max_letters(&self) -> usize {
        self.max_letters
    }

    /// Add a letter and return its id.  Evicts the oldest letters if the
    /// queue would exceed its bound.
    pub fn enqueue(&self, request: DeadLetterRequest) -> String {
        let letter = DeadLetter {
            letter_id: Uuid::new_v4().to_string(),
            action_id: request.action_id,
            intent: request.intent,
            params: request.params,
            error_code: request.error_code,
            error_message: request.error_message,
            failure_class: request.failure_class,
            correlation_id: request.correlation_id,
            session_id: request.session_id,
            created_at: self.clock.utc(),
            retries_exhausted: request.retries_exhausted,
            replayed: false,
            replayed_at: None,
            replay_action_id: None,
        };
        let letter_id = letter.letter_id.clone();

        let evicted = {
            let mut state = self.state.lock();
            let at = state
                .letters
                .partition_point(|l| l.created_at <= letter.created_at);
            state.letters.insert(at, letter.clone());
            state.enqueued_total += 1;

            let mut evicted = Vec::new();
            while state.letters.len() > self.max_letters {
                match state.letters.pop_front() {
                    Some(old) => evicted.push(old.letter_id),
                    None => break,
                }
            }
            state.evicted_total += evicted.len() as u64;
            evicted
        };

        info!(
            letter_id = %letter_id,
            action_id = %letter.action_id,
            failure_class = %letter.failure_class,
            correlation_id = %letter.correlation_id,
            "action dead-lettered"
        );
        if !evicted.is_empty() {
            warn!(
                evicted = evicted.len(),
                max = self.max_letters,
                "dead-letter queue full; oldest letters evicted"
            );
        }

        if let Some(store) = &self.store {
            self.note_store(store.persist_dead_letter(&letter), "persist");
            if !evicted.is_empty() {
                self.note_store(store.delete_dead_letters(&evicted), "evict");
            }
        }
        letter_id
    }

    /// Reload letters from the attached store, keeping the newest
    /// `max_letters`.  A failing store leaves the queue empty.
    pub fn restore_dead_letters(&self) -> usize {
        let Some(store) = &self.store else {
            return 0;
        };
        let mut loaded = match store.load_dead_letters() {
            Ok(letters) => letters,
            Err(e) => {
                warn!(error = %e, "failed to restore dead letters; starting empty");
                self.state.lock().store_failures += 1;
                return 0;
            }
        };
        loaded.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let skip = loaded.len().saturating_sub(self.max_letters);
        let letters: VecDeque<DeadLetter> = loaded.into_iter().skip(skip).collect();
        let restored = letters.len();

        self.state.lock().letters = letters;
        info!(restored, dropped = skip, "dead letters restored");
        restored
    }

    pub fn get(&self, letter_id: &str) -> Option<DeadLetter> {
        self.state
            .lock()
            .letters
            .iter()
            .find(|l| l.letter_id == letter_id)
            .cloned()
    }

    /// Up to `limit` letters, newest first.
    pub fn list(&self, limit: usize) -> Vec<DeadLetter> {
        self.state
            .lock()
            .letters
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    /// Letters not yet replayed, newest first.
    pub fn list_awaiting_replay(&self, limit: usize) -> Vec<DeadLetter> {
        self.state
            .lock()
            .letters
            .iter()
            .rev()
            .filter(|l| !l.replayed)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Every letter carrying `correlation_id`, oldest first.
    pub fn find_by_correlation(&self, correlation_id: &str) -> Vec<DeadLetter> {
        self.state
            .lock()
            .letters
            .iter()
            .filter(|l| l.correlation_id == correlation_id)
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.state.lock().letters.len()
    }

    /// Flag a letter as replayed.  `false` if it is missing or already
    /// replayed.
    pub fn mark_replayed(&self, letter_id: &str, replay_action_id: &str) -> bool {
        let now = self.clock.utc();
        let update = {
            let mut state = self.state.lock();
            let Some(letter) = state
                .letters
                .iter_mut()
                .find(|l| l.letter_id == letter_id)
            else {
                return false;
            };
            if letter.replayed {
                return false;
            }
            letter.replayed = true;
            letter.replayed_at = Some(now);
            letter.replay_action_id = Some(replay_action_id.to_string());
            DeadLetterUpdate {
                replayed: true,
                replayed_at: Some(now),
                replay_action_id: Some(replay_action_id.to_string()),
            }
        };
        info!(letter_id, replay_action_id, "dead letter marked replayed");
        if let Some(store) = &self.store {
            self.note_store(store.update_dead_letter(letter_id, &update), "update");
        }
        true
    }

    /// Remove letters created more than `older_than_hours` ago, regardless of
    /// replay status.  Returns how many were removed.
    pub fn purge(&self, older_than_hours: f64) -> usize {
        let hours = if older_than_hours.is_finite() {
            older_than_hours.max(0.0)
        } else {
            0.0
        };
        let age = TimeDelta::try_milliseconds((hours * 3_600_000.0) as i64).unwrap_or(TimeDelta::MAX);
        let cutoff = self
            .clock
            .utc()
            .checked_sub_signed(age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let purged: Vec<String> = {
            let mut state = self.state.lock();
            let split = state.letters.partition_point(|l| l.created_at < cutoff);
            let purged: Vec<String> = state.letters.drain(..split).map(|l| l.letter_id).collect();
            state.purged_total += purged.len() as u64;
            purged
        };

        if !purged.is_empty() {
            info!(purged = purged.len(), older_than_hours = hours, "dead letters purged");
            if let Some(store) = &self.store {
                self.note_store(store.delete_dead_letters(&purged), "purge");
            }
        }
        purged.len()
    }

    pub fn stats(&self) -> DeadLetterStats {
        let state = self.state.lock();
        let mut by_failure_class = BTreeMap::new();
        let mut replayed = 0;
        for letter in &state.letters {
            *by_failure_class.entry(letter.failure_class).or_insert(0) += 1;
            if letter.replayed {
                replayed += 1;
            }
        }
        DeadLetterStats {
            count: state.letters.len(),
            max_letters: self.max_letters,
            replayed,
            awaiting_replay: state.letters.len() - replayed,
            by_failure_class,
            oldest_created_at: state.letters.front().map(|l| l.created_at),
            enqueued_total: state.enqueued_total,
            evicted_total: state.evicted_total,
            purged_total: state.purged_total,
            store_failures: state.store_failures,
        }
    }

    fn note_store(&self, result: Result<(), warden_types::StoreError>, operation: &str) {
        if let Err(e) = result {
            self.state.lock().store_failures += 1;
            warn!(operation, error = %e, "dead-letter store write failed; continuing in memory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use warden_types::{ManualClock, StoreError};

    fn request(n: usize) -> DeadLetterRequest {
        DeadLetterRequest {
            action_id: format!("act-{n}"),
            intent: "calendar.create".to_string(),
            params: serde_json::json!({"n": n}),
            error_code: "TIMEOUT".to_string(),
            error_message: "timed out".to_string(),
            failure_class: FailureClass::Timeout,
            correlation_id: format!("corr-{n}"),
            session_id: Some("sess".to_string()),
            retries_exhausted: true,
        }
    }

    fn queue(max: usize) -> (Arc<ManualClock>, DeadLetterQueue) {
        let clock = Arc::new(ManualClock::new());
        (clock.clone(), DeadLetterQueue::new(max, clock))
    }

    #[test]
    fn overflow_evicts_oldest_first() {
        let (clock, q) = queue(MAX_DEAD_LETTERS);
        let mut ids = Vec::new();
        for n in 0..1005 {
            ids.push(q.enqueue(request(n)));
            clock.advance(Duration::from_millis(1));
        }
        assert_eq!(q.count(), 1000);
        for evicted in &ids[..5] {
            assert!(q.get(evicted).is_none());
        }
        assert!(q.get(&ids[5]).is_some());
        assert_eq!(q.stats().evicted_total, 5);
    }

    #[test]
    fn list_is_newest_first() {
        let (clock, q) = queue(10);
        let first = q.enqueue(request(1));
        clock.advance(Duration::from_secs(1));
        let second = q.enqueue(request(2));
        let listed = q.list(10);
        assert_eq!(listed[0].letter_id, second);
        assert_eq!(listed[1].letter_id, first);
        assert_eq!(q.list(1).len(), 1);
    }

    #[test]
    fn mark_replayed_keeps_letter_and_is_one_shot() {
        let (_, q) = queue(10);
        let id = q.enqueue(request(1));
        assert!(q.mark_replayed(&id, "act-r1"));
        assert!(!q.mark_replayed(&id, "act-r2"));
        assert!(!q.mark_replayed("missing", "act-r3"));

        let letter = q.get(&id).unwrap();
        assert!(letter.replayed);
        assert_eq!(letter.replay_action_id.as_deref(), Some("act-r1"));
        assert_eq!(q.count(), 1);
        assert!(q.list_awaiting_replay(10).is_empty());
    }

    #[test]
    fn purge_removes_by_age_regardless_of_replay() {
        let (clock, q) = queue(10);
        let old = q.enqueue(request(1));
        q.mark_replayed(&old, "r");
        q.enqueue(request(2));
        clock.advance(Duration::from_secs(3 * 3600));
        let fresh = q.enqueue(request(3));

        assert_eq!(q.purge(2.0), 2);
        assert_eq!(q.count(), 1);
        assert!(q.get(&fresh).is_some());
        assert_eq!(q.stats().purged_total, 2);
    }

    #[test]
    fn stats_break_down_by_class() {
        let (_, q) = queue(10);
        q.enqueue(request(1));
        let mut denied = request(2);
        denied.failure_class = FailureClass::PolicyDenied;
        let id = q.enqueue(denied);
        q.mark_replayed(&id, "r");

        let stats = q.stats();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.replayed, 1);
        assert_eq!(stats.awaiting_replay, 1);
        assert_eq!(stats.by_failure_class[&FailureClass::Timeout], 1);
        assert_eq!(stats.by_failure_class[&FailureClass::PolicyDenied], 1);
    }

    #[test]
    fn find_by_correlation_collects_chain() {
        let (_, q) = queue(10);
        q.enqueue(request(1));
        let mut again = request(9);
        again.correlation_id = "corr-1".to_string();
        q.enqueue(again);
        assert_eq!(q.find_by_correlation("corr-1").len(), 2);
    }

    struct BrokenStore;

    impl DeadLetterStore for BrokenStore {
        fn persist_dead_letter(&self, _: &DeadLetter) -> Result<(), StoreError> {
            Err(StoreError::new("broken", "persist", "readonly"))
        }
        fn load_dead_letters(&self) -> Result<Vec<DeadLetter>, StoreError> {
            Err(StoreError::new("broken", "load", "readonly"))
        }
        fn update_dead_letter(&self, _: &str, _: &DeadLetterUpdate) -> Result<(), StoreError> {
            Err(StoreError::new("broken", "update", "readonly"))
        }
        fn delete_dead_letters(&self, _: &[String]) -> Result<(), StoreError> {
            Err(StoreError::new("broken", "delete", "readonly"))
        }
    }

    #[test]
    fn store_failures_are_absorbed() {
        let q = DeadLetterQueue::new(10, Arc::new(ManualClock::new())).with_store(Arc::new(BrokenStore));
        assert_eq!(q.restore_dead_letters(), 0);
        let id = q.enqueue(request(1));
        assert!(q.mark_replayed(&id, "r"));
        assert_eq!(q.count(), 1);
        assert_eq!(q.stats().store_failures, 3);
    }

    #[test]
    fn restore_keeps_newest_up_to_bound() {
        let store = Arc::new(crate::sqlite_store::SqliteStore::open_in_memory().unwrap());
        let clock = Arc::new(ManualClock::new());
        let writer = DeadLetterQueue::new(100, clock.clone()).with_store(store.clone());
        let mut ids = Vec::new();
        for n in 0..5 {
            ids.push(writer.enqueue(request(n)));
            clock.advance(Duration::from_secs(1));
        }

        let reader = DeadLetterQueue::new(3, clock).with_store(store);
        assert_eq!(reader.restore_dead_letters(), 3);
        assert!(reader.get(&ids[0]).is_none());
        assert!(reader.get(&ids[4]).is_some());
    }
}
