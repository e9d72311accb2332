//! SQLite-backed durable store for dead letters and confirmation requirements.
//!
//! [`SqliteStore`] implements both [`DeadLetterStore`] and
//! [`ConfirmationStore`], so one database file can back the whole control
//! plane.  The governance components call it as a best-effort write-through;
//! every error surfaces as a [`StoreError`] and is logged by the caller.
//!
//! # Storage layout
//!
//! `dead_letters`
//!
//! | column            | type    | description                               |
//! |-------------------|---------|-------------------------------------------|
//! | letter_id         | TEXT    | UUID v4 primary key                       |
//! | action_id         | TEXT    | Id of the failed action                   |
//! | intent            | TEXT    | Action name, e.g. `calendar.create`       |
//! | params            | TEXT    | JSON-encoded action parameters            |
//! | error_code        | TEXT    | Raw error code                            |
//! | error_message     | TEXT    | Raw error message                         |
//! | failure_class     | TEXT    | snake_case [`FailureClass`]               |
//! | correlation_id    | TEXT    | Correlation id of the original request    |
//! | session_id        | TEXT    | Nullable                                  |
//! | created_at        | TEXT    | RFC-3339 UTC, `Z` suffix                  |
//! | retries_exhausted | INTEGER | 0/1                                       |
//! | replayed          | INTEGER | 0/1                                       |
//! | replayed_at       | TEXT    | Nullable                                  |
//! | replay_action_id  | TEXT    | Nullable                                  |
//!
//! `confirmation_requirements` mirrors [`ConfirmationRequirement`] the same
//! way, with `args` JSON-encoded and `state`/`risk_level` as their wire names.
//!
//! # Example
//!
//! ```rust
//! use warden_memory::sqlite_store::SqliteStore;
//! use warden_types::DeadLetterStore;
//!
//! let store = SqliteStore::open_in_memory().unwrap();
//! assert!(store.load_dead_letters().unwrap().is_empty());
//! ```

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params};
use thiserror::Error;
use warden_types::{
    ConfirmationRequirement, ConfirmationState, ConfirmationStore, DeadLetter, DeadLetterStore,
    DeadLetterUpdate, FailureClass, RequirementUpdate, RiskLevel, StoreError,
};

const STORE_NAME: &str = "sqlite";

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum SqliteStoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("corrupt row {id}: {details}")]
    Corrupt { id: String, details: String },
}

impl SqliteStoreError {
    fn into_store_error(self, operation: &str) -> StoreError {
        StoreError::new(STORE_NAME, operation, self)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SqliteStore
// ─────────────────────────────────────────────────────────────────────────────

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a persistent SQLite database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SqliteStoreError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open a temporary in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, SqliteStoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), SqliteStoreError> {
        self.conn.lock().execute_batch(
            "CREATE TABLE IF NOT EXISTS dead_letters (
                letter_id         TEXT NOT NULL PRIMARY KEY,
                action_id         TEXT NOT NULL,
                intent            TEXT NOT NULL,
                params            TEXT NOT NULL,
                error_code        TEXT NOT NULL,
                error_message     TEXT NOT NULL,
                failure_class     TEXT NOT NULL,
                correlation_id    TEXT NOT NULL,
                session_id        TEXT,
                created_at        TEXT NOT NULL,
                retries_exhausted INTEGER NOT NULL,
                replayed          INTEGER NOT NULL DEFAULT 0,
                replayed_at       TEXT,
                replay_action_id  TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_dead_letters_created_at
                ON dead_letters (created_at);
            CREATE TABLE IF NOT EXISTS confirmation_requirements (
                requirement_id TEXT NOT NULL PRIMARY KEY,
                action         TEXT NOT NULL,
                args           TEXT NOT NULL,
                scene_id       TEXT,
                session_id     TEXT,
                correlation_id TEXT,
                state          TEXT NOT NULL,
                created_at     TEXT NOT NULL,
                resolved_at    TEXT,
                risk_level     TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Number of rows in `dead_letters`.
    pub fn dead_letter_count(&self) -> Result<usize, SqliteStoreError> {
        let n: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM dead_letters", [], |row| row.get(0))?;
        Ok(usize::try_from(n).unwrap_or(0))
    }

    /// Fetch one requirement row by id.
    pub fn requirement(
        &self,
        requirement_id: &str,
    ) -> Result<Option<ConfirmationRequirement>, SqliteStoreError> {
        let conn = self.conn.lock();
        let raw = conn
            .query_row(
                "SELECT requirement_id, action, args, scene_id, session_id, correlation_id,
                        state, created_at, resolved_at, risk_level
                 FROM confirmation_requirements WHERE requirement_id = ?1",
                params![requirement_id],
                RawRequirement::from_row,
            )
            .optional()?;
        raw.map(RawRequirement::decode).transpose()
    }

    fn insert_dead_letter(&self, letter: &DeadLetter) -> Result<(), SqliteStoreError> {
        let params_json = serde_json::to_string(&letter.params)?;
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO dead_letters
                 (letter_id, action_id, intent, params, error_code, error_message,
                  failure_class, correlation_id, session_id, created_at,
                  retries_exhausted, replayed, replayed_at, replay_action_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                letter.letter_id,
                letter.action_id,
                letter.intent,
                params_json,
                letter.error_code,
                letter.error_message,
                letter.failure_class.as_str(),
                letter.correlation_id,
                letter.session_id,
                format_ts(&letter.created_at),
                letter.retries_exhausted,
                letter.replayed,
                letter.replayed_at.as_ref().map(format_ts),
                letter.replay_action_id,
            ],
        )?;
        Ok(())
    }

    fn select_dead_letters(&self) -> Result<Vec<DeadLetter>, SqliteStoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT letter_id, action_id, intent, params, error_code, error_message,
                    failure_class, correlation_id, session_id, created_at,
                    retries_exhausted, replayed, replayed_at, replay_action_id
             FROM dead_letters
             ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map([], RawLetter::from_row)?;
        let mut letters = Vec::new();
        for row in rows {
            letters.push(row?.decode()?);
        }
        Ok(letters)
    }

    fn insert_requirement(&self, r: &ConfirmationRequirement) -> Result<(), SqliteStoreError> {
        let args_json = serde_json::to_string(&r.args)?;
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO confirmation_requirements
                 (requirement_id, action, args, scene_id, session_id, correlation_id,
                  state, created_at, resolved_at, risk_level)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                r.requirement_id,
                r.action,
                args_json,
                r.scene_id,
                r.session_id,
                r.correlation_id,
                r.state.to_string(),
                format_ts(&r.created_at),
                r.resolved_at.as_ref().map(format_ts),
                risk_str(r.risk_level),
            ],
        )?;
        Ok(())
    }

    fn select_requirements(&self) -> Result<Vec<ConfirmationRequirement>, SqliteStoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT requirement_id, action, args, scene_id, session_id, correlation_id,
                    state, created_at, resolved_at, risk_level
             FROM confirmation_requirements
             ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map([], RawRequirement::from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.decode()?);
        }
        Ok(out)
    }
}

impl DeadLetterStore for SqliteStore {
    fn persist_dead_letter(&self, letter: &DeadLetter) -> Result<(), StoreError> {
        self.insert_dead_letter(letter)
            .map_err(|e| e.into_store_error("persist_dead_letter"))
    }

    fn load_dead_letters(&self) -> Result<Vec<DeadLetter>, StoreError> {
        self.select_dead_letters()
            .map_err(|e| e.into_store_error("load_dead_letters"))
    }

    fn update_dead_letter(
        &self,
        letter_id: &str,
        update: &DeadLetterUpdate,
    ) -> Result<(), StoreError> {
        self.conn
            .lock()
            .execute(
                "UPDATE dead_letters
                 SET replayed = ?2, replayed_at = ?3, replay_action_id = ?4
                 WHERE letter_id = ?1",
                params![
                    letter_id,
                    update.replayed,
                    update.replayed_at.as_ref().map(format_ts),
                    update.replay_action_id,
                ],
            )
            .map(|_| ())
            .map_err(|e| SqliteStoreError::from(e).into_store_error("update_dead_letter"))
    }

    fn delete_dead_letters(&self, letter_ids: &[String]) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let run = |conn: &mut Connection| -> Result<(), rusqlite::Error> {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare("DELETE FROM dead_letters WHERE letter_id = ?1")?;
                for id in letter_ids {
                    stmt.execute(params![id])?;
                }
            }
            tx.commit()
        };
        run(&mut *conn)
            .map_err(|e| SqliteStoreError::from(e).into_store_error("delete_dead_letters"))
    }
}

impl ConfirmationStore for SqliteStore {
    fn persist_requirement(&self, requirement: &ConfirmationRequirement) -> Result<(), StoreError> {
        self.insert_requirement(requirement)
            .map_err(|e| e.into_store_error("persist_requirement"))
    }

    fn load_requirements(&self) -> Result<Vec<ConfirmationRequirement>, StoreError> {
        self.select_requirements()
            .map_err(|e| e.into_store_error("load_requirements"))
    }

    fn update_requirement(
        &self,
        requirement_id: &str,
        update: &RequirementUpdate,
    ) -> Result<(), StoreError> {
        self.conn
            .lock()
            .execute(
                "UPDATE confirmation_requirements
                 SET state = ?2, resolved_at = ?3
                 WHERE requirement_id = ?1",
                params![
                    requirement_id,
                    update.state.to_string(),
                    update.resolved_at.as_ref().map(format_ts),
                ],
            )
            .map(|_| ())
            .map_err(|e| SqliteStoreError::from(e).into_store_error("update_requirement"))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row decoding
// ─────────────────────────────────────────────────────────────────────────────

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(id: &str, raw: &str) -> Result<DateTime<Utc>, SqliteStoreError> {
    raw.parse::<DateTime<Utc>>()
        .map_err(|e| SqliteStoreError::Corrupt {
            id: id.to_string(),
            details: format!("bad timestamp {raw:?}: {e}"),
        })
}

fn risk_str(risk: RiskLevel) -> &'static str {
    match risk {
        RiskLevel::Low => "low",
        RiskLevel::Medium => "medium",
        RiskLevel::High => "high",
        RiskLevel::Critical => "critical",
    }
}

fn parse_risk(id: &str, raw: &str) -> Result<RiskLevel, SqliteStoreError> {
    match raw {
        "low" => Ok(RiskLevel::Low),
        "medium" => Ok(RiskLevel::Medium),
        "high" => Ok(RiskLevel::High),
        "critical" => Ok(RiskLevel::Critical),
        other => Err(SqliteStoreError::Corrupt {
            id: id.to_string(),
            details: format!("unknown risk level {other:?}"),
        }),
    }
}

fn parse_state(id: &str, raw: &str) -> Result<ConfirmationState, SqliteStoreError> {
    serde_json::from_value(serde_json::Value::String(raw.to_string())).map_err(|e| {
        SqliteStoreError::Corrupt {
            id: id.to_string(),
            details: format!("unknown confirmation state {raw:?}: {e}"),
        }
    })
}

struct RawLetter {
    letter_id: String,
    action_id: String,
    intent: String,
    params: String,
    error_code: String,
    error_message: String,
    failure_class: String,
    correlation_id: String,
    session_id: Option<String>,
    created_at: String,
    retries_exhausted: bool,
    replayed: bool,
    replayed_at: Option<String>,
    replay_action_id: Option<String>,
}

impl RawLetter {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            letter_id: row.get(0)?,
            action_id: row.get(1)?,
            intent: row.get(2)?,
            params: row.get(3)?,
            error_code: row.get(4)?,
            error_message: row.get(5)?,
            failure_class: row.get(6)?,
            correlation_id: row.get(7)?,
            session_id: row.get(8)?,
            created_at: row.get(9)?,
            retries_exhausted: row.get(10)?,
            replayed: row.get(11)?,
            replayed_at: row.get(12)?,
            replay_action_id: row.get(13)?,
        })
    }

    fn decode(self) -> Result<DeadLetter, SqliteStoreError> {
        let failure_class: FailureClass =
            self.failure_class
                .parse()
                .map_err(|e: warden_types::WardenError| SqliteStoreError::Corrupt {
                    id: self.letter_id.clone(),
                    details: e.to_string(),
                })?;
        let created_at = parse_ts(&self.letter_id, &self.created_at)?;
        let replayed_at = self
            .replayed_at
            .as_deref()
            .map(|raw| parse_ts(&self.letter_id, raw))
            .transpose()?;
        Ok(DeadLetter {
            params: serde_json::from_str(&self.params)?,
            letter_id: self.letter_id,
            action_id: self.action_id,
            intent: self.intent,
            error_code: self.error_code,
            error_message: self.error_message,
            failure_class,
            correlation_id: self.correlation_id,
            session_id: self.session_id,
            created_at,
            retries_exhausted: self.retries_exhausted,
            replayed: self.replayed,
            replayed_at,
            replay_action_id: self.replay_action_id,
        })
    }
}

struct RawRequirement {
    requirement_id: String,
    action: String,
    args: String,
    scene_id: Option<String>,
    session_id: Option<String>,
    correlation_id: Option<String>,
    state: String,
    created_at: String,
    resolved_at: Option<String>,
    risk_level: String,
}

impl RawRequirement {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            requirement_id: row.get(0)?,
            action: row.get(1)?,
            args: row.get(2)?,
            scene_id: row.get(3)?,
            session_id: row.get(4)?,
            correlation_id: row.get(5)?,
            state: row.get(6)?,
            created_at: row.get(7)?,
            resolved_at: row.get(8)?,
            risk_level: row.get(9)?,
        })
    }

    fn decode(self) -> Result<ConfirmationRequirement, SqliteStoreError> {
        let id = self.requirement_id.as_str();
        let state = parse_state(id, &self.state)?;
        let created_at = parse_ts(id, &self.created_at)?;
        let resolved_at = self
            .resolved_at
            .as_deref()
            .map(|raw| parse_ts(id, raw))
            .transpose()?;
        let risk_level = parse_risk(id, &self.risk_level)?;
        let args = serde_json::from_str(&self.args)?;
        Ok(ConfirmationRequirement {
            requirement_id: self.requirement_id,
            action: self.action,
            args,
            scene_id: self.scene_id,
            session_id: self.session_id,
            correlation_id: self.correlation_id,
            state,
            created_at,
            resolved_at,
            risk_level,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn letter(id: &str, minute: u32) -> DeadLetter {
        DeadLetter {
            letter_id: id.to_string(),
            action_id: format!("act-{id}"),
            intent: "email.send".to_string(),
            params: serde_json::json!({"to": "ops@example.com"}),
            error_code: "TIMEOUT".to_string(),
            error_message: "smtp timed out".to_string(),
            failure_class: FailureClass::Timeout,
            correlation_id: format!("corr-{id}"),
            session_id: None,
            created_at: Utc.with_ymd_and_hms(2025, 3, 1, 12, minute, 0).unwrap(),
            retries_exhausted: true,
            replayed: false,
            replayed_at: None,
            replay_action_id: None,
        }
    }

    #[test]
    fn dead_letters_round_trip_in_created_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.persist_dead_letter(&letter("b", 5)).unwrap();
        store.persist_dead_letter(&letter("a", 1)).unwrap();

        let loaded = store.load_dead_letters().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0], letter("a", 1));
        assert_eq!(loaded[1].letter_id, "b");
    }

    #[test]
    fn update_and_delete_dead_letters() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.persist_dead_letter(&letter("a", 1)).unwrap();
        store.persist_dead_letter(&letter("b", 2)).unwrap();

        let at = Utc.with_ymd_and_hms(2025, 3, 1, 13, 0, 0).unwrap();
        store
            .update_dead_letter(
                "a",
                &DeadLetterUpdate {
                    replayed: true,
                    replayed_at: Some(at),
                    replay_action_id: Some("act-replay".to_string()),
                },
            )
            .unwrap();
        store.delete_dead_letters(&["b".to_string()]).unwrap();

        let loaded = store.load_dead_letters().unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded[0].replayed);
        assert_eq!(loaded[0].replayed_at, Some(at));
        assert_eq!(loaded[0].replay_action_id.as_deref(), Some("act-replay"));
        assert_eq!(store.dead_letter_count().unwrap(), 1);
    }

    #[test]
    fn requirements_round_trip_and_update() {
        let store = SqliteStore::open_in_memory().unwrap();
        let req = ConfirmationRequirement {
            requirement_id: "r1".to_string(),
            action: "shell.run".to_string(),
            args: serde_json::json!({"cmd": "uptime"}),
            scene_id: Some("scene".to_string()),
            session_id: None,
            correlation_id: Some("c1".to_string()),
            state: ConfirmationState::Pending,
            created_at: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
            resolved_at: None,
            risk_level: RiskLevel::Critical,
        };
        store.persist_requirement(&req).unwrap();
        assert_eq!(store.requirement("r1").unwrap(), Some(req.clone()));

        let resolved = Utc.with_ymd_and_hms(2025, 3, 1, 12, 1, 0).unwrap();
        store
            .update_requirement(
                "r1",
                &RequirementUpdate {
                    state: ConfirmationState::Approved,
                    resolved_at: Some(resolved),
                },
            )
            .unwrap();
        let loaded = store.load_requirements().unwrap();
        assert_eq!(loaded[0].state, ConfirmationState::Approved);
        assert_eq!(loaded[0].resolved_at, Some(resolved));
        assert_eq!(store.requirement("missing").unwrap(), None);
    }

    #[test]
    fn corrupt_row_surfaces_as_store_error() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.persist_dead_letter(&letter("a", 1)).unwrap();
        store
            .conn
            .lock()
            .execute(
                "UPDATE dead_letters SET failure_class = 'bogus' WHERE letter_id = 'a'",
                [],
            )
            .unwrap();
        let err = store.load_dead_letters().unwrap_err();
        assert_eq!(err.store, "sqlite");
        assert_eq!(err.operation, "load_dead_letters");
    }

    #[test]
    fn file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.persist_dead_letter(&letter("a", 1)).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.load_dead_letters().unwrap().len(), 1);
    }
}
