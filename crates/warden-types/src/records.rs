//! Persisted / audit record shapes.
//!
//! Field names are part of the audit contract and must not change:
//!
//! ```text
//! DeadLetter{letter_id, action_id, intent, params, error_code, error_message,
//!            failure_class, correlation_id, session_id, created_at,
//!            retries_exhausted, replayed, replayed_at?, replay_action_id?}
//! ConfirmationRequirement{requirement_id, action, args, scene_id, session_id,
//!            correlation_id, state, created_at, resolved_at, risk_level}
//! ```
//!
//! Timestamps serialize as ISO-8601 with a `Z` suffix.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ConfirmationState, FailureClass, RiskLevel};

/// An action that failed beyond recovery and is held for inspection/replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DeadLetter {
    pub letter_id: String,
    pub action_id: String,
    pub intent: String,
    pub params: Value,
    pub error_code: String,
    pub error_message: String,
    pub failure_class: FailureClass,
    pub correlation_id: String,
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub retries_exhausted: bool,
    pub replayed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replayed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replay_action_id: Option<String>,
}

/// One explicit approval request for an autonomously proposed action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConfirmationRequirement {
    pub requirement_id: String,
    pub action: String,
    pub args: Value,
    pub scene_id: Option<String>,
    pub session_id: Option<String>,
    pub correlation_id: Option<String>,
    pub state: ConfirmationState,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub risk_level: RiskLevel,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_letter() -> DeadLetter {
        DeadLetter {
            letter_id: "dl-1".to_string(),
            action_id: "act-1".to_string(),
            intent: "calendar.create".to_string(),
            params: serde_json::json!({"title": "standup"}),
            error_code: "TIMEOUT".to_string(),
            error_message: "upstream timed out".to_string(),
            failure_class: FailureClass::Timeout,
            correlation_id: "corr-1".to_string(),
            session_id: Some("sess-1".to_string()),
            created_at: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
            retries_exhausted: true,
            replayed: false,
            replayed_at: None,
            replay_action_id: None,
        }
    }

    #[test]
    fn dead_letter_uses_exact_field_names_and_zulu_timestamps() {
        let json = serde_json::to_value(sample_letter()).unwrap();
        let obj = json.as_object().unwrap();
        for key in [
            "letter_id",
            "action_id",
            "intent",
            "params",
            "error_code",
            "error_message",
            "failure_class",
            "correlation_id",
            "session_id",
            "created_at",
            "retries_exhausted",
            "replayed",
        ] {
            assert!(obj.contains_key(key), "missing field {key}");
        }
        // Optional replay metadata is omitted until a replay happens.
        assert!(!obj.contains_key("replayed_at"));
        assert_eq!(obj["created_at"], "2025-03-01T12:00:00Z");
        assert_eq!(obj["failure_class"], "timeout");
    }

    #[test]
    fn confirmation_requirement_field_names() {
        let req = ConfirmationRequirement {
            requirement_id: "req-1".to_string(),
            action: "shell.run".to_string(),
            args: serde_json::json!({"cmd": "ls"}),
            scene_id: None,
            session_id: Some("s".to_string()),
            correlation_id: Some("c".to_string()),
            state: ConfirmationState::Pending,
            created_at: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
            resolved_at: None,
            risk_level: RiskLevel::Critical,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["state"], "PENDING");
        assert_eq!(json["risk_level"], "critical");
        assert!(json["resolved_at"].is_null());
        let back: ConfirmationRequirement = serde_json::from_value(json).unwrap();
        assert_eq!(back, req);
    }
}
