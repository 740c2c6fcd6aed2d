//! Outbound push envelope (server -> client) and group-name helpers.
//!
//! Every live frame delivered over a WebSocket uses the same fixed
//! envelope; clients that miss frames reconcile by calling the snapshot
//! endpoint with their last received `seq`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Group names
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn run_group(run_id: Uuid) -> String {
    format!("run.{run_id}")
}

pub fn workspace_group(workspace_id: Uuid) -> String {
    format!("ws.{workspace_id}")
}

pub fn approvals_group(workspace_id: Uuid) -> String {
    format!("approvals.{workspace_id}")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Standard outbound push payload. Fields are simple JSON primitives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushMessage {
    /// Always `"push"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// `run.event` | `workspace.event` | `approvals.event`.
    pub topic: String,
    /// ISO-8601 UTC timestamp.
    pub ts: String,
    /// Event name, e.g. `state_changed`.
    pub event: String,
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl PushMessage {
    fn base(topic: &str, event: &str, data: serde_json::Value) -> Self {
        Self {
            kind: "push".into(),
            topic: topic.into(),
            ts: Utc::now().to_rfc3339(),
            event: event.into(),
            data,
            seq: None,
            run_id: None,
            workspace_id: None,
            user_id: None,
        }
    }
}

pub fn make_run_push(
    run_id: Uuid,
    event: &str,
    data: serde_json::Value,
    seq: Option<u64>,
    workspace_id: Option<Uuid>,
) -> PushMessage {
    let mut push = PushMessage::base("run.event", event, data);
    push.seq = seq;
    push.run_id = Some(run_id.to_string());
    push.workspace_id = workspace_id.map(|id| id.to_string());
    push
}

pub fn make_workspace_push(
    workspace_id: Uuid,
    event: &str,
    data: serde_json::Value,
    seq: Option<u64>,
) -> PushMessage {
    let mut push = PushMessage::base("workspace.event", event, data);
    push.seq = seq;
    push.workspace_id = Some(workspace_id.to_string());
    push
}

pub fn make_approvals_push(workspace_id: Uuid, event: &str, data: serde_json::Value) -> PushMessage {
    let mut push = PushMessage::base("approvals.event", event, data);
    push.workspace_id = Some(workspace_id.to_string());
    push
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_names() {
        let id = Uuid::nil();
        assert_eq!(run_group(id), format!("run.{id}"));
        assert_eq!(workspace_group(id), format!("ws.{id}"));
        assert_eq!(approvals_group(id), format!("approvals.{id}"));
    }

    #[test]
    fn run_push_envelope_shape() {
        let run_id = Uuid::new_v4();
        let ws_id = Uuid::new_v4();
        let push = make_run_push(run_id, "state_changed", serde_json::json!({"from": "PENDING"}), Some(3), Some(ws_id));
        let json = serde_json::to_value(&push).unwrap();
        assert_eq!(json["type"], "push");
        assert_eq!(json["topic"], "run.event");
        assert_eq!(json["event"], "state_changed");
        assert_eq!(json["seq"], 3);
        assert_eq!(json["run_id"], run_id.to_string());
        assert_eq!(json["workspace_id"], ws_id.to_string());
        assert!(json.get("user_id").is_none());
    }

    #[test]
    fn optional_fields_are_omitted() {
        let push = make_approvals_push(Uuid::new_v4(), "tool_call_requested", serde_json::json!({}));
        let json = serde_json::to_value(&push).unwrap();
        assert!(json.get("seq").is_none());
        assert!(json.get("run_id").is_none());
        assert_eq!(json["topic"], "approvals.event");
    }

    #[test]
    fn ts_is_rfc3339() {
        let push = make_workspace_push(Uuid::new_v4(), "run_archived", serde_json::json!({}), None);
        assert!(chrono::DateTime::parse_from_rfc3339(&push.ts).is_ok());
    }
}
