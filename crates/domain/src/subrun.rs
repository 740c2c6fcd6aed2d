//! Subrun links: the join/failure contract between a parent run and one
//! spawned child. Siblings sharing a `group_id` form one join set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Policies
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// When may the parent resume from WAITING_FOR_SUBRUN?
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JoinPolicy {
    /// Resume once no active sibling remains.
    #[default]
    WaitAll,
    /// Resume as soon as any child reaches a terminal status.
    WaitAny,
    /// Resume once `quorum` children reached a terminal status.
    Quorum,
    /// Resume once all children finished or the group timeout elapsed.
    Timeout,
}

/// How does the parent react to a FAILED/CANCELED child?
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailurePolicy {
    /// Parent fails immediately.
    #[default]
    FailFast,
    /// Cancel every active sibling, then fail the parent.
    CancelSiblings,
    /// Ignore the failure and keep evaluating the join condition.
    Continue,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SubrunLink
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubrunLink {
    pub id: Uuid,
    pub parent_run_id: Uuid,
    pub child_run_id: Uuid,
    pub group_id: Uuid,
    pub join_policy: JoinPolicy,
    pub quorum: Option<u32>,
    pub timeout_seconds: Option<u64>,
    pub failure_policy: FailurePolicy,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl SubrunLink {
    /// Link metadata as carried in `subrun_completed` / `subrun_cancelled`
    /// event payloads.
    pub fn metadata_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "group_id": self.group_id.to_string(),
            "join_policy": self.join_policy,
            "quorum": self.quorum,
            "timeout_seconds": self.timeout_seconds,
            "failure_policy": self.failure_policy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policies_serialize_screaming_snake() {
        assert_eq!(serde_json::to_string(&JoinPolicy::WaitAny).unwrap(), "\"WAIT_ANY\"");
        assert_eq!(serde_json::to_string(&JoinPolicy::Quorum).unwrap(), "\"QUORUM\"");
        assert_eq!(
            serde_json::to_string(&FailurePolicy::CancelSiblings).unwrap(),
            "\"CANCEL_SIBLINGS\""
        );
    }

    #[test]
    fn defaults_are_wait_all_fail_fast() {
        assert_eq!(JoinPolicy::default(), JoinPolicy::WaitAll);
        assert_eq!(FailurePolicy::default(), FailurePolicy::FailFast);
    }

    #[test]
    fn metadata_payload_contains_policies() {
        let link = SubrunLink {
            id: Uuid::new_v4(),
            parent_run_id: Uuid::new_v4(),
            child_run_id: Uuid::new_v4(),
            group_id: Uuid::new_v4(),
            join_policy: JoinPolicy::Quorum,
            quorum: Some(2),
            timeout_seconds: None,
            failure_policy: FailurePolicy::Continue,
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
        };
        let payload = link.metadata_payload();
        assert_eq!(payload["join_policy"], "QUORUM");
        assert_eq!(payload["quorum"], 2);
        assert_eq!(payload["failure_policy"], "CONTINUE");
    }
}
