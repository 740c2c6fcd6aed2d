//! Tool definitions and tool calls: the approval-gated bridge between a
//! run and the external tool-runner service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Risk level
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    #[default]
    Safe,
    Elevated,
    Dangerous,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ToolDefinition
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A tool enabled for a workspace. `(workspace_id, name)` is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub args_schema: serde_json::Value,
    pub default_risk_level: RiskLevel,
    pub default_requires_approval: bool,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl ToolDefinition {
    pub fn new(workspace_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            workspace_id,
            name: name.into(),
            description: String::new(),
            args_schema: serde_json::Value::Object(Default::default()),
            default_risk_level: RiskLevel::Safe,
            default_requires_approval: false,
            enabled: true,
            created_at: Utc::now(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ToolCall
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolCallStatus {
    Pending,
    Approved,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl ToolCallStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

/// One invocation of a tool, unique per originating step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: Uuid,
    pub run_id: Uuid,
    pub step_id: Uuid,
    pub tool_name: String,
    #[serde(default)]
    pub args: serde_json::Value,
    pub risk_level: RiskLevel,
    pub requires_approval: bool,
    pub correlation_id: Uuid,
    pub status: ToolCallStatus,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub observed_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    #[serde(default)]
    pub result: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ToolCall {
    pub fn new(
        run_id: Uuid,
        step_id: Uuid,
        tool_name: impl Into<String>,
        args: serde_json::Value,
        requires_approval: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            step_id,
            tool_name: tool_name.into(),
            args,
            risk_level: RiskLevel::Safe,
            requires_approval,
            correlation_id: Uuid::new_v4(),
            status: if requires_approval {
                ToolCallStatus::Pending
            } else {
                ToolCallStatus::Approved
            },
            approved_by: None,
            approved_at: None,
            started_at: None,
            ended_at: None,
            observed_at: None,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            result: serde_json::Value::Object(Default::default()),
            created_at: Utc::now(),
        }
    }

    pub fn mark_approved(&mut self, user_id: Uuid) {
        self.status = ToolCallStatus::Approved;
        self.approved_by = Some(user_id);
        self.approved_at = Some(Utc::now());
    }
}
