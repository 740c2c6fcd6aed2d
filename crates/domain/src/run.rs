//! The central run entity plus its append-only journals: steps (progress
//! units indexed 1..N) and events (per-run `seq`-ordered records).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Paused,
    WaitingForApproval,
    WaitingForTool,
    WaitingForSubrun,
    WaitingForUser,
    Completed,
    Failed,
    Canceled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    /// FAILED and CANCELED trigger a parent's failure policy.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::Canceled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::WaitingForApproval => "WAITING_FOR_APPROVAL",
            Self::WaitingForTool => "WAITING_FOR_TOOL",
            Self::WaitingForSubrun => "WAITING_FOR_SUBRUN",
            Self::WaitingForUser => "WAITING_FOR_USER",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Channel
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    #[default]
    Dashboard,
    Telegram,
    Api,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AgentRun
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub const DEFAULT_MAX_STEPS: u32 = 80;
pub const DEFAULT_MAX_TOOL_CALLS: u32 = 40;

/// A stateful, step-producing computation scoped to a workspace.
///
/// Invariants:
/// - status changes obey the state machine's legal edge set
/// - `current_step_index` equals the highest `step_index` appended
/// - terminal status <=> `ended_at` is set, and is never left
/// - the lease fields grant at most one live worker the right to advance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRun {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub agent_id: Uuid,
    pub parent_run_id: Option<Uuid>,
    pub started_by: Option<Uuid>,
    pub correlation_id: Uuid,

    pub status: RunStatus,
    pub channel: Channel,
    pub cancel_requested: bool,
    pub max_steps: u32,
    pub max_tool_calls: u32,

    /// Progress cursor; bumped by exactly one per appended step.
    pub current_step_index: u32,

    // Worker lease.
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub lock_expires_at: Option<DateTime<Utc>>,
    /// External scheduler task handle, used only for revocation on cancel.
    pub locked_task_id: Option<String>,

    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
    pub error_summary: String,

    pub input_text: String,
    pub final_text: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentRun {
    pub fn new(workspace_id: Uuid, agent_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workspace_id,
            agent_id,
            parent_run_id: None,
            started_by: None,
            correlation_id: Uuid::new_v4(),
            status: RunStatus::Pending,
            channel: Channel::Dashboard,
            cancel_requested: false,
            max_steps: DEFAULT_MAX_STEPS,
            max_tool_calls: DEFAULT_MAX_TOOL_CALLS,
            current_step_index: 0,
            locked_by: None,
            locked_at: None,
            lock_expires_at: None,
            locked_task_id: None,
            started_at: None,
            ended_at: None,
            archived_at: None,
            error_summary: String::new(),
            input_text: String::new(),
            final_text: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this run is a parent (top-level) run for quota accounting.
    pub fn is_parent(&self) -> bool {
        self.parent_run_id.is_none()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AgentStep
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepKind {
    Plan,
    ModelCall,
    ToolCall,
    Observation,
    Message,
    SubrunSpawn,
}

/// One unit of recorded progress. `(run_id, step_index)` is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStep {
    pub id: Uuid,
    pub run_id: Uuid,
    pub step_index: u32,
    pub kind: StepKind,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub correlation_id: Uuid,
    pub created_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RunEvent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Append-only journal record. `(run_id, seq)` is unique and `seq` is
/// allocated monotonically per run starting at 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub id: Uuid,
    pub run_id: Uuid,
    pub seq: u64,
    pub event_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub correlation_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}
