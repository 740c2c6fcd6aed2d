//! Tenancy entities: workspaces, memberships, agent templates, and the
//! user action audit log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workspace
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tenancy boundary. Every quota key and every run is scoped to one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: Uuid,
    pub name: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workspace {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Membership
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Owner,
    Admin,
    Operator,
    Viewer,
}

impl Role {
    /// OWNER/ADMIN/OPERATOR may approve tool calls and issue run controls;
    /// VIEWER is read-only.
    pub fn can_operate(self) -> bool {
        matches!(self, Self::Owner | Self::Admin | Self::Operator)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub user_id: Uuid,
    pub role: Role,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Membership {
    pub fn new(workspace_id: Uuid, user_id: Uuid, role: Role) -> Self {
        Self {
            id: Uuid::new_v4(),
            workspace_id,
            user_id,
            role,
            active: true,
            created_at: Utc::now(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent template
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run template bound to a workspace. Immutable from the engine's
/// viewpoint: runs copy what they need at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub default_model: String,
    pub temperature: f32,
    pub system_prompt: String,
    #[serde(default)]
    pub tool_policy: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(workspace_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            workspace_id,
            name: name.into(),
            description: String::new(),
            default_model: "gpt-5".into(),
            temperature: 0.7,
            system_prompt: String::new(),
            tool_policy: serde_json::Value::Object(Default::default()),
            created_at: Utc::now(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// User action log
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserAction {
    SpawnSubrun,
    ApproveToolCall,
}

/// Audit record for sensitive user actions (subrun spawns, approvals).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserActionLog {
    pub id: Uuid,
    pub user_id: Uuid,
    pub workspace_id: Option<Uuid>,
    pub action: UserAction,
    #[serde(default)]
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl UserActionLog {
    pub fn new(
        user_id: Uuid,
        workspace_id: Option<Uuid>,
        action: UserAction,
        details: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            workspace_id,
            action,
            details,
            created_at: Utc::now(),
        }
    }
}
