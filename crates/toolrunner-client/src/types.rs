//! Wire contract for `POST /v1/execute`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use am_domain::tool::RiskLevel;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutePolicy {
    pub risk_level: RiskLevel,
    pub tool_definition_id: Uuid,
    pub requires_approval: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteLimits {
    pub timeout_s: u64,
    pub max_output_bytes: u64,
}

/// Execution request body. Serialized as compact UTF-8 JSON without
/// whitespace; the byte-exact body is what gets signed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub request_id: Uuid,
    pub workspace_id: Uuid,
    pub run_id: Uuid,
    pub tool_name: String,
    pub args: serde_json::Value,
    pub policy: ExecutePolicy,
    pub limits: ExecuteLimits,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunnerStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub request_id: Uuid,
    pub status: RunnerStatus,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
}
