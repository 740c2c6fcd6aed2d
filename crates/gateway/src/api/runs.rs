//! Run endpoints.
//!
//! - `POST /api/runs/`                       — start a run
//! - `POST /api/runs/:run_id/spawn_subrun/`  — spawn a child run
//! - `GET  /api/runs/:run_id/snapshot/`      — reconnect snapshot

use axum::extract::{Json, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use am_domain::run::Channel;
use am_domain::subrun::{FailurePolicy, JoinPolicy};
use am_domain::tenancy::{UserAction, UserActionLog};
use am_engine::SpawnOptions;
use am_quota::LimitKey;

use crate::api::{api_error, error_response};
use crate::auth::require_membership;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/runs/
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct StartRunRequest {
    pub workspace_id: Uuid,
    pub agent_id: Uuid,
    #[serde(default)]
    pub input_text: String,
    /// Unknown channels fall back to DASHBOARD.
    #[serde(default)]
    pub channel: Option<serde_json::Value>,
}

pub async fn start_run(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<StartRunRequest>,
) -> Response {
    let user = match state.sessions.require_user(&headers) {
        Ok(user) => user,
        Err(err) => return error_response(&err),
    };
    if let Err(err) = require_membership(state.engine.db(), body.workspace_id, user) {
        return error_response(&err);
    }

    let channel = body
        .channel
        .and_then(|v| serde_json::from_value::<Channel>(v).ok())
        .unwrap_or_default();

    match state.engine.create_run(
        body.workspace_id,
        body.agent_id,
        body.input_text,
        channel,
        Some(user),
    ) {
        Ok(run) => Json(json!({
            "run_id": run.id.to_string(),
            "status": run.status,
            "workspace_id": run.workspace_id.to_string(),
            "agent_id": run.agent_id.to_string(),
        }))
        .into_response(),
        Err(err) => error_response(&err),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/runs/:run_id/spawn_subrun/
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default, Deserialize)]
pub struct SpawnSubrunOptions {
    pub join_policy: Option<JoinPolicy>,
    pub quorum: Option<u32>,
    pub timeout_seconds: Option<u64>,
    pub failure_policy: Option<FailurePolicy>,
    pub group_id: Option<Uuid>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SpawnSubrunRequest {
    #[serde(default)]
    pub input_text: Option<String>,
    #[serde(default)]
    pub options: SpawnSubrunOptions,
}

pub(crate) fn spawn_options_from(body: SpawnSubrunRequest) -> SpawnOptions {
    let options = body.options;
    SpawnOptions {
        input_text: body.input_text.unwrap_or_default(),
        join_policy: options.join_policy.unwrap_or_default(),
        quorum: options.quorum,
        timeout_seconds: options.timeout_seconds,
        failure_policy: options.failure_policy.unwrap_or_default(),
        group_id: options.group_id,
        metadata: options.metadata,
    }
}

pub async fn spawn_subrun(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<SpawnSubrunRequest>,
) -> Response {
    let user = match state.sessions.require_user(&headers) {
        Ok(user) => user,
        Err(err) => return error_response(&err),
    };
    let Some(workspace_id) = state
        .engine
        .db()
        .read(|t| t.run(run_id).map(|r| r.workspace_id))
    else {
        return api_error(StatusCode::NOT_FOUND, format!("run {run_id} not found"));
    };
    if let Err(err) = require_membership(state.engine.db(), workspace_id, user) {
        return error_response(&err);
    }

    let spawn_options = spawn_options_from(body);
    match state.engine.spawn_subrun(run_id, spawn_options) {
        Ok(child) => {
            log_user_action(
                &state,
                user,
                workspace_id,
                UserAction::SpawnSubrun,
                json!({"parent_run_id": run_id.to_string(), "child_run_id": child.id.to_string()}),
            );
            Json(json!({
                "child_run_id": child.id.to_string(),
                "status": child.status,
                "correlation_id": child.correlation_id.to_string(),
            }))
            .into_response()
        }
        Err(err) => error_response(&err),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/runs/:run_id/snapshot/
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct SnapshotQuery {
    /// Kept as a string so a malformed value yields 400, not 422.
    pub since_seq: Option<String>,
}

pub async fn snapshot(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    Query(query): Query<SnapshotQuery>,
    headers: HeaderMap,
) -> Response {
    let user = match state.sessions.require_user(&headers) {
        Ok(user) => user,
        Err(err) => return error_response(&err),
    };
    let Some(workspace_id) = state
        .engine
        .db()
        .read(|t| t.run(run_id).map(|r| r.workspace_id))
    else {
        return api_error(StatusCode::NOT_FOUND, format!("run {run_id} not found"));
    };
    if let Err(err) = require_membership(state.engine.db(), workspace_id, user) {
        return error_response(&err);
    }
    if let Err(err) = state
        .engine
        .quota()
        .record_request(&workspace_id.to_string(), LimitKey::Snapshot)
    {
        return error_response(&err);
    }

    let since_seq = match query.since_seq.as_deref() {
        None | Some("") => None,
        Some(raw) => match raw.parse::<u64>() {
            Ok(seq) => Some(seq),
            Err(_) => {
                return api_error(StatusCode::BAD_REQUEST, "since_seq must be an integer");
            }
        },
    };

    match state.engine.snapshot(run_id, since_seq) {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(err) => error_response(&err),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) fn log_user_action(
    state: &AppState,
    user_id: Uuid,
    workspace_id: Uuid,
    action: UserAction,
    details: serde_json::Value,
) {
    let result = state.engine.db().transaction(|txn| {
        txn.insert_action_log(UserActionLog::new(
            user_id,
            Some(workspace_id),
            action,
            details.clone(),
        ));
        Ok(())
    });
    if let Err(err) = result {
        tracing::warn!(error = %err, "failed to record user action");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_request_parses_nested_options() {
        let body: SpawnSubrunRequest = serde_json::from_value(json!({
            "input_text": "analyze",
            "options": {
                "join_policy": "QUORUM",
                "quorum": 2,
                "failure_policy": "CONTINUE",
            }
        }))
        .unwrap();
        let options = spawn_options_from(body);
        assert_eq!(options.input_text, "analyze");
        assert_eq!(options.join_policy, JoinPolicy::Quorum);
        assert_eq!(options.quorum, Some(2));
        assert_eq!(options.failure_policy, FailurePolicy::Continue);
        assert!(options.group_id.is_none());
    }

    #[test]
    fn spawn_request_defaults() {
        let body: SpawnSubrunRequest = serde_json::from_value(json!({})).unwrap();
        let options = spawn_options_from(body);
        assert_eq!(options.join_policy, JoinPolicy::WaitAll);
        assert_eq!(options.failure_policy, FailurePolicy::FailFast);
        assert!(options.input_text.is_empty());
    }
}
