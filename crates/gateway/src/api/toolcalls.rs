//! Tool-call endpoints.
//!
//! - `POST /api/toolcalls/:tool_call_id/approve/`

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use uuid::Uuid;

use am_domain::tenancy::UserAction;

use crate::api::error_response;
use crate::api::runs::log_user_action;
use crate::state::AppState;

pub async fn approve(
    State(state): State<AppState>,
    Path(tool_call_id): Path<Uuid>,
    headers: HeaderMap,
) -> Response {
    let user = match state.sessions.require_user(&headers) {
        Ok(user) => user,
        Err(err) => return error_response(&err),
    };

    // Membership + role are validated by the approval service against
    // the call's workspace.
    match state.engine.approve_tool_call(tool_call_id, user) {
        Ok(call) => {
            let workspace_id = state
                .engine
                .db()
                .read(|t| t.run(call.run_id).map(|r| r.workspace_id));
            if let Some(workspace_id) = workspace_id {
                log_user_action(
                    &state,
                    user,
                    workspace_id,
                    UserAction::ApproveToolCall,
                    json!({
                        "tool_call_id": call.id.to_string(),
                        "run_id": call.run_id.to_string(),
                    }),
                );
            }
            Json(json!({
                "tool_call_id": call.id.to_string(),
                "run_id": call.run_id.to_string(),
                "status": call.status,
            }))
            .into_response()
        }
        Err(err) => error_response(&err),
    }
}
