//! Per-run stream: `/ws/ui/run/<run_id>/`.
//!
//! Streams every journal event of one run and accepts the run control
//! commands (snapshot, approve, cancel, pause, resume, retry, spawn).

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use serde_json::json;
use tokio::sync::broadcast;
use uuid::Uuid;

use am_domain::push::{make_run_push, run_group};
use am_domain::tenancy::{Membership, UserAction};
use am_domain::{Error, Result};

use crate::api::runs::{log_user_action, spawn_options_from, SpawnSubrunRequest};
use crate::api::{api_error, error_response};
use crate::auth::{require_membership, require_operator};
use crate::state::AppState;
use crate::ws::{parse_command, send_push, ConnectionSlots};

pub async fn run_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
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
    let membership = match require_membership(state.engine.db(), workspace_id, user) {
        Ok(membership) => membership,
        Err(err) => return error_response(&err),
    };
    let slots = match ConnectionSlots::acquire(state.engine.quota().clone(), workspace_id, user) {
        Ok(slots) => slots,
        Err(err) => return error_response(&err),
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, run_id, workspace_id, membership, slots))
        .into_response()
}

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    run_id: Uuid,
    workspace_id: Uuid,
    membership: Membership,
    _slots: ConnectionSlots,
) {
    let (mut sink, mut stream) = socket.split();
    let mut group_rx = state.engine.bus().subscribe(&run_group(run_id));

    let connected = make_run_push(
        run_id,
        "connected",
        json!({"message": "Connected to run stream"}),
        None,
        Some(workspace_id),
    );
    if !send_push(&mut sink, &connected).await {
        return;
    }
    tracing::debug!(%run_id, user_id = %membership.user_id, "run stream connected");

    loop {
        tokio::select! {
            incoming = stream.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(_)) => break,
                };
                let Some((cmd, payload)) = parse_command(&text) else {
                    continue;
                };
                let reply = match dispatch_command(&state, run_id, workspace_id, &membership, &cmd, &payload) {
                    Ok(reply) => reply,
                    Err(err) => make_run_push(
                        run_id,
                        "error",
                        json!({"message": err.to_string()}),
                        None,
                        Some(workspace_id),
                    ),
                };
                if !send_push(&mut sink, &reply).await {
                    break;
                }
            }
            frame = group_rx.recv() => {
                match frame {
                    Ok(push) => {
                        if !send_push(&mut sink, &push).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(%run_id, skipped, "run stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    tracing::debug!(%run_id, "run stream disconnected");
}

/// Execute one client command and build the direct reply frame. Journal
/// events triggered by the command arrive through the group stream.
fn dispatch_command(
    state: &AppState,
    run_id: Uuid,
    workspace_id: Uuid,
    membership: &Membership,
    cmd: &str,
    payload: &serde_json::Value,
) -> Result<am_domain::push::PushMessage> {
    let reply = |event: &str, data: serde_json::Value| {
        make_run_push(run_id, event, data, None, Some(workspace_id))
    };

    match cmd {
        "ping" => Ok(reply(
            "pong",
            json!({
                "message": "pong",
                "echo": payload.get("data").cloned().unwrap_or(json!({})),
            }),
        )),
        "request_snapshot" => {
            let since_seq = payload.get("since_seq").and_then(|v| v.as_u64());
            let snapshot = state.engine.snapshot(run_id, since_seq)?;
            Ok(reply("snapshot", serde_json::to_value(&snapshot)?))
        }
        "approve_tool_call" => {
            let tool_call_id = payload
                .get("tool_call_id")
                .and_then(|v| v.as_str())
                .and_then(|s| Uuid::parse_str(s).ok())
                .ok_or_else(|| Error::Validation("tool_call_id is required".into()))?;
            let call = state.engine.approve_tool_call(tool_call_id, membership.user_id)?;
            log_user_action(
                state,
                membership.user_id,
                workspace_id,
                UserAction::ApproveToolCall,
                json!({"tool_call_id": call.id.to_string(), "run_id": run_id.to_string()}),
            );
            Ok(reply(
                "tool_call_approval_ack",
                json!({"tool_call_id": call.id.to_string()}),
            ))
        }
        "cancel_run" => {
            require_operator(membership)?;
            let reason = payload.get("reason").and_then(|v| v.as_str());
            state.engine.cancel_run(run_id, reason)?;
            Ok(reply("cmd_received", json!({"cmd": cmd})))
        }
        "pause_run" => {
            require_operator(membership)?;
            state.engine.pause_run(run_id)?;
            Ok(reply("cmd_received", json!({"cmd": cmd})))
        }
        "resume_run" => {
            require_operator(membership)?;
            state.engine.resume_run(run_id)?;
            Ok(reply("cmd_received", json!({"cmd": cmd})))
        }
        "retry_run" => {
            require_operator(membership)?;
            state.engine.retry_run(run_id)?;
            Ok(reply("cmd_received", json!({"cmd": cmd})))
        }
        "spawn_subrun" => {
            require_operator(membership)?;
            let request: SpawnSubrunRequest = serde_json::from_value(payload.clone())
                .unwrap_or_default();
            let child = state.engine.spawn_subrun(run_id, spawn_options_from(request))?;
            log_user_action(
                state,
                membership.user_id,
                workspace_id,
                UserAction::SpawnSubrun,
                json!({
                    "parent_run_id": run_id.to_string(),
                    "child_run_id": child.id.to_string(),
                }),
            );
            Ok(reply(
                "cmd_received",
                json!({"cmd": cmd, "child_run_id": child.id.to_string()}),
            ))
        }
        other => Ok(reply("error", json!({"message": format!("Unknown cmd: {other}")}))),
    }
}
