//! Workspace stream: `/ws/ui/workspace/?workspace_id=<id>`.
//!
//! Delivers workspace summary events (e.g. archival notifications) and,
//! after `subscribe_approvals`, the tool-call approval stream.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;
use uuid::Uuid;

use am_domain::push::{approvals_group, make_approvals_push, make_workspace_push, workspace_group, PushMessage};

use crate::api::{api_error, error_response};
use crate::auth::require_membership;
use crate::state::AppState;
use crate::ws::{parse_command, send_push, ConnectionSlots};

#[derive(Debug, Deserialize)]
pub struct WorkspaceWsQuery {
    pub workspace_id: Option<Uuid>,
}

pub async fn workspace_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WorkspaceWsQuery>,
    headers: HeaderMap,
) -> Response {
    let user = match state.sessions.require_user(&headers) {
        Ok(user) => user,
        Err(err) => return error_response(&err),
    };
    let Some(workspace_id) = query.workspace_id else {
        return api_error(
            StatusCode::BAD_REQUEST,
            "workspace_id query parameter is required",
        );
    };
    if let Err(err) = require_membership(state.engine.db(), workspace_id, user) {
        return error_response(&err);
    }
    let slots = match ConnectionSlots::acquire(state.engine.quota().clone(), workspace_id, user) {
        Ok(slots) => slots,
        Err(err) => return error_response(&err),
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, workspace_id, user, slots))
        .into_response()
}

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    workspace_id: Uuid,
    user_id: Uuid,
    _slots: ConnectionSlots,
) {
    let (mut sink, mut stream) = socket.split();
    let bus = state.engine.bus().clone();
    let mut group_rx = bus.subscribe(&workspace_group(workspace_id));
    let mut approvals_rx: Option<broadcast::Receiver<PushMessage>> = None;

    let connected = make_workspace_push(
        workspace_id,
        "connected",
        json!({"user_id": user_id.to_string(), "approvals_subscribed": false}),
        None,
    );
    if !send_push(&mut sink, &connected).await {
        return;
    }
    tracing::debug!(%workspace_id, %user_id, "workspace stream connected");

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
                let reply = match cmd.as_str() {
                    "ping" => make_workspace_push(
                        workspace_id,
                        "pong",
                        json!({
                            "message": "pong",
                            "echo": payload.get("data").cloned().unwrap_or(json!({})),
                        }),
                        None,
                    ),
                    "subscribe_approvals" => {
                        if approvals_rx.is_none() {
                            approvals_rx = Some(bus.subscribe(&approvals_group(workspace_id)));
                        }
                        make_approvals_push(
                            workspace_id,
                            "subscribed",
                            json!({"message": "Subscribed to approvals stream"}),
                        )
                    }
                    "unsubscribe_approvals" => {
                        approvals_rx = None;
                        make_approvals_push(
                            workspace_id,
                            "unsubscribed",
                            json!({"message": "Unsubscribed from approvals stream"}),
                        )
                    }
                    other => make_workspace_push(
                        workspace_id,
                        "error",
                        json!({"message": format!("Unknown cmd: {other}")}),
                        None,
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
                        tracing::debug!(%workspace_id, skipped, "workspace stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            frame = recv_approvals(&mut approvals_rx) => {
                match frame {
                    Ok(push) => {
                        if !send_push(&mut sink, &push).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => {
                        approvals_rx = None;
                    }
                }
            }
        }
    }

    tracing::debug!(%workspace_id, %user_id, "workspace stream disconnected");
}

/// Receive from the approvals stream when subscribed; pends forever
/// otherwise (the future is recreated on every select iteration).
async fn recv_approvals(
    rx: &mut Option<broadcast::Receiver<PushMessage>>,
) -> Result<PushMessage, broadcast::error::RecvError> {
    match rx.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
