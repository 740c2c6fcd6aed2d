//! WebSocket surface: the workspace stream (summary + opt-in approvals)
//! and the per-run stream.

pub mod run;
pub mod workspace;

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use uuid::Uuid;

use am_domain::push::PushMessage;
use am_domain::Result;
use am_quota::{LimitKey, QuotaManager};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Connection slots
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Holds the per-workspace and per-user connection slots for one live
/// socket; both are released on drop.
pub(crate) struct ConnectionSlots {
    quota: Arc<QuotaManager>,
    workspace_id: String,
    user_id: String,
    member: String,
}

impl ConnectionSlots {
    pub(crate) fn acquire(
        quota: Arc<QuotaManager>,
        workspace_id: Uuid,
        user_id: Uuid,
    ) -> Result<Self> {
        let member = Uuid::new_v4().to_string();
        let workspace_id = workspace_id.to_string();
        let user_id = user_id.to_string();

        quota.acquire_concurrency(&workspace_id, LimitKey::WsConnectionsWorkspace, &member)?;
        if let Err(err) = quota.acquire_concurrency(&user_id, LimitKey::WsConnectionsUser, &member)
        {
            quota.release_concurrency(&workspace_id, LimitKey::WsConnectionsWorkspace, &member);
            return Err(err);
        }

        Ok(Self {
            quota,
            workspace_id,
            user_id,
            member,
        })
    }
}

impl Drop for ConnectionSlots {
    fn drop(&mut self) {
        self.quota.release_concurrency(
            &self.workspace_id,
            LimitKey::WsConnectionsWorkspace,
            &self.member,
        );
        self.quota
            .release_concurrency(&self.user_id, LimitKey::WsConnectionsUser, &self.member);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Frame helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Incoming client command: `{type:"cmd", cmd:"<name>", ...}`.
/// Returns the command name and the full payload, or `None` for frames
/// that are not commands.
pub(crate) fn parse_command(text: &str) -> Option<(String, serde_json::Value)> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    if value.get("type").and_then(|t| t.as_str()) != Some("cmd") {
        return None;
    }
    let cmd = value.get("cmd").and_then(|c| c.as_str())?.to_owned();
    Some((cmd, value))
}

/// Serialize and send one push frame. Returns false when the socket is
/// gone.
pub(crate) async fn send_push(
    sink: &mut SplitSink<WebSocket, Message>,
    push: &PushMessage,
) -> bool {
    match serde_json::to_string(push) {
        Ok(json) => sink.send(Message::Text(json)).await.is_ok(),
        Err(err) => {
            tracing::warn!(error = %err, "failed to serialize push frame");
            true
        }
    }
}
