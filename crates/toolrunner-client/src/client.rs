//! The signed HTTP caller behind the [`ToolRunner`] seam.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use am_domain::config::ToolrunnerConfig;
use am_domain::{Error, Result};

use crate::sign::sign_body;
use crate::types::{ExecuteRequest, ExecuteResponse};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Boundary to the external tool-runner process.
///
/// Implementations must not be called while any storage lock is held:
/// the executor performs the call between transactions.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn execute(&self, request: &ExecuteRequest) -> Result<ExecuteResponse>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Reqwest-backed caller for `POST /v1/execute`.
///
/// Created once and reused; the underlying client maintains a
/// connection pool.
pub struct HttpToolRunner {
    http: Client,
    url: String,
    secret: String,
}

impl HttpToolRunner {
    pub fn new(cfg: &ToolrunnerConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.http_timeout_ms))
            .build()
            .map_err(|e| Error::Toolrunner(e.to_string()))?;
        Ok(Self {
            http,
            url: cfg.url.clone(),
            secret: cfg.secret.clone(),
        })
    }
}

#[async_trait]
impl ToolRunner for HttpToolRunner {
    async fn execute(&self, request: &ExecuteRequest) -> Result<ExecuteResponse> {
        // The signed message is the exact body bytes; serialize once.
        let body = serde_json::to_vec(request)?;
        let timestamp = unix_now();
        let signature = sign_body(&self.secret, timestamp, &body);

        let response = self
            .http
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("X-AM-Timestamp", timestamp.to_string())
            .header("X-AM-Signature", signature)
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Toolrunner(format!("toolrunner request failed: {e}")))?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(Error::Toolrunner(format!(
                "toolrunner error: {}",
                status.as_u16()
            )));
        }

        let parsed: ExecuteResponse = response
            .json()
            .await
            .map_err(|e| Error::Toolrunner(format!("toolrunner response invalid: {e}")))?;

        tracing::debug!(
            request_id = %parsed.request_id,
            status = ?parsed.status,
            duration_ms = parsed.duration_ms,
            "toolrunner responded"
        );
        Ok(parsed)
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
