//! AgentMaestro configuration: a TOML document with defaulted sections.
//!
//! Every knob has a serde default so an empty file (or no file) yields a
//! working dev configuration. `Config::validate` reports issues with a
//! severity so the server can warn-and-continue or refuse to start.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub toolrunner: ToolrunnerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub dev: DevConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    /// Origins allowed for CORS. Defaults to localhost-only.
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            allowed_origins: d_cors_origins(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Worker lease duration. Any worker may reclaim an expired lease.
    #[serde(default = "d_20")]
    pub lease_seconds: u64,
    /// Backoff for transient tick failures (lease/tick-rate contention).
    #[serde(default = "d_5")]
    pub retry_backoff_seconds: u64,
    /// Cap on non-terminal children a parent may have in flight.
    #[serde(default = "d_4")]
    pub max_pending_subruns_per_parent: usize,
    /// Tick worker tasks consuming the shared queue.
    #[serde(default = "d_4")]
    pub tick_workers: usize,
    /// Stable worker identity for lease ownership. Defaults to
    /// `<hostname>:<pid>` at startup when unset.
    #[serde(default)]
    pub worker_id: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lease_seconds: 20,
            retry_backoff_seconds: 5,
            max_pending_subruns_per_parent: 4,
            tick_workers: 4,
            worker_id: None,
        }
    }
}

impl EngineConfig {
    /// Resolve the worker id, falling back to `<hostname>:<pid>`.
    pub fn resolved_worker_id(&self) -> String {
        if let Some(ref id) = self.worker_id {
            return id.clone();
        }
        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".into());
        format!("{host}:{}", std::process::id())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Quota
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Shared KV key namespace.
    #[serde(default = "d_quota_namespace")]
    pub namespace: String,
    /// Global rate-limit bypass. Never disables concurrency limits.
    #[serde(default)]
    pub disable_rate_limits: bool,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            namespace: d_quota_namespace(),
            disable_rate_limits: false,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Archive
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Filesystem root; one subdirectory per archived run.
    #[serde(default = "d_archive_root")]
    pub root: PathBuf,
    /// Verbose events older than this are deleted at compaction.
    #[serde(default = "d_30")]
    pub event_retention_days: i64,
    /// Event types eligible for compaction.
    #[serde(default = "d_verbose_events")]
    pub verbose_event_types: Vec<String>,
    /// Archives older than this are removed by the purge pass.
    #[serde(default = "d_90")]
    pub purge_after_days: i64,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            root: d_archive_root(),
            event_retention_days: 30,
            verbose_event_types: d_verbose_events(),
            purge_after_days: 90,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool-runner
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolrunnerConfig {
    #[serde(default = "d_toolrunner_url")]
    pub url: String,
    /// Shared HMAC secret. Empty means unsigned dev mode (validation warns).
    #[serde(default)]
    pub secret: String,
    #[serde(default = "d_35000")]
    pub http_timeout_ms: u64,
    /// Server-enforced per-call execution timeout, forwarded in `limits`.
    #[serde(default = "d_30u")]
    pub timeout_s: u64,
    #[serde(default = "d_output_limit")]
    pub max_output_bytes: u64,
    /// Allowed clock skew for signed requests.
    #[serde(default = "d_300")]
    pub signature_skew_seconds: i64,
}

impl Default for ToolrunnerConfig {
    fn default() -> Self {
        Self {
            url: d_toolrunner_url(),
            secret: String::new(),
            http_timeout_ms: 35_000,
            timeout_s: 30,
            max_output_bytes: d_output_limit(),
            signature_skew_seconds: 300,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Auth + dev
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Cookie carrying the session token.
    #[serde(default = "d_session_cookie")]
    pub session_cookie: String,
    /// Static session tokens (token -> user id). The identity provider
    /// behind these is out of scope; this is the boundary contract.
    #[serde(default)]
    pub tokens: HashMap<String, Uuid>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_cookie: d_session_cookie(),
            tokens: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DevConfig {
    /// Seed a dev workspace, agent and owner membership at startup.
    #[serde(default)]
    pub seed: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl Config {
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        let mut push = |severity, message: String| issues.push(ConfigIssue { severity, message });

        if self.engine.lease_seconds == 0 {
            push(ConfigSeverity::Error, "engine.lease_seconds must be > 0".into());
        }
        if self.engine.tick_workers == 0 {
            push(ConfigSeverity::Error, "engine.tick_workers must be > 0".into());
        }
        if self.toolrunner.secret.is_empty() {
            // Unsigned tool-runner calls are a dev-only convenience.
            let severity = if self.server.host == "127.0.0.1" {
                ConfigSeverity::Warning
            } else {
                ConfigSeverity::Error
            };
            push(severity, "toolrunner.secret is empty — requests will be unsigned".into());
        }
        if self.archive.event_retention_days <= 0 {
            push(ConfigSeverity::Error, "archive.event_retention_days must be positive".into());
        }
        if self.quota.disable_rate_limits {
            push(
                ConfigSeverity::Warning,
                "quota.disable_rate_limits is set — rate limits are bypassed".into(),
            );
        }
        issues
    }
}

// ── serde default helpers ────────────────────────────────────────────

fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_port() -> u16 {
    8642
}
fn d_cors_origins() -> Vec<String> {
    vec!["http://127.0.0.1:8642".into(), "http://localhost:8642".into()]
}
fn d_4() -> usize {
    4
}
fn d_5() -> u64 {
    5
}
fn d_20() -> u64 {
    20
}
fn d_30() -> i64 {
    30
}
fn d_30u() -> u64 {
    30
}
fn d_90() -> i64 {
    90
}
fn d_300() -> i64 {
    300
}
fn d_35000() -> u64 {
    35_000
}
fn d_output_limit() -> u64 {
    1_048_576
}
fn d_quota_namespace() -> String {
    "agentmaestro:quota".into()
}
fn d_archive_root() -> PathBuf {
    PathBuf::from("./run_archives")
}
fn d_verbose_events() -> Vec<String> {
    vec!["token_stream".into(), "debug_log".into()]
}
fn d_toolrunner_url() -> String {
    "http://127.0.0.1:8700/v1/execute".into()
}
fn d_session_cookie() -> String {
    "am_session".into()
}
