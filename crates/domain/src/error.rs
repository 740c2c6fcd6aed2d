//! Shared error type used across all AgentMaestro crates.
//!
//! The variants mirror the failure taxonomy of the orchestration core:
//! validation and permission problems surface to clients as 400/403,
//! `LimitExceeded` as 429, `Locked` is a transient signal the scheduler
//! retries with backoff, and `Permanent` marks a run FAILED.

/// Shared error type used across all AgentMaestro crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("validation: {0}")]
    Validation(String),

    #[error("permission: {0}")]
    Permission(String),

    #[error("limit {name} exceeded ({current}/{allowed})")]
    LimitExceeded {
        /// Human-readable limit name (e.g. "concurrent total runs").
        name: String,
        current: u64,
        allowed: u64,
    },

    #[error("illegal transition {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    /// Transient contention: lease held elsewhere or tick rate exhausted.
    /// The scheduler retries these with backoff.
    #[error("locked: {0}")]
    Locked(String),

    /// Non-recoverable tick failure; the run transitions to FAILED.
    #[error("permanent: {0}")]
    Permanent(String),

    #[error("toolrunner: {0}")]
    Toolrunner(String),

    #[error("config: {0}")]
    Config(String),
}

impl Error {
    /// Whether a tick that failed with this error should be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Locked(_))
    }

    pub fn not_found(kind: &'static str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
