//! Archive records for terminal runs: one row per checkpoint bundle
//! written under the archive root.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunArchive {
    pub id: Uuid,
    pub run_id: Uuid,
    pub archive_path: String,
    /// Checkpoint summary: `{status, steps, events, created}`.
    #[serde(default)]
    pub summary: serde_json::Value,
    #[serde(default)]
    pub notes: String,
    pub created_at: DateTime<Utc>,
}

impl RunArchive {
    pub fn new(run_id: Uuid, archive_path: impl Into<String>, summary: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            archive_path: archive_path.into(),
            summary,
            notes: String::new(),
            created_at: Utc::now(),
        }
    }
}
