//! Archival: checkpoint bundles for terminal runs, verbose-event
//! compaction, and archive purging.

use std::io::Write;
use std::path::PathBuf;

use chrono::{Duration, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::json;
use uuid::Uuid;

use am_domain::archive::RunArchive;
use am_domain::Result;

use crate::core::Engine;
use crate::journal::AppendEvent;

pub const RUN_ARCHIVED_EVENT: &str = "run_archived";

/// Result row of one batch-archival pass.
#[derive(Debug, Clone)]
pub struct ArchiveOutcome {
    pub run_id: Uuid,
    pub archive_path: String,
    pub compacted: usize,
}

impl Engine {
    fn archive_dir(&self, run_id: Uuid) -> Result<PathBuf> {
        let dir = self.options.archive.root.join(run_id.to_string());
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Serialize the run's snapshot to the archive directory and record
    /// a [`RunArchive`] row. Emits `run_archived` on both the run stream
    /// and the workspace summary stream.
    pub fn create_checkpoint(&self, run_id: Uuid, compress: bool) -> Result<RunArchive> {
        let snapshot = self.snapshot(run_id, None)?;
        let serialized = serde_json::to_string(&snapshot)?;
        let timestamp = Utc::now();

        let dir = self.archive_dir(run_id)?;
        let stem = format!("run_snapshot_{}", timestamp.format("%Y%m%d%H%M%S"));
        let path = if compress {
            let path = dir.join(format!("{stem}.json.gz"));
            let file = std::fs::File::create(&path)?;
            let mut encoder = GzEncoder::new(file, Compression::default());
            encoder.write_all(serialized.as_bytes())?;
            encoder.finish()?;
            path
        } else {
            let path = dir.join(format!("{stem}.json"));
            std::fs::write(&path, &serialized)?;
            path
        };

        let retention = self.options.archive.event_retention_days;
        let summary = json!({
            "status": snapshot.run.status,
            "steps": snapshot.steps.len(),
            "events": snapshot.events_since_seq.len(),
            "created": timestamp.to_rfc3339(),
        });
        let notes = format!("Checkpoint created with retention {retention} days.");

        let mut archive = RunArchive::new(run_id, path.to_string_lossy().to_string(), summary.clone());
        archive.notes = notes.clone();
        let record = archive.clone();

        self.db.transaction(|txn| {
            txn.insert_archive(record.clone());
            self.append_event_in(
                txn,
                run_id,
                AppendEvent::new(
                    RUN_ARCHIVED_EVENT,
                    json!({
                        "archive_id": record.id.to_string(),
                        "archive_path": record.archive_path,
                        "summary": summary,
                        "notes": notes,
                        "retention_days": retention,
                    }),
                )
                .workspace_summary(RUN_ARCHIVED_EVENT),
            )?;
            Ok(())
        })?;

        tracing::info!(%run_id, path = %path.display(), "checkpoint created");
        Ok(archive)
    }

    /// Delete verbose events of a run older than the retention cutoff.
    /// Returns the number of deleted events.
    pub fn compact_events(
        &self,
        run_id: Uuid,
        retention_days: Option<i64>,
        event_types: Option<&[String]>,
    ) -> Result<usize> {
        let days = retention_days.unwrap_or(self.options.archive.event_retention_days);
        let cutoff = Utc::now() - Duration::days(days);
        let types: Vec<String> = event_types
            .map(|t| t.to_vec())
            .unwrap_or_else(|| self.options.archive.verbose_event_types.clone());

        let deleted = self.db.transaction(|txn| {
            Ok(txn.delete_events(run_id, |event| {
                event.created_at < cutoff
                    && (types.is_empty() || types.iter().any(|t| t == &event.event_type))
            }))
        })?;
        if deleted > 0 {
            tracing::info!(%run_id, deleted, "compacted verbose events");
        }
        Ok(deleted)
    }

    /// Archive terminal runs that ended before the cutoff and have not
    /// been archived yet, oldest first. Each run is checkpointed, then
    /// optionally compacted, then stamped `archived_at`.
    pub fn archive_completed_runs(
        &self,
        older_than_days: i64,
        limit: Option<usize>,
        compact: bool,
        event_types: Option<&[String]>,
    ) -> Result<Vec<ArchiveOutcome>> {
        let cutoff = Utc::now() - Duration::days(older_than_days);
        let mut candidates: Vec<Uuid> = self
            .db
            .read(|t| t.archivable_runs(cutoff).iter().map(|r| r.id).collect());
        if let Some(limit) = limit {
            candidates.truncate(limit);
        }

        let mut results = Vec::with_capacity(candidates.len());
        for run_id in candidates {
            let archive = self.create_checkpoint(run_id, true)?;
            let compacted = if compact {
                self.compact_events(run_id, None, event_types)?
            } else {
                0
            };
            self.db.transaction(|txn| {
                txn.update_run(run_id, |r| r.archived_at = Some(Utc::now()))?;
                Ok(())
            })?;
            results.push(ArchiveOutcome {
                run_id,
                archive_path: archive.archive_path,
                compacted,
            });
        }
        Ok(results)
    }

    /// Delete archive rows and their on-disk files older than the
    /// cutoff. Missing files are tolerated.
    pub fn purge_old_archives(&self, older_than_days: i64) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(older_than_days);
        let doomed: Vec<(Uuid, String)> = self.db.read(|t| {
            t.archives_older_than(cutoff)
                .iter()
                .map(|a| (a.id, a.archive_path.clone()))
                .collect()
        });

        for (_, path) in &doomed {
            let path = std::path::Path::new(path);
            if path.exists() {
                if let Err(err) = std::fs::remove_file(path) {
                    tracing::warn!(path = %path.display(), error = %err, "failed to remove archive file");
                }
            }
        }

        let count = doomed.len();
        self.db.transaction(|txn| {
            for (id, _) in &doomed {
                txn.delete_archive(*id);
            }
            Ok(())
        })?;
        if count > 0 {
            tracing::info!(purged = count, "purged old archives");
        }
        Ok(count)
    }
}
