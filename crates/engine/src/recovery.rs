//! Lease management and recovery: claim/release of the worker lease,
//! retry planning, run cancellation with cascade, and the periodic
//! reconciliation sweep.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use am_domain::run::{AgentRun, RunStatus};
use am_domain::{Error, Result};
use am_storage::Txn;

use crate::core::Engine;
use crate::journal::AppendEvent;

pub const RUN_CANCELLED_EVENT: &str = "run_cancelled";

/// Retry guidance returned to the scheduler after a failed tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryInstruction {
    pub retry: bool,
    pub delay_seconds: u64,
}

/// Counters from one reconciliation sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub resumed_waiting_parents: usize,
    pub stale_leases_reclaimed: usize,
}

impl Engine {
    // ── Lease primitives ─────────────────────────────────────────────

    fn lock_expired(&self, run: &AgentRun, now: DateTime<Utc>) -> bool {
        let Some(locked_at) = run.locked_at else {
            return false;
        };
        if let Some(expires_at) = run.lock_expires_at {
            return expires_at <= now;
        }
        (now - locked_at).num_seconds() >= self.options.engine.lease_seconds as i64
    }

    /// Claim the lease on a run, reclaiming a stale one. Raises `Locked`
    /// while another live holder owns it.
    pub(crate) fn claim_in(&self, txn: &mut Txn, run_id: Uuid) -> Result<AgentRun> {
        let run = txn
            .tables()
            .run(run_id)
            .cloned()
            .ok_or_else(|| Error::not_found("run", run_id))?;
        let now = Utc::now();

        if let Some(ref holder) = run.locked_by {
            if holder != &self.worker_id && !self.lock_expired(&run, now) {
                return Err(Error::Locked(format!("run {run_id} is locked by {holder}")));
            }
        }

        let lease = Duration::seconds(self.options.engine.lease_seconds as i64);
        let worker_id = self.worker_id.clone();
        txn.update_run(run_id, |r| {
            r.locked_by = Some(worker_id);
            r.locked_at = Some(now);
            r.lock_expires_at = Some(now + lease);
        })
    }

    /// Release the lease if this worker still holds it.
    pub(crate) fn release_lock_in(&self, txn: &mut Txn, run_id: Uuid) -> Result<()> {
        let held = txn
            .tables()
            .run(run_id)
            .map_or(false, |r| r.locked_by.as_deref() == Some(&self.worker_id));
        if held {
            txn.update_run(run_id, |r| {
                r.locked_by = None;
                r.locked_at = None;
                r.lock_expires_at = None;
            })?;
        }
        Ok(())
    }

    // ── Retry policy ─────────────────────────────────────────────────

    /// Retry guidance for a failed tick: transient errors back off and
    /// retry, everything else is permanent.
    pub fn plan_retry(&self, err: &Error) -> RetryInstruction {
        if err.is_transient() {
            RetryInstruction {
                retry: true,
                delay_seconds: self.options.engine.retry_backoff_seconds,
            }
        } else {
            RetryInstruction {
                retry: false,
                delay_seconds: 0,
            }
        }
    }

    /// Mark the run FAILED for a permanent error; returns the plan so
    /// the scheduler can distinguish the transient case.
    pub fn handle_run_failure(&self, run_id: Uuid, err: &Error) -> RetryInstruction {
        let instruction = self.plan_retry(err);
        if instruction.retry {
            return instruction;
        }

        let summary = err.to_string();
        let result = self.db.transaction(|txn| {
            self.transition_in(txn, run_id, RunStatus::Failed)?;
            txn.update_run(run_id, |r| r.error_summary = summary.clone())?;
            Ok(())
        });
        if let Err(mark_err) = result {
            tracing::warn!(%run_id, error = %mark_err, "failed to mark run FAILED");
        }
        instruction
    }

    // ── Cancellation ─────────────────────────────────────────────────

    /// Cancel a run: set the cooperative flag, transition CANCELED,
    /// revoke any external task, cancel non-terminal children, and
    /// notify the parent so its failure policy runs.
    pub fn cancel_run(&self, run_id: Uuid, reason: Option<&str>) -> Result<AgentRun> {
        let reason_owned = reason.map(str::to_owned);
        self.db.transaction(|txn| {
            let run = txn
                .tables()
                .run(run_id)
                .cloned()
                .ok_or_else(|| Error::not_found("run", run_id))?;
            let task_id = run.locked_task_id.clone();

            txn.update_run(run_id, |r| {
                r.cancel_requested = true;
                r.locked_task_id = None;
            })?;
            let cancelled = self.transition_in(txn, run_id, RunStatus::Canceled)?;
            if let Some(ref reason) = reason_owned {
                txn.update_run(run_id, |r| r.error_summary = reason.clone())?;
            }
            self.append_event_in(
                txn,
                run_id,
                AppendEvent::new(
                    RUN_CANCELLED_EVENT,
                    json!({"reason": reason_owned.clone().unwrap_or_default()}),
                )
                .correlation(run.correlation_id),
            )?;

            if let Some(task_id) = task_id {
                let scheduler = self.scheduler.clone();
                txn.on_commit(move || scheduler.revoke(&task_id));
            }

            // Cascade: cancel non-terminal children without notifying
            // this (already terminal) run.
            let child_ids: Vec<Uuid> = txn
                .tables()
                .non_terminal_children(run_id)
                .iter()
                .map(|r| r.id)
                .collect();
            for child_id in child_ids {
                self.cancel_subrun_in(txn, child_id, reason_owned.as_deref(), false)?;
            }

            if run.parent_run_id.is_some() {
                self.notify_parent_child_cancelled_in(txn, run_id, reason_owned.as_deref())?;
            }

            Ok(cancelled)
        })
    }

    // ── Pause / resume / retry ───────────────────────────────────────

    pub fn pause_run(&self, run_id: Uuid) -> Result<AgentRun> {
        self.transition_run(run_id, RunStatus::Paused)
    }

    pub fn resume_run(&self, run_id: Uuid) -> Result<AgentRun> {
        self.transition_run(run_id, RunStatus::Running)
    }

    /// Re-enqueue a tick for a run stuck after transient failures.
    /// Terminal runs are absorbing and cannot be retried.
    pub fn retry_run(&self, run_id: Uuid) -> Result<()> {
        let status = self
            .db
            .read(|t| t.run(run_id).map(|r| r.status))
            .ok_or_else(|| Error::not_found("run", run_id))?;
        if status.is_terminal() {
            return Err(Error::Validation(format!(
                "run is terminal ({status}) and cannot be retried"
            )));
        }
        self.scheduler.enqueue(run_id, None);
        Ok(())
    }

    // ── Periodic sweep ───────────────────────────────────────────────

    /// Resume waiting parents whose children all finished, and reclaim
    /// expired leases, scheduling a tick for every touched run.
    pub fn reconcile_waiting_parents_and_leases(&self) -> ReconcileStats {
        let mut stats = ReconcileStats::default();

        let waiting: Vec<Uuid> = self.db.read(|t| {
            t.runs_in_status(RunStatus::WaitingForSubrun)
                .iter()
                .filter(|r| t.non_terminal_children(r.id).is_empty())
                .map(|r| r.id)
                .collect()
        });
        for parent_id in waiting {
            let resumed = self.db.transaction(|txn| {
                // Re-check under the transaction; a child may have been
                // spawned since the read.
                if !txn.tables().non_terminal_children(parent_id).is_empty() {
                    return Ok(false);
                }
                self.transition_in(txn, parent_id, RunStatus::Running)?;
                Ok(true)
            });
            match resumed {
                Ok(true) => {
                    self.scheduler.enqueue(parent_id, None);
                    stats.resumed_waiting_parents += 1;
                }
                Ok(false) => {}
                Err(err) => {
                    tracing::debug!(%parent_id, error = %err, "skipping waiting parent");
                }
            }
        }

        let now = Utc::now();
        let stale: Vec<Uuid> = self.db.read(|t| {
            t.leased_runs()
                .iter()
                .filter(|r| self.lock_expired(r, now))
                .map(|r| r.id)
                .collect()
        });
        for run_id in stale {
            let cleared = self.db.transaction(|txn| {
                let run = txn
                    .tables()
                    .run(run_id)
                    .cloned()
                    .ok_or_else(|| Error::not_found("run", run_id))?;
                if !self.lock_expired(&run, Utc::now()) {
                    return Ok(false);
                }
                txn.update_run(run_id, |r| {
                    r.locked_by = None;
                    r.locked_at = None;
                    r.lock_expires_at = None;
                })?;
                Ok(true)
            });
            if matches!(cleared, Ok(true)) {
                self.scheduler.enqueue(run_id, None);
                stats.stale_leases_reclaimed += 1;
            }
        }

        if stats != ReconcileStats::default() {
            tracing::info!(
                resumed = stats.resumed_waiting_parents,
                reclaimed = stats.stale_leases_reclaimed,
                "recovery sweep"
            );
        }
        stats
    }
}
