//! The run state machine: legal edges, transition bookkeeping, and the
//! `state_changed` journal record.

use serde_json::json;
use uuid::Uuid;

use am_domain::run::{AgentRun, RunStatus};
use am_domain::{Error, Result};
use am_storage::Txn;

use crate::core::Engine;
use crate::journal::AppendEvent;

pub const STATE_CHANGED_EVENT: &str = "state_changed";

/// Legal targets per source status. Terminal statuses have no edges.
fn legal_targets(status: RunStatus) -> &'static [RunStatus] {
    use RunStatus::*;
    match status {
        Pending => &[Running, Canceled, Failed, WaitingForSubrun],
        Running => &[
            Completed,
            Failed,
            Canceled,
            WaitingForApproval,
            WaitingForTool,
            WaitingForSubrun,
            WaitingForUser,
            Paused,
        ],
        Paused => &[Running, Failed, Canceled],
        WaitingForApproval | WaitingForTool | WaitingForSubrun | WaitingForUser => {
            &[Running, Failed, Canceled]
        }
        Completed | Failed | Canceled => &[],
    }
}

impl Engine {
    /// Transition a run inside the caller's transaction.
    ///
    /// No-op when the status is unchanged; illegal edges yield a
    /// structured error and are never auto-corrected. Entering RUNNING
    /// stamps `started_at` on first entry; entering a terminal status
    /// stamps `ended_at` and releases the run's concurrency slots.
    pub fn transition_in(
        &self,
        txn: &mut Txn,
        run_id: Uuid,
        new_status: RunStatus,
    ) -> Result<AgentRun> {
        let run = txn
            .tables()
            .run(run_id)
            .cloned()
            .ok_or_else(|| Error::not_found("run", run_id))?;
        let current = run.status;
        if current == new_status {
            return Ok(run);
        }
        if !legal_targets(current).contains(&new_status) {
            return Err(Error::IllegalTransition {
                from: current.to_string(),
                to: new_status.to_string(),
            });
        }

        let now = chrono::Utc::now();
        let updated = txn.update_run(run_id, |r| {
            r.status = new_status;
            if new_status == RunStatus::Running && r.started_at.is_none() {
                r.started_at = Some(now);
            }
            if new_status.is_terminal() {
                r.ended_at = Some(now);
            }
        })?;

        self.append_event_in(
            txn,
            run_id,
            AppendEvent::new(
                STATE_CHANGED_EVENT,
                json!({"from": current, "to": new_status}),
            )
            .correlation(run.correlation_id),
        )?;

        if new_status.is_terminal() {
            self.quota.release_run_slots(
                &run.workspace_id.to_string(),
                &run_id.to_string(),
                run.is_parent(),
            );
            tracing::info!(%run_id, from = %current, to = %new_status, "run reached terminal status");
        }

        Ok(updated)
    }

    /// Transition a run in its own transaction.
    pub fn transition_run(&self, run_id: Uuid, new_status: RunStatus) -> Result<AgentRun> {
        self.db
            .transaction(|txn| self.transition_in(txn, run_id, new_status))
    }
}
