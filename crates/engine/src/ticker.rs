//! The leased tick executor: one deterministic advance of one run.
//!
//! A tick claims the worker lease, consumes the RUN_TICK quota, then
//! dispatches on status with cursor guards so duplicate ticks are
//! idempotent. The lease is released on every successful exit path; a
//! failed tick rolls back the whole transaction, lease claim included.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use am_domain::run::{AgentRun, RunStatus, StepKind};
use am_domain::{Error, Result};
use am_quota::LimitKey;
use am_storage::Txn;

use crate::core::Engine;
use crate::journal::{AppendEvent, STEP_CREATED_EVENT};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TickAction {
    StartedRun,
    CompletedRun,
    Noop,
    Cancelled,
    Paused,
    Finalized,
    WaitingForApproval,
    WaitingForSubrun,
}

#[derive(Debug, Clone, Serialize)]
pub struct TickOutcome {
    pub run_id: Uuid,
    pub action: TickAction,
    pub status: RunStatus,
    pub step_index: u32,
}

fn outcome(run_id: Uuid, action: TickAction, status: RunStatus, step_index: u32) -> TickOutcome {
    TickOutcome {
        run_id,
        action,
        status,
        step_index,
    }
}

/// Expected cursor position per advanceable status. A mismatch means the
/// tick is a duplicate and must no-op.
fn expected_step_index(status: RunStatus) -> Option<u32> {
    match status {
        RunStatus::Pending => Some(0),
        RunStatus::Running => Some(1),
        _ => None,
    }
}

fn cursor_at_expected(run: &AgentRun) -> bool {
    expected_step_index(run.status) == Some(run.current_step_index)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tick
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const MODEL_CALL_PAYLOAD: &str = "Model call placeholder";
const OBSERVATION_PAYLOAD: &str = "Observation placeholder";

impl Engine {
    /// Advance a run by one deterministic step.
    ///
    /// - PENDING -> RUNNING, appending a MODEL_CALL step
    /// - RUNNING -> COMPLETED, appending an OBSERVATION step and driving
    ///   the parent's join policy on commit
    /// - waiting/paused/terminal states release the lease and no-op
    pub fn run_tick(self: &Arc<Self>, run_id: Uuid) -> Result<TickOutcome> {
        let engine = self.clone();
        let result = self.db.transaction(|txn| {
            let run = self.claim_in(txn, run_id)?;

            self.quota
                .record_request(&run.workspace_id.to_string(), LimitKey::RunTick)
                .map_err(|err| Error::Locked(format!("tick denied: {err}")))?;

            let out = match run.status {
                RunStatus::Canceled => {
                    outcome(run_id, TickAction::Cancelled, run.status, run.current_step_index)
                }
                RunStatus::Paused => {
                    outcome(run_id, TickAction::Paused, run.status, run.current_step_index)
                }
                RunStatus::Completed | RunStatus::Failed => {
                    outcome(run_id, TickAction::Finalized, run.status, run.current_step_index)
                }
                RunStatus::Pending => {
                    if !cursor_at_expected(&run) {
                        outcome(run_id, TickAction::Noop, run.status, run.current_step_index)
                    } else {
                        self.start_run_in(txn, run_id)?
                    }
                }
                RunStatus::Running => {
                    if !cursor_at_expected(&run) {
                        outcome(run_id, TickAction::Noop, run.status, run.current_step_index)
                    } else {
                        self.complete_run_in(txn, &engine, &run)?
                    }
                }
                RunStatus::WaitingForApproval => outcome(
                    run_id,
                    TickAction::WaitingForApproval,
                    run.status,
                    run.current_step_index,
                ),
                RunStatus::WaitingForSubrun => outcome(
                    run_id,
                    TickAction::WaitingForSubrun,
                    run.status,
                    run.current_step_index,
                ),
                RunStatus::WaitingForTool | RunStatus::WaitingForUser => {
                    outcome(run_id, TickAction::Noop, run.status, run.current_step_index)
                }
            };

            self.release_lock_in(txn, run_id)?;
            Ok(out)
        });

        match &result {
            Ok(out) => {
                tracing::debug!(%run_id, action = ?out.action, status = %out.status, "tick");
            }
            Err(err) if err.is_transient() => {
                tracing::debug!(%run_id, error = %err, "tick contended");
            }
            Err(err) => {
                tracing::warn!(%run_id, error = %err, "tick failed");
            }
        }
        result
    }

    fn start_run_in(&self, txn: &mut Txn, run_id: Uuid) -> Result<TickOutcome> {
        self.transition_in(txn, run_id, RunStatus::Running)?;
        let step = self.append_step_in(
            txn,
            run_id,
            StepKind::ModelCall,
            json!({"description": MODEL_CALL_PAYLOAD}),
            None,
        )?;
        self.append_event_in(
            txn,
            run_id,
            AppendEvent::new(STEP_CREATED_EVENT, Self::step_event_payload(&step))
                .correlation(step.correlation_id),
        )?;
        Ok(outcome(
            run_id,
            TickAction::StartedRun,
            RunStatus::Running,
            step.step_index,
        ))
    }

    fn complete_run_in(
        &self,
        txn: &mut Txn,
        engine: &Arc<Engine>,
        run: &AgentRun,
    ) -> Result<TickOutcome> {
        let run_id = run.id;
        let step = self.append_step_in(
            txn,
            run_id,
            StepKind::Observation,
            json!({"description": OBSERVATION_PAYLOAD}),
            None,
        )?;
        self.append_event_in(
            txn,
            run_id,
            AppendEvent::new(STEP_CREATED_EVENT, Self::step_event_payload(&step))
                .correlation(step.correlation_id),
        )?;
        self.transition_in(txn, run_id, RunStatus::Completed)?;

        if run.parent_run_id.is_some() {
            let engine = engine.clone();
            txn.on_commit(move || {
                if let Err(err) = engine.complete_subrun(run_id) {
                    tracing::warn!(child_run_id = %run_id, error = %err, "subrun completion failed");
                }
            });
        }

        Ok(outcome(
            run_id,
            TickAction::CompletedRun,
            RunStatus::Completed,
            step.step_index,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_expectations() {
        assert_eq!(expected_step_index(RunStatus::Pending), Some(0));
        assert_eq!(expected_step_index(RunStatus::Running), Some(1));
        assert_eq!(expected_step_index(RunStatus::Completed), None);
        assert_eq!(expected_step_index(RunStatus::WaitingForSubrun), None);
    }

    #[test]
    fn tick_action_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&TickAction::StartedRun).unwrap(), "\"started_run\"");
        assert_eq!(serde_json::to_string(&TickAction::CompletedRun).unwrap(), "\"completed_run\"");
        assert_eq!(
            serde_json::to_string(&TickAction::WaitingForApproval).unwrap(),
            "\"waiting_for_approval\""
        );
    }
}
