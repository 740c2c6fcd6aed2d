//! The append-only journal: steps with a per-run cursor and events with
//! a per-run monotonic `seq`.
//!
//! Both appends happen inside the caller's transaction, which serializes
//! allocation; broadcasts are registered as post-commit hooks so a
//! rollback can never leak a push.

use serde_json::json;
use uuid::Uuid;

use am_domain::push::{make_run_push, make_workspace_push, run_group, workspace_group};
use am_domain::run::{AgentStep, RunEvent, StepKind};
use am_domain::{Error, Result};
use am_storage::Txn;

use crate::core::Engine;

pub const STEP_CREATED_EVENT: &str = "step_created";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Append options
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Options for one event append. Run-stream broadcast defaults to on;
/// the workspace summary stream is opt-in.
pub struct AppendEvent {
    pub event_type: String,
    pub payload: serde_json::Value,
    pub correlation_id: Option<Uuid>,
    pub broadcast_to_run: bool,
    pub broadcast_to_workspace: bool,
    pub workspace_summary_event: String,
}

impl AppendEvent {
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            correlation_id: None,
            broadcast_to_run: true,
            broadcast_to_workspace: false,
            workspace_summary_event: "run_event".into(),
        }
    }

    pub fn correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn no_run_broadcast(mut self) -> Self {
        self.broadcast_to_run = false;
        self
    }

    pub fn workspace_summary(mut self, event: impl Into<String>) -> Self {
        self.broadcast_to_workspace = true;
        self.workspace_summary_event = event.into();
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Journal operations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Engine {
    /// Append a step to a run, bumping the progress cursor by one.
    pub fn append_step_in(
        &self,
        txn: &mut Txn,
        run_id: Uuid,
        kind: StepKind,
        payload: serde_json::Value,
        correlation_id: Option<Uuid>,
    ) -> Result<AgentStep> {
        let run = txn
            .tables()
            .run(run_id)
            .ok_or_else(|| Error::not_found("run", run_id))?;
        let next_index = run.current_step_index + 1;

        let step = AgentStep {
            id: Uuid::new_v4(),
            run_id,
            step_index: next_index,
            kind,
            payload,
            correlation_id: correlation_id.unwrap_or_else(Uuid::new_v4),
            created_at: chrono::Utc::now(),
        };
        txn.insert_step(step.clone())?;
        txn.update_run(run_id, |r| r.current_step_index = next_index)?;
        Ok(step)
    }

    /// Append an event with the next per-run `seq` and register its
    /// broadcasts to run on commit. Returns the event and its seq.
    pub fn append_event_in(
        &self,
        txn: &mut Txn,
        run_id: Uuid,
        options: AppendEvent,
    ) -> Result<(RunEvent, u64)> {
        let run = txn
            .tables()
            .run(run_id)
            .ok_or_else(|| Error::not_found("run", run_id))?;
        let workspace_id = run.workspace_id;
        let seq = txn.tables().next_seq(run_id);

        let event = RunEvent {
            id: Uuid::new_v4(),
            run_id,
            seq,
            event_type: options.event_type.clone(),
            payload: options.payload.clone(),
            correlation_id: options.correlation_id,
            created_at: chrono::Utc::now(),
        };
        txn.insert_event(event.clone())?;

        if options.broadcast_to_run {
            let bus = self.bus.clone();
            let push = make_run_push(
                run_id,
                &options.event_type,
                options.payload.clone(),
                Some(seq),
                Some(workspace_id),
            );
            txn.on_commit(move || bus.send(&run_group(run_id), &push));
        }

        if options.broadcast_to_workspace {
            let bus = self.bus.clone();
            let push = make_workspace_push(
                workspace_id,
                &options.workspace_summary_event,
                json!({
                    "run_id": run_id.to_string(),
                    "seq": seq,
                    "event_type": options.event_type,
                    "payload": options.payload,
                }),
                Some(seq),
            );
            txn.on_commit(move || bus.send(&workspace_group(workspace_id), &push));
        }

        Ok((event, seq))
    }

    /// Append an event in its own transaction.
    pub fn append_event(
        &self,
        run_id: Uuid,
        options: AppendEvent,
    ) -> Result<(RunEvent, u64)> {
        self.db
            .transaction(|txn| self.append_event_in(txn, run_id, options))
    }

    /// Standard payload for `step_created` events.
    pub(crate) fn step_event_payload(step: &AgentStep) -> serde_json::Value {
        json!({
            "step_id": step.id.to_string(),
            "step_index": step.step_index,
            "kind": step.kind,
            "payload": step.payload,
            "correlation_id": step.correlation_id.to_string(),
        })
    }
}
