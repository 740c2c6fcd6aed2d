//! The tool-call approval flow: requesting approval gates the run on
//! WAITING_FOR_APPROVAL; an operator approval releases it.

use serde_json::json;
use uuid::Uuid;

use am_domain::push::{approvals_group, make_approvals_push};
use am_domain::run::{RunStatus, StepKind};
use am_domain::tool::{ToolCall, ToolCallStatus};
use am_domain::{Error, Result};

use crate::core::Engine;
use crate::journal::AppendEvent;

pub const TOOL_CALL_REQUESTED_EVENT: &str = "tool_call_requested";
pub const TOOL_CALL_APPROVED_EVENT: &str = "tool_call_approved";

impl Engine {
    /// Record a tool-call request on a run.
    ///
    /// Appends the TOOL_CALL step and creates the call in PENDING when
    /// approval is required (gating the run on WAITING_FOR_APPROVAL and
    /// pushing to the approvals stream on commit) or APPROVED otherwise.
    pub fn request_tool_call_approval(
        &self,
        run_id: Uuid,
        tool_name: &str,
        args: serde_json::Value,
        requires_approval: bool,
    ) -> Result<ToolCall> {
        let tool_name = tool_name.to_owned();
        self.db.transaction(|txn| {
            let run = txn
                .tables()
                .run(run_id)
                .cloned()
                .ok_or_else(|| Error::not_found("run", run_id))?;

            if !matches!(
                run.status,
                RunStatus::Pending | RunStatus::Running | RunStatus::WaitingForApproval
            ) {
                return Err(Error::Validation(format!(
                    "cannot request tool call from run {}",
                    run.status
                )));
            }

            let step = self.append_step_in(
                txn,
                run_id,
                StepKind::ToolCall,
                json!({"tool_name": tool_name, "args": args.clone()}),
                None,
            )?;

            let call = ToolCall::new(run_id, step.id, &tool_name, args.clone(), requires_approval);
            txn.insert_tool_call(call.clone());

            self.append_event_in(
                txn,
                run_id,
                AppendEvent::new(
                    TOOL_CALL_REQUESTED_EVENT,
                    json!({
                        "tool_call_id": call.id.to_string(),
                        "tool_name": call.tool_name.clone(),
                        "args": call.args.clone(),
                        "step_index": step.step_index,
                    }),
                )
                .correlation(call.correlation_id),
            )?;

            if requires_approval {
                self.transition_in(txn, run_id, RunStatus::WaitingForApproval)?;

                let bus = self.bus.clone();
                let push = make_approvals_push(
                    run.workspace_id,
                    TOOL_CALL_REQUESTED_EVENT,
                    json!({
                        "run_id": run_id.to_string(),
                        "tool_call_id": call.id.to_string(),
                        "tool_name": call.tool_name.clone(),
                        "status": ToolCallStatus::Pending,
                    }),
                );
                let group = approvals_group(run.workspace_id);
                txn.on_commit(move || bus.send(&group, &push));
            }

            tracing::info!(
                %run_id,
                tool_call_id = %call.id,
                tool_name = %call.tool_name,
                requires_approval,
                "tool call requested"
            );
            Ok(call)
        })
    }

    /// Approve a pending tool call as `user_id`.
    ///
    /// The approver must hold an operating role in the run's workspace.
    /// The run transitions back to RUNNING and a tick is scheduled on
    /// commit.
    pub fn approve_tool_call(&self, tool_call_id: Uuid, user_id: Uuid) -> Result<ToolCall> {
        self.db.transaction(|txn| {
            let call = txn
                .tables()
                .tool_call(tool_call_id)
                .cloned()
                .ok_or_else(|| Error::not_found("tool call", tool_call_id))?;
            let run = txn
                .tables()
                .run(call.run_id)
                .cloned()
                .ok_or_else(|| Error::not_found("run", call.run_id))?;

            let membership = txn
                .tables()
                .membership(run.workspace_id, user_id)
                .ok_or_else(|| Error::Permission("workspace membership required".into()))?;
            if !membership.role.can_operate() {
                return Err(Error::Permission(
                    "insufficient role for this operation".into(),
                ));
            }

            if !call.requires_approval {
                return Err(Error::Validation("tool call does not require approval".into()));
            }
            if call.status != ToolCallStatus::Pending {
                return Err(Error::Validation("tool call already acted on".into()));
            }

            let approved = txn.update_tool_call(tool_call_id, |c| c.mark_approved(user_id))?;

            self.append_event_in(
                txn,
                call.run_id,
                AppendEvent::new(
                    TOOL_CALL_APPROVED_EVENT,
                    json!({
                        "tool_call_id": tool_call_id.to_string(),
                        "approved_by": user_id.to_string(),
                    }),
                )
                .correlation(call.correlation_id),
            )?;

            self.transition_in(txn, call.run_id, RunStatus::Running)?;

            let bus = self.bus.clone();
            let push = make_approvals_push(
                run.workspace_id,
                TOOL_CALL_APPROVED_EVENT,
                json!({
                    "run_id": call.run_id.to_string(),
                    "tool_call_id": tool_call_id.to_string(),
                    "approved_by": user_id.to_string(),
                    "status": ToolCallStatus::Approved,
                }),
            );
            let group = approvals_group(run.workspace_id);
            txn.on_commit(move || bus.send(&group, &push));

            let scheduler = self.scheduler.clone();
            let run_id = call.run_id;
            txn.on_commit(move || scheduler.enqueue(run_id, None));

            tracing::info!(%tool_call_id, run_id = %call.run_id, approved_by = %user_id, "tool call approved");
            Ok(approved)
        })
    }
}
