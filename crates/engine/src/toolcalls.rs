//! Tool-call execution: the bridge from an approved call to the
//! external tool-runner, with slot accounting and result stamping.
//!
//! The external HTTP call happens between two transactions; no storage
//! lock is ever held across it.

use std::time::Instant;

use serde_json::json;
use uuid::Uuid;

use am_domain::tool::{ToolCall, ToolCallStatus};
use am_domain::{Error, Result};
use am_toolrunner::{ExecuteLimits, ExecutePolicy, ExecuteRequest, RunnerStatus};

use crate::core::Engine;
use crate::journal::AppendEvent;

pub const TOOL_CALL_COMPLETED_EVENT: &str = "tool_call_completed";

impl Engine {
    /// Execute an approved tool call against the tool-runner.
    ///
    /// Calls that never went through the approval gate acquire the
    /// workspace and per-run tool-call slots first. Transport or HTTP
    /// failures mark the call FAILED with the diagnostic in `stderr`;
    /// they do not fail the run.
    pub async fn execute_tool_call(&self, tool_call_id: Uuid) -> Result<ToolCall> {
        // Phase 1: admit, stamp RUNNING, build the request.
        let (request, workspace_id, run_id) = self.db.transaction(|txn| {
            let call = txn
                .tables()
                .tool_call(tool_call_id)
                .cloned()
                .ok_or_else(|| Error::not_found("tool call", tool_call_id))?;
            if !matches!(call.status, ToolCallStatus::Approved | ToolCallStatus::Running) {
                return Err(Error::Validation(format!(
                    "cannot execute tool call in status {:?}",
                    call.status
                )));
            }
            let run = txn
                .tables()
                .run(call.run_id)
                .cloned()
                .ok_or_else(|| Error::not_found("run", call.run_id))?;
            let definition = txn
                .tables()
                .enabled_tool(run.workspace_id, &call.tool_name)
                .cloned()
                .ok_or_else(|| {
                    Error::Validation(format!(
                        "tool {} not enabled for workspace",
                        call.tool_name
                    ))
                })?;

            if !call.requires_approval {
                self.quota.acquire_tool_call_slots(
                    &run.workspace_id.to_string(),
                    &call.run_id.to_string(),
                    &call.id.to_string(),
                )?;
            }

            let updated = txn.update_tool_call(tool_call_id, |c| {
                c.status = ToolCallStatus::Running;
                c.started_at = Some(chrono::Utc::now());
            })?;

            let cfg = &self.options.toolrunner;
            let limits = call
                .args
                .get("limits")
                .and_then(|v| v.as_object())
                .cloned()
                .unwrap_or_default();
            let request = ExecuteRequest {
                request_id: updated.id,
                workspace_id: run.workspace_id,
                run_id: call.run_id,
                tool_name: updated.tool_name.clone(),
                args: updated.args.clone(),
                policy: ExecutePolicy {
                    risk_level: updated.risk_level,
                    tool_definition_id: definition.id,
                    requires_approval: updated.requires_approval,
                },
                limits: ExecuteLimits {
                    timeout_s: limits
                        .get("timeout_s")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(cfg.timeout_s),
                    max_output_bytes: limits
                        .get("max_output_bytes")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(cfg.max_output_bytes),
                },
            };
            Ok((request, run.workspace_id, call.run_id))
        })?;

        // Phase 2: external call, no locks held.
        let start = Instant::now();
        let response = self.tool_runner.execute(&request).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let (succeeded, exit_code, stdout, stderr, result_payload) = match response {
            Ok(resp) => (
                resp.status == RunnerStatus::Completed,
                resp.exit_code,
                resp.stdout,
                resp.stderr,
                resp.result.unwrap_or_else(|| json!({})),
            ),
            Err(err) => {
                tracing::warn!(%tool_call_id, error = %err, "toolrunner call failed");
                (false, None, String::new(), err.to_string(), json!({}))
            }
        };

        // Phase 3: stamp the result, release slots, journal completion.
        self.db.transaction(|txn| {
            let now = chrono::Utc::now();
            let stamped = txn.update_tool_call(tool_call_id, |c| {
                c.status = if succeeded {
                    ToolCallStatus::Succeeded
                } else {
                    ToolCallStatus::Failed
                };
                c.exit_code = exit_code;
                c.stdout = stdout.clone();
                c.stderr = stderr.clone();
                c.result = result_payload.clone();
                c.ended_at = Some(now);
                c.observed_at = Some(now);
            })?;

            // Releases are idempotent, so this is safe for both the
            // pre-approved and the slot-acquired path.
            self.quota.release_tool_call_slots(
                &workspace_id.to_string(),
                &run_id.to_string(),
                &tool_call_id.to_string(),
            );

            self.append_event_in(
                txn,
                run_id,
                AppendEvent::new(
                    TOOL_CALL_COMPLETED_EVENT,
                    json!({
                        "tool_call_id": tool_call_id.to_string(),
                        "status": stamped.status,
                        "exit_code": stamped.exit_code,
                        "stdout": stamped.stdout,
                        "stderr": stamped.stderr,
                        "result": stamped.result,
                        "duration_ms": duration_ms,
                    }),
                )
                .correlation(stamped.correlation_id),
            )?;

            tracing::info!(
                %tool_call_id,
                %run_id,
                status = ?stamped.status,
                exit_code = ?stamped.exit_code,
                duration_ms,
                "tool call completed"
            );
            Ok(stamped)
        })
    }
}
