//! The subrun controller: spawning children, evaluating join and
//! failure policies, and resuming waiting parents.

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use am_domain::run::{AgentRun, RunStatus, StepKind};
use am_domain::subrun::{FailurePolicy, JoinPolicy, SubrunLink};
use am_domain::{Error, Result};
use am_quota::LimitKey;
use am_storage::Txn;

use crate::core::Engine;
use crate::journal::{AppendEvent, STEP_CREATED_EVENT};

pub const SUBRUN_SPAWNED_EVENT: &str = "subrun_spawned";
pub const SUBRUN_COMPLETED_EVENT: &str = "subrun_completed";
pub const SUBRUN_CANCELLED_EVENT: &str = "subrun_cancelled";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Spawn options
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct SpawnOptions {
    pub input_text: String,
    pub join_policy: JoinPolicy,
    pub quorum: Option<u32>,
    pub timeout_seconds: Option<u64>,
    pub failure_policy: FailurePolicy,
    /// Join-set identifier; siblings sharing it are evaluated together.
    /// A fresh group is created when absent.
    pub group_id: Option<Uuid>,
    pub metadata: Option<serde_json::Value>,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self {
            input_text: String::new(),
            join_policy: JoinPolicy::WaitAll,
            quorum: None,
            timeout_seconds: None,
            failure_policy: FailurePolicy::FailFast,
            group_id: None,
            metadata: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Controller
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Engine {
    /// Spawn a child run under a join policy. The parent transitions to
    /// WAITING_FOR_SUBRUN and the child's first tick is enqueued on
    /// commit.
    pub fn spawn_subrun(&self, parent_run_id: Uuid, options: SpawnOptions) -> Result<AgentRun> {
        self.db
            .transaction(|txn| self.spawn_subrun_in(txn, parent_run_id, options))
    }

    pub(crate) fn spawn_subrun_in(
        &self,
        txn: &mut Txn,
        parent_run_id: Uuid,
        options: SpawnOptions,
    ) -> Result<AgentRun> {
        let parent = txn
            .tables()
            .run(parent_run_id)
            .cloned()
            .ok_or_else(|| Error::not_found("run", parent_run_id))?;

        let pending = txn.tables().non_terminal_children(parent_run_id).len();
        if pending >= self.options.engine.max_pending_subruns_per_parent {
            return Err(Error::Validation(
                "parent has too many pending subruns in flight".into(),
            ));
        }

        self.quota
            .record_request(&parent.workspace_id.to_string(), LimitKey::SpawnSubrun)?;

        if !matches!(
            parent.status,
            RunStatus::Pending | RunStatus::Running | RunStatus::WaitingForSubrun
        ) {
            return Err(Error::Validation(format!(
                "cannot spawn a subrun from run {}",
                parent.status
            )));
        }

        let correlation_id = Uuid::new_v4();
        let mut child = AgentRun::new(parent.workspace_id, parent.agent_id);
        child.parent_run_id = Some(parent_run_id);
        child.started_by = parent.started_by;
        child.channel = parent.channel;
        child.input_text = options.input_text.clone();
        child.max_steps = parent.max_steps;
        child.max_tool_calls = parent.max_tool_calls;
        child.correlation_id = correlation_id;
        let child_id = child.id;
        txn.insert_run(child.clone());

        self.quota.acquire_run_slots(
            &parent.workspace_id.to_string(),
            &child_id.to_string(),
            false,
        )?;

        let group_id = options.group_id.unwrap_or_else(Uuid::new_v4);
        let link = SubrunLink {
            id: Uuid::new_v4(),
            parent_run_id,
            child_run_id: child_id,
            group_id,
            join_policy: options.join_policy,
            quorum: options.quorum,
            timeout_seconds: options.timeout_seconds,
            failure_policy: options.failure_policy,
            metadata: options.metadata.clone().unwrap_or(serde_json::Value::Null),
            created_at: Utc::now(),
        };
        txn.insert_subrun_link(link);

        let mut step_payload = json!({
            "child_run_id": child_id.to_string(),
            "subrun_group_id": group_id.to_string(),
            "join_policy": options.join_policy,
            "failure_policy": options.failure_policy,
        });
        if let Some(quorum) = options.quorum {
            step_payload["quorum"] = json!(quorum);
        }
        if let Some(timeout) = options.timeout_seconds {
            step_payload["timeout_seconds"] = json!(timeout);
        }
        if let Some(ref metadata) = options.metadata {
            step_payload["metadata"] = metadata.clone();
        }

        let step = self.append_step_in(
            txn,
            parent_run_id,
            StepKind::SubrunSpawn,
            step_payload,
            Some(correlation_id),
        )?;
        self.append_event_in(
            txn,
            parent_run_id,
            AppendEvent::new(STEP_CREATED_EVENT, Self::step_event_payload(&step))
                .correlation(correlation_id),
        )?;
        self.append_event_in(
            txn,
            parent_run_id,
            AppendEvent::new(
                SUBRUN_SPAWNED_EVENT,
                json!({
                    "child_run_id": child_id.to_string(),
                    "input_text": child.input_text,
                    "status": child.status,
                    "group_id": group_id.to_string(),
                    "join_policy": options.join_policy,
                    "quorum": options.quorum,
                    "timeout_seconds": options.timeout_seconds,
                    "failure_policy": options.failure_policy,
                    "correlation_id": correlation_id.to_string(),
                }),
            )
            .correlation(correlation_id),
        )?;

        if parent.status != RunStatus::WaitingForSubrun {
            self.transition_in(txn, parent_run_id, RunStatus::WaitingForSubrun)?;
        }

        let scheduler = self.scheduler.clone();
        txn.on_commit(move || scheduler.enqueue(child_id, None));
        tracing::info!(
            parent_run_id = %parent_run_id,
            child_run_id = %child_id,
            group_id = %group_id,
            join_policy = ?options.join_policy,
            "subrun spawned"
        );
        Ok(child)
    }

    /// Evaluate the join/failure policy after a child reached a terminal
    /// status. Returns the parent id when the parent was resumed.
    pub fn complete_subrun(&self, child_run_id: Uuid) -> Result<Option<Uuid>> {
        self.db
            .transaction(|txn| self.complete_subrun_in(txn, child_run_id))
    }

    pub(crate) fn complete_subrun_in(
        &self,
        txn: &mut Txn,
        child_run_id: Uuid,
    ) -> Result<Option<Uuid>> {
        let child = txn
            .tables()
            .run(child_run_id)
            .cloned()
            .ok_or_else(|| Error::not_found("run", child_run_id))?;
        let Some(parent_id) = child.parent_run_id else {
            return Ok(None);
        };
        let parent = txn
            .tables()
            .run(parent_id)
            .cloned()
            .ok_or_else(|| Error::not_found("run", parent_id))?;
        if parent.status != RunStatus::WaitingForSubrun {
            return Ok(None);
        }
        let Some(link) = txn.tables().link_for_child(child_run_id).cloned() else {
            return Ok(None);
        };

        let group: Vec<(SubrunLink, RunStatus)> = txn
            .tables()
            .links_in_group(parent_id, link.group_id)
            .iter()
            .filter_map(|l| {
                txn.tables()
                    .run(l.child_run_id)
                    .map(|r| ((*l).clone(), r.status))
            })
            .collect();
        if group.is_empty() {
            return Ok(None);
        }

        let active: Vec<Uuid> = group
            .iter()
            .filter(|(_, status)| !status.is_terminal())
            .map(|(l, _)| l.child_run_id)
            .collect();
        let completed_count = group.len() - active.len();

        let timeout_expired = link.timeout_seconds.map_or(false, |timeout| {
            let earliest = group
                .iter()
                .map(|(l, _)| l.created_at)
                .min()
                .unwrap_or(link.created_at);
            (Utc::now() - earliest).num_seconds() >= timeout as i64
        });

        let reason = (!child.error_summary.is_empty()).then(|| child.error_summary.clone());
        let event_type = if child.status == RunStatus::Canceled {
            SUBRUN_CANCELLED_EVENT
        } else {
            SUBRUN_COMPLETED_EVENT
        };
        self.emit_subrun_event_in(txn, &child, event_type, Some(&link), reason.as_deref())?;

        if child.status.is_failure() {
            match link.failure_policy {
                FailurePolicy::FailFast => {
                    self.transition_in(txn, parent_id, RunStatus::Failed)?;
                    return Ok(None);
                }
                FailurePolicy::CancelSiblings => {
                    for sibling_id in active {
                        self.transition_in(txn, sibling_id, RunStatus::Canceled)?;
                    }
                    self.transition_in(txn, parent_id, RunStatus::Failed)?;
                    return Ok(None);
                }
                FailurePolicy::Continue => {}
            }
        }

        let should_resume = match link.join_policy {
            JoinPolicy::WaitAny => child.status.is_terminal(),
            JoinPolicy::WaitAll => active.is_empty(),
            JoinPolicy::Quorum => {
                let required = link.quorum.unwrap_or(group.len() as u32).max(1) as usize;
                completed_count >= required
            }
            JoinPolicy::Timeout => active.is_empty() || timeout_expired,
        };

        if should_resume {
            self.transition_in(txn, parent_id, RunStatus::Running)?;
            let scheduler = self.scheduler.clone();
            txn.on_commit(move || scheduler.enqueue(parent_id, None));
            return Ok(Some(parent_id));
        }
        Ok(None)
    }

    /// Cancel a tracked child run, emit `subrun_cancelled`, and
    /// optionally drive the parent's policy.
    pub fn cancel_subrun(
        &self,
        child_run_id: Uuid,
        reason: Option<&str>,
        notify_parent: bool,
    ) -> Result<()> {
        self.db
            .transaction(|txn| self.cancel_subrun_in(txn, child_run_id, reason, notify_parent))
    }

    pub(crate) fn cancel_subrun_in(
        &self,
        txn: &mut Txn,
        child_run_id: Uuid,
        reason: Option<&str>,
        notify_parent: bool,
    ) -> Result<()> {
        let child = txn
            .tables()
            .run(child_run_id)
            .cloned()
            .ok_or_else(|| Error::not_found("run", child_run_id))?;
        let link = txn.tables().link_for_child(child_run_id).cloned();

        if child.status == RunStatus::Canceled {
            // Already cancelled; at most re-notify the parent.
            if notify_parent && child.parent_run_id.is_some() {
                self.emit_subrun_event_in(
                    txn,
                    &child,
                    SUBRUN_CANCELLED_EVENT,
                    link.as_ref(),
                    reason,
                )?;
                self.complete_subrun_in(txn, child_run_id)?;
            }
            return Ok(());
        }

        txn.update_run(child_run_id, |r| r.cancel_requested = true)?;
        self.transition_in(txn, child_run_id, RunStatus::Canceled)?;
        if let Some(reason) = reason {
            let reason = reason.to_owned();
            txn.update_run(child_run_id, |r| r.error_summary = reason)?;
        }

        let child = txn
            .tables()
            .run(child_run_id)
            .cloned()
            .ok_or_else(|| Error::not_found("run", child_run_id))?;
        self.emit_subrun_event_in(txn, &child, SUBRUN_CANCELLED_EVENT, link.as_ref(), reason)?;

        if notify_parent {
            self.complete_subrun_in(txn, child_run_id)?;
        }
        Ok(())
    }

    /// After a run was cancelled, inform its parent and let the policy
    /// run.
    pub fn notify_parent_child_cancelled(
        &self,
        child_run_id: Uuid,
        reason: Option<&str>,
    ) -> Result<()> {
        self.db
            .transaction(|txn| self.notify_parent_child_cancelled_in(txn, child_run_id, reason))
    }

    pub(crate) fn notify_parent_child_cancelled_in(
        &self,
        txn: &mut Txn,
        child_run_id: Uuid,
        reason: Option<&str>,
    ) -> Result<()> {
        let child = txn
            .tables()
            .run(child_run_id)
            .cloned()
            .ok_or_else(|| Error::not_found("run", child_run_id))?;
        let link = txn.tables().link_for_child(child_run_id).cloned();
        self.emit_subrun_event_in(txn, &child, SUBRUN_CANCELLED_EVENT, link.as_ref(), reason)?;
        self.complete_subrun_in(txn, child_run_id)?;
        Ok(())
    }

    /// Emit a subrun lifecycle event on the parent's stream with the
    /// child's correlation id and the link metadata.
    fn emit_subrun_event_in(
        &self,
        txn: &mut Txn,
        child: &AgentRun,
        event_type: &str,
        link: Option<&SubrunLink>,
        reason: Option<&str>,
    ) -> Result<()> {
        let Some(parent_id) = child.parent_run_id else {
            return Ok(());
        };
        let mut payload = json!({
            "child_run_id": child.id.to_string(),
            "child_status": child.status,
            "ended_at": child.ended_at.map(|t| t.to_rfc3339()),
            "correlation_id": child.correlation_id.to_string(),
        });
        if let Some(link) = link {
            if let (serde_json::Value::Object(target), serde_json::Value::Object(meta)) =
                (&mut payload, link.metadata_payload())
            {
                target.extend(meta);
            }
        }
        if let Some(reason) = reason {
            payload["reason"] = json!(reason);
        }
        self.append_event_in(
            txn,
            parent_id,
            AppendEvent::new(event_type, payload).correlation(child.correlation_id),
        )?;
        Ok(())
    }
}
