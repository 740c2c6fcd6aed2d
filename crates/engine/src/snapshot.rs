//! Read-side projection of a run: the canonical reconnect primitive.
//!
//! Clients that missed pushes call this with their last received `seq`
//! and receive exactly the events committed since.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use am_domain::run::{AgentRun, AgentStep, RunEvent, RunStatus};
use am_domain::subrun::{FailurePolicy, JoinPolicy};
use am_domain::{Error, Result};

use crate::core::Engine;

/// One child run with its join-link metadata.
#[derive(Debug, Clone, Serialize)]
pub struct ChildRunView {
    pub id: Uuid,
    pub status: RunStatus,
    pub agent_id: Uuid,
    pub agent_name: Option<String>,
    pub current_step_index: u32,
    pub correlation_id: Uuid,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub join_policy: Option<JoinPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quorum: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_policy: Option<FailurePolicy>,
}

/// Snapshot of one run: the row, all steps in order, events since the
/// requested seq, and the children ordered by creation.
#[derive(Debug, Clone, Serialize)]
pub struct RunSnapshot {
    pub run: AgentRun,
    pub steps: Vec<AgentStep>,
    pub events_since_seq: Vec<RunEvent>,
    pub child_runs: Vec<ChildRunView>,
}

impl Engine {
    pub fn snapshot(&self, run_id: Uuid, since_seq: Option<u64>) -> Result<RunSnapshot> {
        self.db.read(|tables| {
            let run = tables
                .run(run_id)
                .cloned()
                .ok_or_else(|| Error::not_found("run", run_id))?;

            let steps = tables
                .steps_for_run(run_id)
                .into_iter()
                .cloned()
                .collect();
            let events_since_seq = tables
                .events_for_run(run_id, since_seq)
                .into_iter()
                .cloned()
                .collect();

            let child_runs = tables
                .children_of(run_id)
                .into_iter()
                .map(|child| {
                    let link = tables.link_for_child(child.id);
                    ChildRunView {
                        id: child.id,
                        status: child.status,
                        agent_id: child.agent_id,
                        agent_name: tables.agent(child.agent_id).map(|a| a.name.clone()),
                        current_step_index: child.current_step_index,
                        correlation_id: child.correlation_id,
                        started_at: child.started_at,
                        ended_at: child.ended_at,
                        created_at: child.created_at,
                        group_id: link.map(|l| l.group_id),
                        join_policy: link.map(|l| l.join_policy),
                        quorum: link.and_then(|l| l.quorum),
                        timeout_seconds: link.and_then(|l| l.timeout_seconds),
                        failure_policy: link.map(|l| l.failure_policy),
                    }
                })
                .collect();

            Ok(RunSnapshot {
                run,
                steps,
                events_since_seq,
                child_runs,
            })
        })
    }
}
