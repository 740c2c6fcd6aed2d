//! Table set plus read-side query helpers.
//!
//! All collections are keyed by primary id; orderings the engine relies
//! on (steps by `step_index`, events by `seq`, children by `created_at`)
//! are produced at query time.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use am_domain::archive::RunArchive;
use am_domain::run::{AgentRun, AgentStep, RunEvent};
use am_domain::subrun::SubrunLink;
use am_domain::tenancy::{Agent, Membership, UserActionLog, Workspace};
use am_domain::tool::{ToolCall, ToolDefinition};

#[derive(Default)]
pub struct Tables {
    pub(crate) workspaces: HashMap<Uuid, Workspace>,
    pub(crate) memberships: HashMap<Uuid, Membership>,
    pub(crate) agents: HashMap<Uuid, Agent>,
    pub(crate) runs: HashMap<Uuid, AgentRun>,
    pub(crate) steps: HashMap<Uuid, AgentStep>,
    pub(crate) events: HashMap<Uuid, RunEvent>,
    pub(crate) subrun_links: HashMap<Uuid, SubrunLink>,
    pub(crate) tool_definitions: HashMap<Uuid, ToolDefinition>,
    pub(crate) tool_calls: HashMap<Uuid, ToolCall>,
    pub(crate) archives: HashMap<Uuid, RunArchive>,
    pub(crate) action_logs: HashMap<Uuid, UserActionLog>,
}

impl Tables {
    // ── Tenancy ──────────────────────────────────────────────────────

    pub fn workspace(&self, id: Uuid) -> Option<&Workspace> {
        self.workspaces.get(&id)
    }

    pub fn agent(&self, id: Uuid) -> Option<&Agent> {
        self.agents.get(&id)
    }

    /// Active membership of `user_id` in `workspace_id`, if any.
    pub fn membership(&self, workspace_id: Uuid, user_id: Uuid) -> Option<&Membership> {
        self.memberships
            .values()
            .find(|m| m.workspace_id == workspace_id && m.user_id == user_id && m.active)
    }

    // ── Runs ─────────────────────────────────────────────────────────

    pub fn run(&self, id: Uuid) -> Option<&AgentRun> {
        self.runs.get(&id)
    }

    /// Children of `parent_id` ordered by creation time.
    pub fn children_of(&self, parent_id: Uuid) -> Vec<&AgentRun> {
        let mut children: Vec<&AgentRun> = self
            .runs
            .values()
            .filter(|r| r.parent_run_id == Some(parent_id))
            .collect();
        children.sort_by_key(|r| r.created_at);
        children
    }

    pub fn non_terminal_children(&self, parent_id: Uuid) -> Vec<&AgentRun> {
        self.children_of(parent_id)
            .into_iter()
            .filter(|r| !r.status.is_terminal())
            .collect()
    }

    /// Runs currently holding a lease (for the recovery sweep).
    pub fn leased_runs(&self) -> Vec<&AgentRun> {
        self.runs.values().filter(|r| r.locked_at.is_some()).collect()
    }

    pub fn runs_in_status(&self, status: am_domain::run::RunStatus) -> Vec<&AgentRun> {
        self.runs.values().filter(|r| r.status == status).collect()
    }

    /// Terminal, not yet archived runs that ended at or before `cutoff`,
    /// oldest first.
    pub fn archivable_runs(&self, cutoff: DateTime<Utc>) -> Vec<&AgentRun> {
        let mut runs: Vec<&AgentRun> = self
            .runs
            .values()
            .filter(|r| {
                r.status.is_terminal()
                    && r.archived_at.is_none()
                    && r.ended_at.map_or(false, |t| t <= cutoff)
            })
            .collect();
        runs.sort_by_key(|r| r.ended_at);
        runs
    }

    // ── Steps + events ───────────────────────────────────────────────

    /// Steps of a run ordered by `step_index`.
    pub fn steps_for_run(&self, run_id: Uuid) -> Vec<&AgentStep> {
        let mut steps: Vec<&AgentStep> =
            self.steps.values().filter(|s| s.run_id == run_id).collect();
        steps.sort_by_key(|s| s.step_index);
        steps
    }

    /// Events of a run ordered by `seq`, optionally only `seq > since`.
    pub fn events_for_run(&self, run_id: Uuid, since_seq: Option<u64>) -> Vec<&RunEvent> {
        let mut events: Vec<&RunEvent> = self
            .events
            .values()
            .filter(|e| e.run_id == run_id && since_seq.map_or(true, |s| e.seq > s))
            .collect();
        events.sort_by_key(|e| e.seq);
        events
    }

    /// Next journal sequence number for a run: `max(seq) + 1`.
    pub fn next_seq(&self, run_id: Uuid) -> u64 {
        self.events
            .values()
            .filter(|e| e.run_id == run_id)
            .map(|e| e.seq)
            .max()
            .unwrap_or(0)
            + 1
    }

    // ── Subruns ──────────────────────────────────────────────────────

    pub fn link_for_child(&self, child_run_id: Uuid) -> Option<&SubrunLink> {
        self.subrun_links
            .values()
            .find(|l| l.child_run_id == child_run_id)
    }

    /// All links of one join set, ordered by creation time.
    pub fn links_in_group(&self, parent_run_id: Uuid, group_id: Uuid) -> Vec<&SubrunLink> {
        let mut links: Vec<&SubrunLink> = self
            .subrun_links
            .values()
            .filter(|l| l.parent_run_id == parent_run_id && l.group_id == group_id)
            .collect();
        links.sort_by_key(|l| l.created_at);
        links
    }

    // ── Tools ────────────────────────────────────────────────────────

    pub fn tool_call(&self, id: Uuid) -> Option<&ToolCall> {
        self.tool_calls.get(&id)
    }

    /// Enabled tool definition for `(workspace, name)`.
    pub fn enabled_tool(&self, workspace_id: Uuid, name: &str) -> Option<&ToolDefinition> {
        self.tool_definitions
            .values()
            .find(|d| d.workspace_id == workspace_id && d.name == name && d.enabled)
    }

    // ── Archives ─────────────────────────────────────────────────────

    pub fn archive(&self, id: Uuid) -> Option<&RunArchive> {
        self.archives.get(&id)
    }

    pub fn archives_older_than(&self, cutoff: DateTime<Utc>) -> Vec<&RunArchive> {
        self.archives
            .values()
            .filter(|a| a.created_at < cutoff)
            .collect()
    }
}
