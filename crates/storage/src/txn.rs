//! The transaction scope: undo-logged mutations + post-commit hooks.
//!
//! Every mutation records the inverse operation. When the transaction
//! body fails, the undo log is replayed in reverse and the hook list is
//! dropped, so a rolled-back write can never reach a subscriber.

use uuid::Uuid;

use am_domain::archive::RunArchive;
use am_domain::run::{AgentRun, AgentStep, RunEvent};
use am_domain::subrun::SubrunLink;
use am_domain::tenancy::{Agent, Membership, UserActionLog, Workspace};
use am_domain::tool::{ToolCall, ToolDefinition};
use am_domain::{Error, Result};

use crate::tables::Tables;

pub(crate) enum UndoOp {
    RemoveWorkspace(Uuid),
    RemoveMembership(Uuid),
    RemoveAgent(Uuid),
    RemoveRun(Uuid),
    RestoreRun(Box<AgentRun>),
    RemoveStep(Uuid),
    RemoveEvent(Uuid),
    RestoreEvents(Vec<RunEvent>),
    RemoveLink(Uuid),
    RemoveToolDefinition(Uuid),
    RemoveToolCall(Uuid),
    RestoreToolCall(Box<ToolCall>),
    RemoveArchive(Uuid),
    RestoreArchive(Box<RunArchive>),
    RemoveActionLog(Uuid),
}

/// A mutable view over [`Tables`] scoped to one transaction.
pub struct Txn<'a> {
    tables: &'a mut Tables,
    pub(crate) undo: Vec<UndoOp>,
    pub(crate) hooks: Vec<Box<dyn FnOnce() + Send>>,
}

impl<'a> Txn<'a> {
    pub(crate) fn new(tables: &'a mut Tables) -> Self {
        Self {
            tables,
            undo: Vec::new(),
            hooks: Vec::new(),
        }
    }

    /// Read access to the tables, including writes made earlier in this
    /// transaction.
    pub fn tables(&self) -> &Tables {
        self.tables
    }

    /// Register a hook to run after this transaction commits. Hooks are
    /// dropped on rollback and run in registration order on commit.
    pub fn on_commit(&mut self, hook: impl FnOnce() + Send + 'static) {
        self.hooks.push(Box::new(hook));
    }

    // ── Tenancy ──────────────────────────────────────────────────────

    pub fn insert_workspace(&mut self, workspace: Workspace) {
        self.undo.push(UndoOp::RemoveWorkspace(workspace.id));
        self.tables.workspaces.insert(workspace.id, workspace);
    }

    pub fn insert_membership(&mut self, membership: Membership) {
        self.undo.push(UndoOp::RemoveMembership(membership.id));
        self.tables.memberships.insert(membership.id, membership);
    }

    pub fn insert_agent(&mut self, agent: Agent) -> Result<()> {
        if self
            .tables
            .agents
            .values()
            .any(|a| a.workspace_id == agent.workspace_id && a.name == agent.name)
        {
            return Err(Error::Validation(format!(
                "agent {} already exists in workspace",
                agent.name
            )));
        }
        self.undo.push(UndoOp::RemoveAgent(agent.id));
        self.tables.agents.insert(agent.id, agent);
        Ok(())
    }

    pub fn insert_action_log(&mut self, log: UserActionLog) {
        self.undo.push(UndoOp::RemoveActionLog(log.id));
        self.tables.action_logs.insert(log.id, log);
    }

    // ── Runs ─────────────────────────────────────────────────────────

    pub fn insert_run(&mut self, run: AgentRun) {
        self.undo.push(UndoOp::RemoveRun(run.id));
        self.tables.runs.insert(run.id, run);
    }

    /// Mutate a run row in place. The prior row is kept for rollback and
    /// `updated_at` is stamped. Returns the updated row.
    pub fn update_run(
        &mut self,
        run_id: Uuid,
        f: impl FnOnce(&mut AgentRun),
    ) -> Result<AgentRun> {
        let run = self
            .tables
            .runs
            .get_mut(&run_id)
            .ok_or_else(|| Error::not_found("run", run_id))?;
        self.undo.push(UndoOp::RestoreRun(Box::new(run.clone())));
        f(run);
        run.updated_at = chrono::Utc::now();
        Ok(run.clone())
    }

    // ── Steps + events ───────────────────────────────────────────────

    /// Insert a step, enforcing `(run, step_index)` uniqueness.
    pub fn insert_step(&mut self, step: AgentStep) -> Result<()> {
        if self
            .tables
            .steps
            .values()
            .any(|s| s.run_id == step.run_id && s.step_index == step.step_index)
        {
            return Err(Error::Validation(format!(
                "duplicate step_index {} for run {}",
                step.step_index, step.run_id
            )));
        }
        self.undo.push(UndoOp::RemoveStep(step.id));
        self.tables.steps.insert(step.id, step);
        Ok(())
    }

    /// Insert an event, enforcing `(run, seq)` uniqueness.
    pub fn insert_event(&mut self, event: RunEvent) -> Result<()> {
        if self
            .tables
            .events
            .values()
            .any(|e| e.run_id == event.run_id && e.seq == event.seq)
        {
            return Err(Error::Validation(format!(
                "duplicate seq {} for run {}",
                event.seq, event.run_id
            )));
        }
        self.undo.push(UndoOp::RemoveEvent(event.id));
        self.tables.events.insert(event.id, event);
        Ok(())
    }

    /// Delete events of a run matching `predicate`. Returns the count.
    pub fn delete_events(
        &mut self,
        run_id: Uuid,
        predicate: impl Fn(&RunEvent) -> bool,
    ) -> usize {
        let doomed: Vec<Uuid> = self
            .tables
            .events
            .values()
            .filter(|e| e.run_id == run_id && predicate(e))
            .map(|e| e.id)
            .collect();
        let mut removed = Vec::with_capacity(doomed.len());
        for id in doomed {
            if let Some(event) = self.tables.events.remove(&id) {
                removed.push(event);
            }
        }
        let count = removed.len();
        if count > 0 {
            self.undo.push(UndoOp::RestoreEvents(removed));
        }
        count
    }

    // ── Subruns ──────────────────────────────────────────────────────

    pub fn insert_subrun_link(&mut self, link: SubrunLink) {
        self.undo.push(UndoOp::RemoveLink(link.id));
        self.tables.subrun_links.insert(link.id, link);
    }

    // ── Tools ────────────────────────────────────────────────────────

    pub fn insert_tool_definition(&mut self, def: ToolDefinition) -> Result<()> {
        if self
            .tables
            .tool_definitions
            .values()
            .any(|d| d.workspace_id == def.workspace_id && d.name == def.name)
        {
            return Err(Error::Validation(format!(
                "tool {} already defined in workspace",
                def.name
            )));
        }
        self.undo.push(UndoOp::RemoveToolDefinition(def.id));
        self.tables.tool_definitions.insert(def.id, def);
        Ok(())
    }

    pub fn insert_tool_call(&mut self, call: ToolCall) {
        self.undo.push(UndoOp::RemoveToolCall(call.id));
        self.tables.tool_calls.insert(call.id, call);
    }

    pub fn update_tool_call(
        &mut self,
        call_id: Uuid,
        f: impl FnOnce(&mut ToolCall),
    ) -> Result<ToolCall> {
        let call = self
            .tables
            .tool_calls
            .get_mut(&call_id)
            .ok_or_else(|| Error::not_found("tool call", call_id))?;
        self.undo.push(UndoOp::RestoreToolCall(Box::new(call.clone())));
        f(call);
        Ok(call.clone())
    }

    // ── Archives ─────────────────────────────────────────────────────

    pub fn insert_archive(&mut self, archive: RunArchive) {
        self.undo.push(UndoOp::RemoveArchive(archive.id));
        self.tables.archives.insert(archive.id, archive);
    }

    pub fn delete_archive(&mut self, archive_id: Uuid) {
        if let Some(archive) = self.tables.archives.remove(&archive_id) {
            self.undo.push(UndoOp::RestoreArchive(Box::new(archive)));
        }
    }

    // ── Rollback ─────────────────────────────────────────────────────

    pub(crate) fn rollback(tables: &mut Tables, undo: Vec<UndoOp>) {
        for op in undo.into_iter().rev() {
            match op {
                UndoOp::RemoveWorkspace(id) => {
                    tables.workspaces.remove(&id);
                }
                UndoOp::RemoveMembership(id) => {
                    tables.memberships.remove(&id);
                }
                UndoOp::RemoveAgent(id) => {
                    tables.agents.remove(&id);
                }
                UndoOp::RemoveRun(id) => {
                    tables.runs.remove(&id);
                }
                UndoOp::RestoreRun(run) => {
                    tables.runs.insert(run.id, *run);
                }
                UndoOp::RemoveStep(id) => {
                    tables.steps.remove(&id);
                }
                UndoOp::RemoveEvent(id) => {
                    tables.events.remove(&id);
                }
                UndoOp::RestoreEvents(events) => {
                    for event in events {
                        tables.events.insert(event.id, event);
                    }
                }
                UndoOp::RemoveLink(id) => {
                    tables.subrun_links.remove(&id);
                }
                UndoOp::RemoveToolDefinition(id) => {
                    tables.tool_definitions.remove(&id);
                }
                UndoOp::RemoveToolCall(id) => {
                    tables.tool_calls.remove(&id);
                }
                UndoOp::RestoreToolCall(call) => {
                    tables.tool_calls.insert(call.id, *call);
                }
                UndoOp::RemoveArchive(id) => {
                    tables.archives.remove(&id);
                }
                UndoOp::RestoreArchive(archive) => {
                    tables.archives.insert(archive.id, *archive);
                }
                UndoOp::RemoveActionLog(id) => {
                    tables.action_logs.remove(&id);
                }
            }
        }
    }
}
