//! The engine aggregate: dependency wiring and run creation.

use std::sync::Arc;

use uuid::Uuid;

use am_domain::config::{ArchiveConfig, EngineConfig, ToolrunnerConfig};
use am_domain::run::{AgentRun, Channel};
use am_domain::{Error, Result};
use am_quota::{LimitKey, QuotaManager};
use am_storage::Database;
use am_toolrunner::ToolRunner;

use crate::fanout::PushBus;
use crate::scheduler::Scheduler;

/// Engine-level configuration bundle.
#[derive(Clone, Default)]
pub struct EngineOptions {
    pub engine: EngineConfig,
    pub archive: ArchiveConfig,
    pub toolrunner: ToolrunnerConfig,
}

/// The orchestration engine.
///
/// Owns every seam the services need: storage, quota KV, push bus,
/// scheduler, and the tool-runner boundary. Constructed once per
/// process; all methods take `&self` and serialize at the storage layer.
pub struct Engine {
    pub(crate) db: Arc<Database>,
    pub(crate) quota: Arc<QuotaManager>,
    pub(crate) bus: Arc<dyn PushBus>,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) tool_runner: Arc<dyn ToolRunner>,
    pub(crate) options: EngineOptions,
    pub(crate) worker_id: String,
}

impl Engine {
    pub fn new(
        db: Arc<Database>,
        quota: Arc<QuotaManager>,
        bus: Arc<dyn PushBus>,
        scheduler: Arc<dyn Scheduler>,
        tool_runner: Arc<dyn ToolRunner>,
        options: EngineOptions,
    ) -> Self {
        let worker_id = options.engine.resolved_worker_id();
        Self {
            db,
            quota,
            bus,
            scheduler,
            tool_runner,
            options,
            worker_id,
        }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn quota(&self) -> &Arc<QuotaManager> {
        &self.quota
    }

    pub fn bus(&self) -> &Arc<dyn PushBus> {
        &self.bus
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    // ── Run creation ─────────────────────────────────────────────────

    /// Create a new top-level run in PENDING and enqueue its first tick.
    ///
    /// Consumes the RUN_CREATION rate quota, then atomically inserts the
    /// run and acquires its concurrency slots; a slot failure rolls the
    /// insert back.
    pub fn create_run(
        &self,
        workspace_id: Uuid,
        agent_id: Uuid,
        input_text: String,
        channel: Channel,
        started_by: Option<Uuid>,
    ) -> Result<AgentRun> {
        self.quota
            .record_request(&workspace_id.to_string(), LimitKey::RunCreation)?;

        let scheduler = self.scheduler.clone();
        self.db.transaction(|txn| {
            let workspace = txn
                .tables()
                .workspace(workspace_id)
                .ok_or_else(|| Error::not_found("workspace", workspace_id))?;
            if !workspace.active {
                return Err(Error::Validation("workspace is inactive".into()));
            }
            let agent = txn
                .tables()
                .agent(agent_id)
                .ok_or_else(|| Error::not_found("agent", agent_id))?;
            if agent.workspace_id != workspace_id {
                return Err(Error::not_found("agent", agent_id));
            }

            let mut run = AgentRun::new(workspace_id, agent_id);
            run.input_text = input_text;
            run.channel = channel;
            run.started_by = started_by;
            let run_id = run.id;
            txn.insert_run(run.clone());

            self.quota
                .acquire_run_slots(&workspace_id.to_string(), &run_id.to_string(), true)?;

            txn.on_commit(move || scheduler.enqueue(run_id, None));
            tracing::info!(%run_id, %workspace_id, %agent_id, "run created");
            Ok(run)
        })
    }
}
