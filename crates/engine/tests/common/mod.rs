//! Shared harness for engine integration tests: an engine wired to
//! in-memory doubles (KV, push bus, recording scheduler, stub runner).
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use am_domain::config::{ArchiveConfig, EngineConfig, ToolrunnerConfig};
use am_domain::run::{AgentRun, Channel, RunEvent, RunStatus};
use am_domain::tenancy::{Agent, Membership, Role, Workspace};
use am_domain::tool::ToolDefinition;
use am_domain::Result;
use am_engine::{Engine, EngineOptions, MemoryPushBus, Scheduler};
use am_quota::{MemoryKv, QuotaManager};
use am_storage::Database;
use am_toolrunner::{ExecuteRequest, ExecuteResponse, RunnerStatus, ToolRunner};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Doubles
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Records every enqueue/revoke instead of executing ticks.
#[derive(Default)]
pub struct RecordingScheduler {
    pub enqueued: Mutex<Vec<Uuid>>,
    pub revoked: Mutex<Vec<String>>,
}

impl RecordingScheduler {
    pub fn enqueued_runs(&self) -> Vec<Uuid> {
        self.enqueued.lock().clone()
    }

    pub fn clear(&self) {
        self.enqueued.lock().clear();
    }
}

impl Scheduler for RecordingScheduler {
    fn enqueue(&self, run_id: Uuid, _after: Option<Duration>) {
        self.enqueued.lock().push(run_id);
    }

    fn revoke(&self, task_id: &str) {
        self.revoked.lock().push(task_id.to_owned());
    }
}

/// Returns a canned response (or error) without any network.
pub struct StubToolRunner {
    pub next: Mutex<Option<Result<ExecuteResponse>>>,
}

impl StubToolRunner {
    pub fn new() -> Self {
        Self {
            next: Mutex::new(None),
        }
    }

    pub fn respond_with(&self, response: Result<ExecuteResponse>) {
        *self.next.lock() = Some(response);
    }

    pub fn success(request_id: Uuid) -> ExecuteResponse {
        ExecuteResponse {
            request_id,
            status: RunnerStatus::Completed,
            exit_code: Some(0),
            stdout: "ok".into(),
            stderr: String::new(),
            duration_ms: 12,
            result: Some(serde_json::json!({"lines": 1})),
        }
    }
}

#[async_trait]
impl ToolRunner for StubToolRunner {
    async fn execute(&self, request: &ExecuteRequest) -> Result<ExecuteResponse> {
        match self.next.lock().take() {
            Some(outcome) => outcome,
            None => Ok(Self::success(request.request_id)),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Harness {
    pub engine: Arc<Engine>,
    pub db: Arc<Database>,
    pub bus: Arc<MemoryPushBus>,
    pub scheduler: Arc<RecordingScheduler>,
    pub tool_runner: Arc<StubToolRunner>,
    pub archive_dir: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let archive_dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(Database::new());
        let quota = Arc::new(QuotaManager::new(
            Arc::new(MemoryKv::new()),
            "agentmaestro:quota",
            false,
        ));
        let bus = Arc::new(MemoryPushBus::new());
        let scheduler = Arc::new(RecordingScheduler::default());
        let tool_runner = Arc::new(StubToolRunner::new());

        let options = EngineOptions {
            engine: EngineConfig {
                worker_id: Some("test-worker".into()),
                ..Default::default()
            },
            archive: ArchiveConfig {
                root: archive_dir.path().to_path_buf(),
                ..Default::default()
            },
            toolrunner: ToolrunnerConfig::default(),
        };

        let engine = Arc::new(Engine::new(
            db.clone(),
            quota,
            bus.clone(),
            scheduler.clone(),
            tool_runner.clone(),
            options,
        ));

        Self {
            engine,
            db,
            bus,
            scheduler,
            tool_runner,
            archive_dir,
        }
    }

    // ── Seeding ──────────────────────────────────────────────────────

    pub fn seed_workspace(&self) -> (Uuid, Uuid) {
        self.db
            .transaction(|txn| {
                let workspace = Workspace::new("test-workspace");
                let workspace_id = workspace.id;
                txn.insert_workspace(workspace);

                let agent = Agent::new(workspace_id, "researcher");
                let agent_id = agent.id;
                txn.insert_agent(agent)?;
                Ok((workspace_id, agent_id))
            })
            .expect("seed workspace")
    }

    pub fn seed_member(&self, workspace_id: Uuid, role: Role) -> Uuid {
        let user_id = Uuid::new_v4();
        self.db
            .transaction(|txn| {
                txn.insert_membership(Membership::new(workspace_id, user_id, role));
                Ok(())
            })
            .expect("seed member");
        user_id
    }

    pub fn seed_tool(&self, workspace_id: Uuid, name: &str) -> Uuid {
        self.db
            .transaction(|txn| {
                let def = ToolDefinition::new(workspace_id, name);
                let id = def.id;
                txn.insert_tool_definition(def)?;
                Ok(id)
            })
            .expect("seed tool")
    }

    /// Create a run through the engine (quota-accurate path).
    pub fn create_run(&self, workspace_id: Uuid, agent_id: Uuid) -> AgentRun {
        self.engine
            .create_run(workspace_id, agent_id, "hello".into(), Channel::Dashboard, None)
            .expect("create run")
    }

    /// Insert a run directly, bypassing quotas (bulk test setup).
    pub fn insert_run(&self, workspace_id: Uuid, agent_id: Uuid, status: RunStatus) -> AgentRun {
        self.db
            .transaction(|txn| {
                let mut run = AgentRun::new(workspace_id, agent_id);
                run.status = status;
                if status == RunStatus::Running {
                    run.started_at = Some(chrono::Utc::now());
                    run.current_step_index = 1;
                }
                if status.is_terminal() {
                    run.ended_at = Some(chrono::Utc::now());
                }
                txn.insert_run(run.clone());
                Ok(run)
            })
            .expect("insert run")
    }

    /// Force a status directly at the storage layer, bypassing the
    /// state machine ("set COMPLETED externally" in scenarios).
    pub fn force_status(&self, run_id: Uuid, status: RunStatus) {
        self.db
            .transaction(|txn| {
                txn.update_run(run_id, |r| {
                    r.status = status;
                    if status.is_terminal() {
                        r.ended_at = Some(chrono::Utc::now());
                    }
                })?;
                Ok(())
            })
            .expect("force status");
    }

    // ── Readback ─────────────────────────────────────────────────────

    pub fn run(&self, run_id: Uuid) -> AgentRun {
        self.db
            .read(|t| t.run(run_id).cloned())
            .expect("run exists")
    }

    pub fn events(&self, run_id: Uuid) -> Vec<RunEvent> {
        self.db
            .read(|t| t.events_for_run(run_id, None).into_iter().cloned().collect())
    }

    pub fn event_types(&self, run_id: Uuid) -> Vec<String> {
        self.events(run_id)
            .into_iter()
            .map(|e| e.event_type)
            .collect()
    }
}
