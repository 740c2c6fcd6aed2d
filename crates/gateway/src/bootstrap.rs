//! Process wiring: construct the engine and its seams from config.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use uuid::Uuid;

use am_domain::config::Config;
use am_domain::tenancy::{Agent, Membership, Role, Workspace};
use am_domain::tool::ToolDefinition;
use am_engine::{Engine, EngineOptions, MemoryPushBus, TickJob, TokioScheduler};
use am_quota::{MemoryKv, QuotaManager};
use am_storage::Database;
use am_toolrunner::HttpToolRunner;

use crate::auth::Sessions;
use crate::state::AppState;

/// Everything `serve` needs: shared state plus the scheduler plumbing.
pub struct Wired {
    pub state: AppState,
    pub scheduler: Arc<TokioScheduler>,
    pub tick_rx: mpsc::UnboundedReceiver<TickJob>,
}

pub fn build(config: Arc<Config>) -> anyhow::Result<Wired> {
    // ── Storage ──────────────────────────────────────────────────────
    let db = Arc::new(Database::new());
    tracing::info!("storage ready");

    // ── Quota manager (shared KV) ────────────────────────────────────
    let quota = Arc::new(QuotaManager::new(
        Arc::new(MemoryKv::new()),
        config.quota.namespace.clone(),
        config.quota.disable_rate_limits,
    ));
    tracing::info!(
        namespace = %config.quota.namespace,
        rate_bypass = config.quota.disable_rate_limits,
        "quota manager ready"
    );

    // ── Push bus ─────────────────────────────────────────────────────
    let bus = Arc::new(MemoryPushBus::new());
    tracing::info!("push bus ready");

    // ── Scheduler ────────────────────────────────────────────────────
    let (scheduler, tick_rx) = TokioScheduler::new();
    tracing::info!(workers = config.engine.tick_workers, "tick scheduler ready");

    // ── Tool-runner client ───────────────────────────────────────────
    let tool_runner =
        Arc::new(HttpToolRunner::new(&config.toolrunner).context("initializing tool-runner client")?);
    tracing::info!(url = %config.toolrunner.url, "tool-runner client ready");

    // ── Engine ───────────────────────────────────────────────────────
    let engine = Arc::new(Engine::new(
        db,
        quota,
        bus,
        scheduler.clone(),
        tool_runner,
        EngineOptions {
            engine: config.engine.clone(),
            archive: config.archive.clone(),
            toolrunner: config.toolrunner.clone(),
        },
    ));
    tracing::info!(worker_id = %engine.worker_id(), "engine ready");

    // ── Sessions ─────────────────────────────────────────────────────
    let sessions = Arc::new(Sessions::from_config(&config.auth));
    tracing::info!(tokens = config.auth.tokens.len(), "session store ready");

    let state = AppState {
        config,
        engine,
        sessions,
    };

    if state.config.dev.seed {
        seed_dev_workspace(&state)?;
    }

    Ok(Wired {
        state,
        scheduler,
        tick_rx,
    })
}

/// Create a dev workspace with one agent, one enabled tool, and an
/// OWNER membership for every configured session user.
fn seed_dev_workspace(state: &AppState) -> anyhow::Result<()> {
    let users: Vec<Uuid> = state.config.auth.tokens.values().copied().collect();
    state.engine.db().transaction(|txn| {
        let workspace = Workspace::new("dev");
        let workspace_id = workspace.id;
        txn.insert_workspace(workspace);

        let mut agent = Agent::new(workspace_id, "assistant");
        agent.system_prompt = "You are a helpful assistant.".into();
        let agent_id = agent.id;
        txn.insert_agent(agent)?;

        txn.insert_tool_definition(ToolDefinition::new(workspace_id, "search"))?;

        for user_id in &users {
            txn.insert_membership(Membership::new(workspace_id, *user_id, Role::Owner));
        }

        tracing::info!(%workspace_id, %agent_id, members = users.len(), "dev workspace seeded");
        Ok(())
    })?;
    Ok(())
}
