//! `archive-runs` — batch archival of terminal runs.

use std::sync::Arc;

use am_domain::config::Config;
use am_engine::{Engine, EngineOptions, MemoryPushBus, NoopScheduler};
use am_quota::{MemoryKv, QuotaManager};
use am_storage::Database;
use am_toolrunner::HttpToolRunner;

/// Run the archival pass against the configured store and print one
/// line per archived run.
pub fn run(
    config: Arc<Config>,
    older_than: i64,
    limit: Option<usize>,
    compact: bool,
    verbose_events: Option<Vec<String>>,
) -> anyhow::Result<()> {
    // Archival must not tick runs as a side effect.
    let engine = Arc::new(Engine::new(
        Arc::new(Database::new()),
        Arc::new(QuotaManager::new(
            Arc::new(MemoryKv::new()),
            config.quota.namespace.clone(),
            config.quota.disable_rate_limits,
        )),
        Arc::new(MemoryPushBus::new()),
        Arc::new(NoopScheduler),
        Arc::new(HttpToolRunner::new(&config.toolrunner)?),
        EngineOptions {
            engine: config.engine.clone(),
            archive: config.archive.clone(),
            toolrunner: config.toolrunner.clone(),
        },
    ));

    let results = engine.archive_completed_runs(
        older_than,
        limit,
        compact,
        verbose_events.as_deref(),
    )?;

    for row in &results {
        println!(
            "Archived run {} -> {} (compacted {} events)",
            row.run_id, row.archive_path, row.compacted
        );
    }
    println!("Archived {} run(s).", results.len());
    Ok(())
}
