use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use am_domain::config::{Config, ConfigSeverity};
use am_engine::{Engine, TickJob, TokioScheduler};
use am_gateway::api::router::build_router;
use am_gateway::bootstrap;
use am_gateway::cli::{archive, config_cmd, load_config, Cli, Command, ConfigCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (config, config_path) = load_config(cli.config.as_ref())?;

    // Serve is the implicit command.
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            setup_logging();
            check_config(&config)?;
            serve(config).await
        }
        Command::ArchiveRuns {
            older_than,
            limit,
            compact,
            verbose_events,
        } => {
            setup_logging();
            archive::run(config, older_than, limit, compact, verbose_events)
        }
        Command::Config(ConfigCommand::Validate) => {
            if !config_cmd::validate(&config, &config_path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Config(ConfigCommand::Show) => {
            config_cmd::show(&config);
            Ok(())
        }
        Command::Version => {
            println!("agentmaestro {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// JSON logs, filtered by `RUST_LOG` when set and defaulting to debug
/// for the AgentMaestro crates.
fn setup_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,am_engine=debug,am_gateway=debug"));
    tracing_subscriber::fmt().json().with_env_filter(filter).init();
}

/// Log every configuration issue at its severity. Error-severity issues
/// prevent startup.
fn check_config(config: &Config) -> anyhow::Result<()> {
    let mut errors = 0usize;
    for issue in config.validate() {
        if issue.severity == ConfigSeverity::Error {
            errors += 1;
            tracing::error!("config: {issue}");
        } else {
            tracing::warn!("config: {issue}");
        }
    }
    anyhow::ensure!(errors == 0, "refusing to start: {errors} config error(s)");
    Ok(())
}

/// Wire the core, start the background loops, and listen.
async fn serve(config: Arc<Config>) -> anyhow::Result<()> {
    let wired = bootstrap::build(config.clone())?;
    let state = wired.state.clone();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "AgentMaestro core wired");

    spawn_tick_workers(
        state.engine.clone(),
        wired.scheduler,
        wired.tick_rx,
        config.engine.tick_workers,
    );
    spawn_recovery_sweeper(
        state.engine.clone(),
        Duration::from_secs(config.engine.lease_seconds.max(1)),
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "accepting connections");
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

/// Consume the tick queue with a bounded worker pool.
fn spawn_tick_workers(
    engine: Arc<Engine>,
    scheduler: Arc<TokioScheduler>,
    tick_rx: mpsc::UnboundedReceiver<TickJob>,
    workers: usize,
) {
    tracing::info!(workers, "tick workers starting");
    tokio::spawn(TokioScheduler::run_workers(engine, scheduler, tick_rx, workers));
}

/// Periodically resume orphaned waiting parents and reclaim expired
/// leases.
fn spawn_recovery_sweeper(engine: Arc<Engine>, every: Duration) {
    tracing::info!(every_seconds = every.as_secs(), "recovery sweeper starting");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            engine.reconcile_waiting_parents_and_leases();
        }
    });
}
