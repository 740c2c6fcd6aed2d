//! The run orchestration engine: journals, the state machine, the leased
//! tick executor, subrun joins, tool-call approvals and execution,
//! recovery sweeps, archival, and push fanout.
//!
//! Everything is driven through [`Engine`], which owns the storage,
//! quota, push-bus and scheduler seams. All mutations happen inside
//! storage transactions; pushes and follow-up ticks are registered as
//! post-commit hooks so a rolled-back transaction is invisible to
//! subscribers.

mod approvals;
mod checkpoints;
mod core;
mod fanout;
mod journal;
mod recovery;
mod scheduler;
mod snapshot;
mod state;
mod subruns;
mod ticker;
mod toolcalls;

pub use crate::core::{Engine, EngineOptions};
pub use checkpoints::ArchiveOutcome;
pub use fanout::{MemoryPushBus, PushBus};
pub use journal::AppendEvent;
pub use recovery::{ReconcileStats, RetryInstruction};
pub use scheduler::{NoopScheduler, Scheduler, TickJob, TokioScheduler};
pub use snapshot::{ChildRunView, RunSnapshot};
pub use subruns::SpawnOptions;
pub use ticker::{TickAction, TickOutcome};
