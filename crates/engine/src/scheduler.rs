//! The scheduler seam: `enqueue(tick, run_id, after?)` and `revoke`.
//!
//! The engine never spawns tasks itself; it hands tick requests to a
//! [`Scheduler`]. The bundled [`TokioScheduler`] feeds a worker pool
//! that applies the transient-retry / permanent-fail policy.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use uuid::Uuid;

use crate::core::Engine;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub trait Scheduler: Send + Sync {
    /// Enqueue one tick of one run, optionally after a delay.
    fn enqueue(&self, run_id: Uuid, after: Option<Duration>);
    /// Best-effort revocation of an externally tracked task.
    fn revoke(&self, task_id: &str);
}

/// Discards every request. Used by administrative commands that must
/// not advance runs as a side effect.
pub struct NoopScheduler;

impl Scheduler for NoopScheduler {
    fn enqueue(&self, _run_id: Uuid, _after: Option<Duration>) {}
    fn revoke(&self, _task_id: &str) {}
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tokio implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug)]
pub struct TickJob {
    pub run_id: Uuid,
    pub after: Option<Duration>,
}

/// Queue-backed scheduler. `new` returns the handle plus the receiver;
/// [`TokioScheduler::run_workers`] consumes it with a bounded pool.
pub struct TokioScheduler {
    tx: mpsc::UnboundedSender<TickJob>,
}

impl TokioScheduler {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<TickJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }

    /// Dispatcher loop: consumes tick jobs and executes each under a
    /// concurrency-bounded pool. Transient tick failures are re-enqueued
    /// with the engine's backoff; permanent ones mark the run FAILED.
    pub async fn run_workers(
        engine: Arc<Engine>,
        scheduler: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<TickJob>,
        workers: usize,
    ) {
        let pool = Arc::new(Semaphore::new(workers.max(1)));
        while let Some(job) = rx.recv().await {
            let permit = match pool.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            let engine = engine.clone();
            let scheduler = scheduler.clone();
            tokio::spawn(async move {
                let _permit = permit;
                if let Some(delay) = job.after {
                    tokio::time::sleep(delay).await;
                }
                if let Err(err) = engine.run_tick(job.run_id) {
                    let plan = engine.plan_retry(&err);
                    if plan.retry {
                        scheduler
                            .enqueue(job.run_id, Some(Duration::from_secs(plan.delay_seconds)));
                    } else {
                        engine.handle_run_failure(job.run_id, &err);
                    }
                }
            });
        }
    }
}

impl Scheduler for TokioScheduler {
    fn enqueue(&self, run_id: Uuid, after: Option<Duration>) {
        let _ = self.tx.send(TickJob { run_id, after });
    }

    fn revoke(&self, task_id: &str) {
        // Tick jobs are not individually addressable; the cancel flag on
        // the run makes a stray tick a no-op.
        tracing::debug!(task_id, "revoke requested");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_delivers_jobs() {
        let (scheduler, mut rx) = TokioScheduler::new();
        let run_id = Uuid::new_v4();
        scheduler.enqueue(run_id, None);
        scheduler.enqueue(run_id, Some(Duration::from_secs(5)));

        let first = rx.try_recv().unwrap();
        assert_eq!(first.run_id, run_id);
        assert!(first.after.is_none());

        let second = rx.try_recv().unwrap();
        assert_eq!(second.after, Some(Duration::from_secs(5)));
    }

    #[test]
    fn noop_scheduler_accepts_everything() {
        let scheduler = NoopScheduler;
        scheduler.enqueue(Uuid::new_v4(), None);
        scheduler.revoke("task-1");
    }
}
