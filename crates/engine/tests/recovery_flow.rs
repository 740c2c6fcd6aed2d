//! Recovery paths: cancellation cascade, failure handling, the
//! reconciliation sweep, and run controls.

mod common;

use chrono::{Duration, Utc};
use common::Harness;

use am_domain::run::RunStatus;
use am_domain::subrun::{FailurePolicy, JoinPolicy};
use am_domain::Error;
use am_engine::SpawnOptions;

#[test]
fn cancel_run_cascades_to_children() {
    let h = Harness::new();
    let (ws, agent) = h.seed_workspace();
    let parent = h.create_run(ws, agent);
    h.engine.run_tick(parent.id).unwrap();

    let c1 = h
        .engine
        .spawn_subrun(
            parent.id,
            SpawnOptions {
                input_text: "c1".into(),
                join_policy: JoinPolicy::WaitAll,
                ..Default::default()
            },
        )
        .unwrap();
    let c2 = h
        .engine
        .spawn_subrun(
            parent.id,
            SpawnOptions {
                input_text: "c2".into(),
                join_policy: JoinPolicy::WaitAll,
                ..Default::default()
            },
        )
        .unwrap();

    let cancelled = h.engine.cancel_run(parent.id, Some("operator stop")).unwrap();
    assert_eq!(cancelled.status, RunStatus::Canceled);

    let parent_after = h.run(parent.id);
    assert!(parent_after.cancel_requested);
    assert_eq!(parent_after.error_summary, "operator stop");
    assert!(parent_after.ended_at.is_some());

    for child in [c1.id, c2.id] {
        let row = h.run(child);
        assert_eq!(row.status, RunStatus::Canceled);
        assert!(row.cancel_requested);
        assert_eq!(row.error_summary, "operator stop");
    }

    let types = h.event_types(parent.id);
    assert!(types.contains(&"run_cancelled".into()));
    // One subrun_cancelled per child landed on the parent stream.
    let cancels = types.iter().filter(|t| *t == "subrun_cancelled").count();
    assert_eq!(cancels, 2);
}

#[test]
fn cancel_child_notifies_parent_policy() {
    let h = Harness::new();
    let (ws, agent) = h.seed_workspace();
    let parent = h.create_run(ws, agent);
    h.engine.run_tick(parent.id).unwrap();

    let child = h
        .engine
        .spawn_subrun(
            parent.id,
            SpawnOptions {
                input_text: "c".into(),
                join_policy: JoinPolicy::WaitAll,
                failure_policy: FailurePolicy::FailFast,
                ..Default::default()
            },
        )
        .unwrap();

    h.engine.cancel_run(child.id, Some("not needed")).unwrap();

    // Fail-fast: the cancelled child fails the waiting parent.
    assert_eq!(h.run(child.id).status, RunStatus::Canceled);
    assert_eq!(h.run(parent.id).status, RunStatus::Failed);
    assert!(h.event_types(parent.id).contains(&"subrun_cancelled".into()));
}

#[test]
fn handle_run_failure_marks_permanent_errors() {
    let h = Harness::new();
    let (ws, agent) = h.seed_workspace();
    let run = h.create_run(ws, agent);

    let err = Error::Permanent("model provider exploded".into());
    let instruction = h.engine.handle_run_failure(run.id, &err);
    assert!(!instruction.retry);

    let failed = h.run(run.id);
    assert_eq!(failed.status, RunStatus::Failed);
    assert!(failed.error_summary.contains("model provider exploded"));
}

#[test]
fn transient_errors_plan_a_retry() {
    let h = Harness::new();
    let (ws, agent) = h.seed_workspace();
    let run = h.create_run(ws, agent);

    let err = Error::Locked("lease contention".into());
    let instruction = h.engine.handle_run_failure(run.id, &err);
    assert!(instruction.retry);
    assert_eq!(instruction.delay_seconds, 5);
    // The run was not failed.
    assert_eq!(h.run(run.id).status, RunStatus::Pending);
}

#[test]
fn sweep_resumes_orphaned_waiting_parent() {
    let h = Harness::new();
    let (ws, agent) = h.seed_workspace();
    let parent = h.create_run(ws, agent);
    h.engine.run_tick(parent.id).unwrap();

    let child = h
        .engine
        .spawn_subrun(parent.id, SpawnOptions::default())
        .unwrap();

    // The child finishes but the join notification was lost.
    h.force_status(child.id, RunStatus::Completed);
    assert_eq!(h.run(parent.id).status, RunStatus::WaitingForSubrun);

    h.scheduler.clear();
    let stats = h.engine.reconcile_waiting_parents_and_leases();
    assert_eq!(stats.resumed_waiting_parents, 1);
    assert_eq!(h.run(parent.id).status, RunStatus::Running);
    assert!(h.scheduler.enqueued_runs().contains(&parent.id));
}

#[test]
fn sweep_reclaims_expired_leases() {
    let h = Harness::new();
    let (ws, agent) = h.seed_workspace();
    let run = h.create_run(ws, agent);

    h.db
        .transaction(|txn| {
            txn.update_run(run.id, |r| {
                r.locked_by = Some("crashed-worker".into());
                r.locked_at = Some(Utc::now() - Duration::seconds(120));
                r.lock_expires_at = Some(Utc::now() - Duration::seconds(100));
            })?;
            Ok(())
        })
        .unwrap();

    h.scheduler.clear();
    let stats = h.engine.reconcile_waiting_parents_and_leases();
    assert_eq!(stats.stale_leases_reclaimed, 1);

    let after = h.run(run.id);
    assert!(after.locked_by.is_none());
    assert!(after.lock_expires_at.is_none());
    assert!(h.scheduler.enqueued_runs().contains(&run.id));
}

#[test]
fn sweep_leaves_live_leases_alone() {
    let h = Harness::new();
    let (ws, agent) = h.seed_workspace();
    let run = h.create_run(ws, agent);

    h.db
        .transaction(|txn| {
            txn.update_run(run.id, |r| {
                r.locked_by = Some("busy-worker".into());
                r.locked_at = Some(Utc::now());
                r.lock_expires_at = Some(Utc::now() + Duration::seconds(20));
            })?;
            Ok(())
        })
        .unwrap();

    let stats = h.engine.reconcile_waiting_parents_and_leases();
    assert_eq!(stats.stale_leases_reclaimed, 0);
    assert_eq!(h.run(run.id).locked_by.as_deref(), Some("busy-worker"));
}

#[test]
fn pause_and_resume() {
    let h = Harness::new();
    let (ws, agent) = h.seed_workspace();
    let run = h.create_run(ws, agent);
    h.engine.run_tick(run.id).unwrap();

    h.engine.pause_run(run.id).unwrap();
    assert_eq!(h.run(run.id).status, RunStatus::Paused);

    h.engine.resume_run(run.id).unwrap();
    assert_eq!(h.run(run.id).status, RunStatus::Running);
}

#[test]
fn pause_from_pending_is_illegal() {
    let h = Harness::new();
    let (ws, agent) = h.seed_workspace();
    let run = h.create_run(ws, agent);
    let err = h.engine.pause_run(run.id).unwrap_err();
    assert!(matches!(err, Error::IllegalTransition { .. }));
}

#[test]
fn retry_run_enqueues_non_terminal_only() {
    let h = Harness::new();
    let (ws, agent) = h.seed_workspace();
    let run = h.create_run(ws, agent);

    h.scheduler.clear();
    h.engine.retry_run(run.id).unwrap();
    assert_eq!(h.scheduler.enqueued_runs(), vec![run.id]);

    h.engine.run_tick(run.id).unwrap();
    h.engine.run_tick(run.id).unwrap();
    let err = h.engine.retry_run(run.id).unwrap_err();
    assert!(err.to_string().contains("terminal"));
}

#[test]
fn terminal_status_is_absorbing() {
    let h = Harness::new();
    let (ws, agent) = h.seed_workspace();
    let run = h.create_run(ws, agent);
    h.engine.run_tick(run.id).unwrap();
    h.engine.run_tick(run.id).unwrap();
    assert_eq!(h.run(run.id).status, RunStatus::Completed);

    for target in [RunStatus::Running, RunStatus::Pending, RunStatus::Canceled] {
        let err = h.engine.transition_run(run.id, target).unwrap_err();
        assert!(matches!(err, Error::IllegalTransition { .. }));
    }
    assert!(h.engine.cancel_run(run.id, None).is_err());
}
