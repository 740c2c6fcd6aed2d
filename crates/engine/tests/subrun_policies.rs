//! Subrun join and failure policies: wait-any, wait-all, quorum,
//! timeout, fail-fast and cancel-siblings.

mod common;

use chrono::{Duration, Utc};
use common::Harness;
use uuid::Uuid;

use am_domain::run::RunStatus;
use am_domain::subrun::{FailurePolicy, JoinPolicy, SubrunLink};
use am_domain::Error;
use am_engine::SpawnOptions;

/// Create a parent run and advance it to RUNNING.
fn running_parent(h: &Harness) -> (Uuid, Uuid, Uuid) {
    let (ws, agent) = h.seed_workspace();
    let run = h.create_run(ws, agent);
    h.engine.run_tick(run.id).unwrap();
    (ws, agent, run.id)
}

fn spawn(h: &Harness, parent: Uuid, options: SpawnOptions) -> Uuid {
    h.engine.spawn_subrun(parent, options).unwrap().id
}

#[test]
fn spawn_parks_parent_and_enqueues_child() {
    let h = Harness::new();
    let (_, _, parent) = running_parent(&h);
    h.scheduler.clear();

    let child = spawn(
        &h,
        parent,
        SpawnOptions {
            input_text: "c1".into(),
            join_policy: JoinPolicy::WaitAny,
            ..Default::default()
        },
    );

    assert_eq!(h.run(parent).status, RunStatus::WaitingForSubrun);
    let child_run = h.run(child);
    assert_eq!(child_run.status, RunStatus::Pending);
    assert_eq!(child_run.parent_run_id, Some(parent));
    assert_eq!(child_run.input_text, "c1");
    assert_eq!(h.scheduler.enqueued_runs(), vec![child]);

    // Parent journal: step_created for the SUBRUN_SPAWN step, then
    // subrun_spawned, then the parent's own state change.
    let types = h.event_types(parent);
    assert!(types.ends_with(&[
        "step_created".into(),
        "subrun_spawned".into(),
        "state_changed".into()
    ]));
}

#[test]
fn wait_any_resumes_on_first_terminal_child() {
    let h = Harness::new();
    let (_, _, parent) = running_parent(&h);
    let group = Uuid::new_v4();

    let c1 = spawn(
        &h,
        parent,
        SpawnOptions {
            input_text: "c1".into(),
            join_policy: JoinPolicy::WaitAny,
            group_id: Some(group),
            ..Default::default()
        },
    );
    let c2 = spawn(
        &h,
        parent,
        SpawnOptions {
            input_text: "c2".into(),
            join_policy: JoinPolicy::WaitAny,
            group_id: Some(group),
            ..Default::default()
        },
    );
    assert_eq!(h.run(parent).status, RunStatus::WaitingForSubrun);

    h.scheduler.clear();
    h.force_status(c1, RunStatus::Completed);
    let resumed = h.engine.complete_subrun(c1).unwrap();

    assert_eq!(resumed, Some(parent));
    assert_eq!(h.run(parent).status, RunStatus::Running);
    assert_eq!(h.run(c2).status, RunStatus::Pending);
    assert!(h.event_types(parent).contains(&"subrun_completed".into()));
    assert_eq!(h.scheduler.enqueued_runs(), vec![parent]);
}

#[test]
fn wait_all_waits_for_every_child() {
    let h = Harness::new();
    let (_, _, parent) = running_parent(&h);
    let group = Uuid::new_v4();

    let opts = |text: &str| SpawnOptions {
        input_text: text.into(),
        join_policy: JoinPolicy::WaitAll,
        group_id: Some(group),
        ..Default::default()
    };
    let c1 = spawn(&h, parent, opts("c1"));
    let c2 = spawn(&h, parent, opts("c2"));

    h.force_status(c1, RunStatus::Completed);
    assert_eq!(h.engine.complete_subrun(c1).unwrap(), None);
    assert_eq!(h.run(parent).status, RunStatus::WaitingForSubrun);

    h.force_status(c2, RunStatus::Completed);
    assert_eq!(h.engine.complete_subrun(c2).unwrap(), Some(parent));
    assert_eq!(h.run(parent).status, RunStatus::Running);
}

#[test]
fn quorum_two_of_three() {
    let h = Harness::new();
    let (_, _, parent) = running_parent(&h);
    let group = Uuid::new_v4();

    let opts = |text: &str| SpawnOptions {
        input_text: text.into(),
        join_policy: JoinPolicy::Quorum,
        quorum: Some(2),
        group_id: Some(group),
        ..Default::default()
    };
    let c1 = spawn(&h, parent, opts("c1"));
    let c2 = spawn(&h, parent, opts("c2"));
    let _c3 = spawn(&h, parent, opts("c3"));

    h.force_status(c1, RunStatus::Completed);
    assert_eq!(h.engine.complete_subrun(c1).unwrap(), None);
    assert_eq!(h.run(parent).status, RunStatus::WaitingForSubrun);

    h.force_status(c2, RunStatus::Completed);
    assert_eq!(h.engine.complete_subrun(c2).unwrap(), Some(parent));
    assert_eq!(h.run(parent).status, RunStatus::Running);
}

#[test]
fn fail_fast_fails_parent_immediately() {
    let h = Harness::new();
    let (_, _, parent) = running_parent(&h);
    let group = Uuid::new_v4();

    let opts = |text: &str| SpawnOptions {
        input_text: text.into(),
        join_policy: JoinPolicy::WaitAll,
        failure_policy: FailurePolicy::FailFast,
        group_id: Some(group),
        ..Default::default()
    };
    let c1 = spawn(&h, parent, opts("c1"));
    let c2 = spawn(&h, parent, opts("c2"));

    h.force_status(c1, RunStatus::Failed);
    assert_eq!(h.engine.complete_subrun(c1).unwrap(), None);

    assert_eq!(h.run(parent).status, RunStatus::Failed);
    // Fail-fast leaves siblings alone.
    assert_eq!(h.run(c2).status, RunStatus::Pending);
}

#[test]
fn cancel_siblings_cancels_active_then_fails_parent() {
    let h = Harness::new();
    let (_, _, parent) = running_parent(&h);
    let group = Uuid::new_v4();

    let opts = |text: &str| SpawnOptions {
        input_text: text.into(),
        join_policy: JoinPolicy::WaitAll,
        failure_policy: FailurePolicy::CancelSiblings,
        group_id: Some(group),
        ..Default::default()
    };
    let c0 = spawn(&h, parent, opts("c0"));
    let c1 = spawn(&h, parent, opts("c1"));

    h.force_status(c0, RunStatus::Failed);
    h.engine.complete_subrun(c0).unwrap();

    assert_eq!(h.run(parent).status, RunStatus::Failed);
    assert_eq!(h.run(c1).status, RunStatus::Canceled);

    let types = h.event_types(parent);
    assert!(types.contains(&"subrun_completed".into()));
    let events = h.events(parent);
    let last_state_change = events
        .iter()
        .rev()
        .find(|e| e.event_type == "state_changed")
        .unwrap();
    assert_eq!(last_state_change.payload["to"], "FAILED");
}

#[test]
fn continue_policy_keeps_evaluating_join() {
    let h = Harness::new();
    let (_, _, parent) = running_parent(&h);
    let group = Uuid::new_v4();

    let opts = |text: &str| SpawnOptions {
        input_text: text.into(),
        join_policy: JoinPolicy::WaitAll,
        failure_policy: FailurePolicy::Continue,
        group_id: Some(group),
        ..Default::default()
    };
    let c1 = spawn(&h, parent, opts("c1"));
    let c2 = spawn(&h, parent, opts("c2"));

    h.force_status(c1, RunStatus::Failed);
    assert_eq!(h.engine.complete_subrun(c1).unwrap(), None);
    assert_eq!(h.run(parent).status, RunStatus::WaitingForSubrun);

    h.force_status(c2, RunStatus::Completed);
    assert_eq!(h.engine.complete_subrun(c2).unwrap(), Some(parent));
    assert_eq!(h.run(parent).status, RunStatus::Running);
}

#[test]
fn timeout_policy_resumes_after_deadline() {
    let h = Harness::new();
    let (ws, agent) = h.seed_workspace();

    // Manual setup so the link creation time can sit in the past.
    let (parent, c1, c2) = h
        .db
        .transaction(|txn| {
            let mut parent = am_domain::run::AgentRun::new(ws, agent);
            parent.status = RunStatus::WaitingForSubrun;
            let parent_id = parent.id;
            txn.insert_run(parent);

            let group = Uuid::new_v4();
            let mut child = |status: RunStatus| {
                let mut run = am_domain::run::AgentRun::new(ws, agent);
                run.parent_run_id = Some(parent_id);
                run.status = status;
                if status.is_terminal() {
                    run.ended_at = Some(Utc::now());
                }
                run
            };
            let c1 = child(RunStatus::Completed);
            let c2 = child(RunStatus::Pending);
            let (c1_id, c2_id) = (c1.id, c2.id);
            txn.insert_run(c1);
            txn.insert_run(c2);

            for child_id in [c1_id, c2_id] {
                txn.insert_subrun_link(SubrunLink {
                    id: Uuid::new_v4(),
                    parent_run_id: parent_id,
                    child_run_id: child_id,
                    group_id: group,
                    join_policy: JoinPolicy::Timeout,
                    quorum: None,
                    timeout_seconds: Some(30),
                    failure_policy: FailurePolicy::Continue,
                    metadata: serde_json::Value::Null,
                    created_at: Utc::now() - Duration::seconds(60),
                });
            }
            Ok((parent_id, c1_id, c2_id))
        })
        .unwrap();

    // c2 is still active, but the group deadline passed.
    assert_eq!(h.engine.complete_subrun(c1).unwrap(), Some(parent));
    assert_eq!(h.run(parent).status, RunStatus::Running);
    assert_eq!(h.run(c2).status, RunStatus::Pending);
}

#[test]
fn spawn_rejects_bad_parent_state_and_cap() {
    let h = Harness::new();
    let (_, _, parent) = running_parent(&h);

    // Fill the pending-children cap.
    for i in 0..4 {
        spawn(
            &h,
            parent,
            SpawnOptions {
                input_text: format!("c{i}"),
                ..Default::default()
            },
        );
        // Keep under the spawn rate window.
        h.engine.quota().reset(
            &h.run(parent).workspace_id.to_string(),
            am_quota::LimitKey::SpawnSubrun,
        );
    }
    let err = h
        .engine
        .spawn_subrun(parent, SpawnOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(err.to_string().contains("pending subruns"));

    // Terminal parent cannot spawn.
    let (ws2, agent2) = h.seed_workspace();
    let done = h.create_run(ws2, agent2);
    h.engine.run_tick(done.id).unwrap();
    h.engine.run_tick(done.id).unwrap();
    let err = h
        .engine
        .spawn_subrun(done.id, SpawnOptions::default())
        .unwrap_err();
    assert!(err.to_string().contains("cannot spawn"));
}

#[test]
fn completed_child_tick_drives_parent_resume() {
    let h = Harness::new();
    let (_, _, parent) = running_parent(&h);

    let child = spawn(
        &h,
        parent,
        SpawnOptions {
            input_text: "c1".into(),
            join_policy: JoinPolicy::WaitAny,
            ..Default::default()
        },
    );

    // Drive the child through its own lifecycle; its terminal tick
    // invokes the join controller on commit.
    h.engine.run_tick(child).unwrap();
    h.engine.run_tick(child).unwrap();

    assert_eq!(h.run(child).status, RunStatus::Completed);
    assert_eq!(h.run(parent).status, RunStatus::Running);
}
