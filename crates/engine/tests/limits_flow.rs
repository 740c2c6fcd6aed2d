//! Quota enforcement at the engine surface: run slots, spawn limits,
//! and tick-rate backpressure.

mod common;

use common::Harness;

use am_domain::run::RunStatus;
use am_domain::Error;
use am_engine::SpawnOptions;
use am_quota::LimitKey;

#[test]
fn parent_run_slots_are_bounded_and_released() {
    let h = Harness::new();
    let (ws, agent) = h.seed_workspace();

    let mut runs = Vec::new();
    for _ in 0..5 {
        runs.push(h.create_run(ws, agent));
    }

    let err = h
        .engine
        .create_run(ws, agent, String::new(), Default::default(), None)
        .unwrap_err();
    match err {
        Error::LimitExceeded { ref name, .. } => assert!(name.contains("parent runs")),
        other => panic!("expected LimitExceeded, got {other:?}"),
    }
    // The rejected run never landed in storage.
    let count = h.db.read(|t| t.runs_in_status(RunStatus::Pending).len());
    assert_eq!(count, 5);

    // Finishing one run frees its slot.
    let first = runs.remove(0);
    h.engine.run_tick(first.id).unwrap();
    h.engine.run_tick(first.id).unwrap();
    assert_eq!(h.run(first.id).status, RunStatus::Completed);

    h.create_run(ws, agent);
}

#[test]
fn run_creation_rate_is_bounded() {
    let h = Harness::new();
    let (ws, agent) = h.seed_workspace();

    // Burn the creation window without consuming concurrency slots.
    let cap = am_quota::limit_config(LimitKey::RunCreation).max_requests();
    for _ in 0..cap {
        h.engine
            .quota()
            .record_request(&ws.to_string(), LimitKey::RunCreation)
            .unwrap();
    }

    let err = h
        .engine
        .create_run(ws, agent, String::new(), Default::default(), None)
        .unwrap_err();
    assert!(matches!(err, Error::LimitExceeded { .. }));
}

#[test]
fn spawn_rate_is_bounded_per_workspace() {
    let h = Harness::new();
    let (ws, agent) = h.seed_workspace();
    let parent = h.create_run(ws, agent);
    h.engine.run_tick(parent.id).unwrap();

    let cap = am_quota::limit_config(LimitKey::SpawnSubrun).max_requests() as usize;
    for i in 0..cap.min(3) {
        h.engine
            .spawn_subrun(
                parent.id,
                SpawnOptions {
                    input_text: format!("c{i}"),
                    ..Default::default()
                },
            )
            .unwrap();
    }

    let err = h
        .engine
        .spawn_subrun(parent.id, SpawnOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::LimitExceeded { .. }));
    // The failed spawn left no orphan child behind.
    assert_eq!(h.db.read(|t| t.children_of(parent.id).len()), cap.min(3));
}

#[test]
fn tick_rate_exhaustion_surfaces_as_locked() {
    let h = Harness::new();
    let (ws, agent) = h.seed_workspace();
    let run = h.create_run(ws, agent);

    let cap = am_quota::limit_config(LimitKey::RunTick).max_requests();
    for _ in 0..cap {
        h.engine
            .quota()
            .record_request(&ws.to_string(), LimitKey::RunTick)
            .unwrap();
    }

    let err = h.engine.run_tick(run.id).unwrap_err();
    assert!(matches!(err, Error::Locked(_)));
    assert!(err.is_transient());
    // The failed tick rolled back its lease claim.
    assert!(h.run(run.id).locked_by.is_none());
    assert_eq!(h.run(run.id).status, RunStatus::Pending);
}

#[test]
fn terminal_transition_releases_child_slot() {
    let h = Harness::new();
    let (ws, agent) = h.seed_workspace();
    let parent = h.create_run(ws, agent);
    h.engine.run_tick(parent.id).unwrap();

    let child = h
        .engine
        .spawn_subrun(parent.id, SpawnOptions::default())
        .unwrap();

    // Total-runs usage: parent + child. Complete the child; its slot
    // frees up for the next spawn.
    h.engine.run_tick(child.id).unwrap();
    h.engine.run_tick(child.id).unwrap();
    assert_eq!(h.run(child.id).status, RunStatus::Completed);

    h.engine
        .quota()
        .reset(&ws.to_string(), LimitKey::SpawnSubrun);
    h.engine
        .spawn_subrun(
            h.run(parent.id).id,
            SpawnOptions {
                input_text: "again".into(),
                ..Default::default()
            },
        )
        .unwrap();
}
