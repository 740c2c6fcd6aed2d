//! Ghost-broadcast prevention: a rolled-back transaction must never
//! reach a subscriber, and commit-ordered pushes carry their seq.

mod common;

use std::time::Duration;

use common::Harness;

use am_domain::push::run_group;
use am_domain::{Error, Result};
use am_engine::AppendEvent;
use am_engine::PushBus;

#[tokio::test]
async fn rollback_emits_no_push() {
    let h = Harness::new();
    let (ws, agent) = h.seed_workspace();
    let run = h.create_run(ws, agent);

    let mut rx = h.bus.subscribe(&run_group(run.id));

    let result: Result<()> = h.db.transaction(|txn| {
        h.engine.append_event_in(
            txn,
            run.id,
            AppendEvent::new("should_not_broadcast", serde_json::json!({"x": 1})),
        )?;
        Err(Error::Permanent("forced rollback".into()))
    });
    assert!(result.is_err());

    // No frame arrives for the rolled-back event.
    let waited = tokio::time::timeout(Duration::from_millis(250), rx.recv()).await;
    assert!(waited.is_err(), "subscriber must not observe a ghost event");

    // The event is not in the journal either.
    assert!(h.events(run.id).is_empty());
}

#[tokio::test]
async fn committed_event_reaches_subscriber_with_seq() {
    let h = Harness::new();
    let (ws, agent) = h.seed_workspace();
    let run = h.create_run(ws, agent);

    let mut rx = h.bus.subscribe(&run_group(run.id));

    let (_, seq) = h
        .engine
        .append_event(run.id, AppendEvent::new("debug_log", serde_json::json!({"m": "hi"})))
        .unwrap();
    assert_eq!(seq, 1);

    let frame = tokio::time::timeout(Duration::from_millis(250), rx.recv())
        .await
        .expect("frame within 250ms")
        .unwrap();
    assert_eq!(frame.kind, "push");
    assert_eq!(frame.topic, "run.event");
    assert_eq!(frame.event, "debug_log");
    assert_eq!(frame.seq, Some(1));
    assert_eq!(frame.run_id.as_deref(), Some(run.id.to_string().as_str()));
}

#[tokio::test]
async fn broadcast_can_be_suppressed_per_event() {
    let h = Harness::new();
    let (ws, agent) = h.seed_workspace();
    let run = h.create_run(ws, agent);

    let mut rx = h.bus.subscribe(&run_group(run.id));
    h.engine
        .append_event(
            run.id,
            AppendEvent::new("internal_note", serde_json::json!({})).no_run_broadcast(),
        )
        .unwrap();

    let waited = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(waited.is_err());
    // But the event was journaled.
    assert_eq!(h.events(run.id).len(), 1);
}

#[test]
fn concurrent_appends_allocate_gapless_seqs() {
    let h = Harness::new();
    let (ws, agent) = h.seed_workspace();
    let run = h.create_run(ws, agent);

    let threads: Vec<_> = (0..8)
        .map(|worker| {
            let engine = h.engine.clone();
            let run_id = run.id;
            std::thread::spawn(move || {
                for i in 0..5 {
                    engine
                        .append_event(
                            run_id,
                            AppendEvent::new("debug_log", serde_json::json!({"w": worker, "i": i})),
                        )
                        .unwrap();
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    let seqs: Vec<u64> = h.events(run.id).iter().map(|e| e.seq).collect();
    let expected: Vec<u64> = (1..=40).collect();
    assert_eq!(seqs, expected, "seqs must be 1..=40 with no gaps or dupes");
}

#[tokio::test]
async fn snapshot_resumes_from_last_seen_seq() {
    let h = Harness::new();
    let (ws, agent) = h.seed_workspace();
    let run = h.create_run(ws, agent);

    h.engine.run_tick(run.id).unwrap(); // seqs 1, 2
    let snapshot_t1 = h.engine.snapshot(run.id, None).unwrap();
    let last_seen = snapshot_t1.events_since_seq.last().unwrap().seq;
    assert_eq!(last_seen, 2);

    h.engine.run_tick(run.id).unwrap(); // seqs 3, 4

    let delta = h.engine.snapshot(run.id, Some(last_seen)).unwrap();
    let seqs: Vec<u64> = delta.events_since_seq.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, vec![3, 4]);
    assert_eq!(delta.steps.len(), 2);
    assert_eq!(delta.run.current_step_index, 2);
}
