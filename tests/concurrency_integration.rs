use std::sync::{Arc, Barrier};
use std::thread;

use hive::store::presence::PresenceRegistry;
use hive::store::scope_locks::{LockMode, ScopeLockStore};
use hive::store::tasks::{CompleteOutcome, SubmitStatus, TaskOptions, TaskQueue};
use serde_json::json;
use tempfile::tempdir;

const WORKERS: usize = 8;

#[test]
fn concurrent_submitters_create_one_task() {
    let dir = tempdir().unwrap();
    let barrier = Arc::new(Barrier::new(WORKERS));

    let handles: Vec<_> = (0..WORKERS)
        .map(|i| {
            let root = dir.path().to_path_buf();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let queue = TaskQueue::open(&root);
                barrier.wait();
                queue
                    .submit("render", &json!({"ep": 12}), TaskOptions::default(), &format!("agent-{i}"))
                    .unwrap()
            })
        })
        .collect();
    let receipts: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let created = receipts
        .iter()
        .filter(|r| r.status == SubmitStatus::Pending)
        .count();
    assert_eq!(created, 1);
    assert!(receipts.iter().all(|r| r.id == receipts[0].id));
    assert_eq!(TaskQueue::open(dir.path()).list_pending().unwrap().len(), 1);
}

#[test]
fn concurrent_completions_keep_the_first_result() {
    let dir = tempdir().unwrap();
    let id = TaskQueue::open(dir.path())
        .submit("render", &json!({"ep": 12}), TaskOptions::default(), "A")
        .unwrap()
        .id;
    let barrier = Arc::new(Barrier::new(WORKERS));

    let handles: Vec<_> = (0..WORKERS)
        .map(|i| {
            let root = dir.path().to_path_buf();
            let id = id.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let queue = TaskQueue::open(&root);
                barrier.wait();
                queue
                    .complete(&id, json!(format!("frames-{i}")), None, &format!("worker-{i}"))
                    .unwrap()
            })
        })
        .collect();
    let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let winners: Vec<_> = outcomes
        .iter()
        .filter_map(|o| match o {
            CompleteOutcome::Ok { result } => Some(result.content.clone()),
            CompleteOutcome::AlreadyResolved { .. } => None,
        })
        .collect();
    assert_eq!(winners.len(), 1);
    for outcome in &outcomes {
        if let CompleteOutcome::AlreadyResolved { result, conflict } = outcome {
            assert_eq!(result.content, winners[0]);
            assert!(*conflict);
        }
    }
}

#[test]
fn concurrent_writers_never_leave_partial_files() {
    let dir = tempdir().unwrap();
    let registry = PresenceRegistry::open(dir.path());
    let agent = registry.register("w1", "builder", 1, "h").unwrap();

    let handles: Vec<_> = (0..WORKERS)
        .map(|i| {
            let root = dir.path().to_path_buf();
            let agent_id = agent.id.clone();
            thread::spawn(move || {
                let registry = PresenceRegistry::open(&root);
                let locks = ScopeLockStore::open(&root);
                for _ in 0..20 {
                    registry.heartbeat(&agent_id).unwrap();
                    locks
                        .lock(vec![format!("src/{i}")], LockMode::NoWrite, chrono::Duration::minutes(5), None, "w1")
                        .unwrap();
                }
            })
        })
        .collect();

    // Readers race the writers and must always see whole records.
    for _ in 0..50 {
        registry
            .get(&agent.id, chrono::Duration::seconds(60), chrono::Duration::seconds(300))
            .unwrap();
    }
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(ScopeLockStore::open(dir.path()).list(false).unwrap().len(), WORKERS * 20);
    let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("agents"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
}
