//! Checkpoint persistence integration tests
//!
//! Saves must be crash-atomic: an interrupted save leaves the prior
//! valid state (or none), never a torn file. One orchestrator per run
//! id, enforced by the advisory lock.

use formflow::core::{CheckpointError, CheckpointStore};
use formflow::domain::{ErrorKind, ErrorRecord, RunState, RunStatus};
use std::fs;
use tempfile::TempDir;
use uuid::Uuid;

#[test]
fn test_full_state_roundtrip() {
    let temp = TempDir::new().unwrap();
    let run_id = Uuid::new_v4();
    let store = CheckpointStore::open_in(temp.path(), run_id).unwrap();

    let mut state = RunState::new(run_id, "aws-signup");
    state.status = RunStatus::Running;
    state.record_completion("fill_email", serde_json::json!({"email": "a@b.c"}));
    state.record_error(ErrorRecord::new(
        "fill_password",
        1,
        ErrorKind::Transient,
        "element not rendered",
    ));
    state.begin_attempt("submit_payment", 1);
    store.save(&state).unwrap();

    let loaded = store.load().unwrap().unwrap();
    assert_eq!(loaded.status, RunStatus::Running);
    assert_eq!(loaded.completed_steps, vec!["fill_email"]);
    assert_eq!(loaded.current_step_index, 1);
    assert_eq!(loaded.step_outputs["fill_email"]["email"], "a@b.c");
    assert_eq!(loaded.errors.len(), 1);
    assert_eq!(loaded.errors[0].kind, ErrorKind::Transient);

    let marker = loaded.in_flight.unwrap();
    assert_eq!(marker.step_name, "submit_payment");
    assert_eq!(marker.attempt, 1);
}

#[test]
fn test_interrupted_save_preserves_prior_state() {
    let temp = TempDir::new().unwrap();
    let run_id = Uuid::new_v4();
    let store = CheckpointStore::open_in(temp.path(), run_id).unwrap();

    let mut state = RunState::new(run_id, "aws-signup");
    state.record_completion("fill_email", serde_json::Value::Null);
    store.save(&state).unwrap();

    // Simulate a crash after a later save began but before the rename:
    // a half-written temp file sits next to the real state.
    let next = serde_json::to_string(&state).unwrap();
    fs::write(
        store.run_dir().join(".tmp-partial"),
        &next[..next.len() / 2],
    )
    .unwrap();

    let loaded = store.load().unwrap().unwrap();
    assert_eq!(loaded.completed_steps, vec!["fill_email"]);
}

#[test]
fn test_crash_before_first_save_leaves_no_state() {
    let temp = TempDir::new().unwrap();
    let run_id = Uuid::new_v4();
    let store = CheckpointStore::open_in(temp.path(), run_id).unwrap();

    fs::write(store.run_dir().join(".tmp-partial"), b"{\"run_id").unwrap();

    assert!(store.load().unwrap().is_none());
}

#[test]
fn test_single_writer_per_run_id() {
    let temp = TempDir::new().unwrap();
    let run_id = Uuid::new_v4();

    let first = CheckpointStore::open_in(temp.path(), run_id).unwrap();
    let second = CheckpointStore::open_in(temp.path(), run_id).unwrap();

    let guard = first.lock().unwrap();
    assert!(matches!(second.lock(), Err(CheckpointError::Locked(_))));

    // Distinct run ids are independent
    let other = CheckpointStore::open_in(temp.path(), Uuid::new_v4()).unwrap();
    assert!(other.lock().is_ok());

    drop(guard);
    assert!(second.lock().is_ok());
}

#[test]
fn test_terminal_checkpoint_refuses_updates() {
    let temp = TempDir::new().unwrap();
    let run_id = Uuid::new_v4();
    let store = CheckpointStore::open_in(temp.path(), run_id).unwrap();

    let mut state = RunState::new(run_id, "aws-signup");
    state.finish(RunStatus::Failed {
        error: "account already exists".to_string(),
    });
    store.save(&state).unwrap();

    let mut later = state.clone();
    later.status = RunStatus::Running;
    assert!(matches!(
        store.save(&later),
        Err(CheckpointError::Terminal(_))
    ));

    // The stored state is untouched
    let loaded = store.load().unwrap().unwrap();
    assert!(matches!(loaded.status, RunStatus::Failed { .. }));
}
