//! Durable run checkpoints with crash-atomic writes.
//!
//! Each run owns a directory under the runs dir holding a single
//! `state.json` with the full `RunState`. Saves go through a temp file in
//! the same directory followed by a rename, so a crash mid-save leaves
//! the previous valid state (or no state), never a torn file.
//!
//! A `lock` file with an fs2 advisory lock enforces a single writer per
//! run id; distinct run ids are fully independent.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tempfile::NamedTempFile;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::RunState;

const STATE_FILE: &str = "state.json";
const LOCK_FILE: &str = "lock";

/// Errors from checkpoint persistence
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("run {0} is already locked by another orchestrator")]
    Locked(Uuid),

    #[error("run {0} is in a terminal state and cannot be modified")]
    Terminal(Uuid),

    #[error("checkpoint for run {run_id} is corrupt: {source}")]
    Corrupt {
        run_id: Uuid,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// File-based checkpoint store for one run
pub struct CheckpointStore {
    run_id: Uuid,
    run_dir: PathBuf,
    state_path: PathBuf,
}

impl CheckpointStore {
    /// Create or open the checkpoint store under a base directory.
    pub fn open_in(base_dir: &Path, run_id: Uuid) -> Result<Self, CheckpointError> {
        let run_dir = base_dir.join(run_id.to_string());
        fs::create_dir_all(&run_dir)?;

        Ok(Self {
            run_id,
            state_path: run_dir.join(STATE_FILE),
            run_dir,
        })
    }

    /// The directory holding this run's checkpoint
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Acquire the single-writer lock for this run. Fails fast when
    /// another orchestrator already holds it.
    pub fn lock(&self) -> Result<RunLock, CheckpointError> {
        let file = File::create(self.run_dir.join(LOCK_FILE))?;
        file.try_lock_exclusive()
            .map_err(|_| CheckpointError::Locked(self.run_id))?;

        Ok(RunLock { file })
    }

    /// Load the last persisted state, or `None` for a fresh run.
    pub fn load(&self) -> Result<Option<RunState>, CheckpointError> {
        let content = match fs::read_to_string(&self.state_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let state = serde_json::from_str(&content).map_err(|source| CheckpointError::Corrupt {
            run_id: self.run_id,
            source,
        })?;

        Ok(Some(state))
    }

    /// Persist the full state as one unit, atomically.
    ///
    /// Refuses to overwrite a checkpoint that already reached a terminal
    /// status; terminal runs are immutable.
    pub fn save(&self, state: &RunState) -> Result<(), CheckpointError> {
        if let Some(existing) = self.load()? {
            if existing.is_terminal() {
                return Err(CheckpointError::Terminal(self.run_id));
            }
        }

        let json = serde_json::to_vec_pretty(state).map_err(|source| CheckpointError::Corrupt {
            run_id: self.run_id,
            source,
        })?;

        // Temp file must live in the run dir so the rename stays on one
        // filesystem.
        let mut tmp = NamedTempFile::new_in(&self.run_dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.state_path)
            .map_err(|e| CheckpointError::Io(e.error))?;

        Ok(())
    }

    /// List all run ids under a base directory, newest first by
    /// directory modification time.
    pub fn list_runs(base_dir: &Path) -> Result<Vec<Uuid>, CheckpointError> {
        if !base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();

        for entry in fs::read_dir(base_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if let Ok(uuid) = Uuid::parse_str(name) {
                    let modified = entry.metadata()?.modified().ok();
                    runs.push((modified, uuid));
                }
            }
        }

        runs.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(runs.into_iter().map(|(_, id)| id).collect())
    }
}

/// Guard holding the advisory lock for a run. The lock is released when
/// the guard is dropped.
pub struct RunLock {
    file: File,
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RunStatus, RunState};
    use tempfile::TempDir;

    fn test_store() -> (CheckpointStore, Uuid, TempDir) {
        let temp = TempDir::new().unwrap();
        let run_id = Uuid::new_v4();
        let store = CheckpointStore::open_in(temp.path(), run_id).unwrap();
        (store, run_id, temp)
    }

    #[test]
    fn test_load_missing_returns_none() {
        let (store, _, _temp) = test_store();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let (store, run_id, _temp) = test_store();

        let mut state = RunState::new(run_id, "aws-signup");
        state.record_completion("fill_email", serde_json::json!({"email": "a@b.c"}));
        store.save(&state).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.run_id, run_id);
        assert_eq!(loaded.completed_steps, vec!["fill_email"]);
        assert_eq!(loaded.current_step_index, 1);
    }

    #[test]
    fn test_terminal_state_is_immutable() {
        let (store, run_id, _temp) = test_store();

        let mut state = RunState::new(run_id, "aws-signup");
        state.finish(RunStatus::Succeeded);
        store.save(&state).unwrap();

        let result = store.save(&RunState::new(run_id, "aws-signup"));
        assert!(matches!(result, Err(CheckpointError::Terminal(_))));
    }

    #[test]
    fn test_lock_is_exclusive() {
        let (store, run_id, temp) = test_store();

        let _guard = store.lock().unwrap();

        let second = CheckpointStore::open_in(temp.path(), run_id).unwrap();
        assert!(matches!(second.lock(), Err(CheckpointError::Locked(_))));

        drop(_guard);
        assert!(second.lock().is_ok());
    }

    #[test]
    fn test_stray_temp_file_does_not_corrupt_state() {
        let (store, run_id, _temp) = test_store();

        let state = RunState::new(run_id, "aws-signup");
        store.save(&state).unwrap();

        // Simulate a crash mid-save: a half-written temp file next to the
        // real state.
        fs::write(store.run_dir().join(".tmpXYZ"), b"{\"run_id\": \"trunc").unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.run_id, run_id);
        assert_eq!(loaded.status, RunStatus::Pending);
    }

    #[test]
    fn test_corrupt_state_is_reported() {
        let (store, _, _temp) = test_store();

        fs::write(store.run_dir().join(STATE_FILE), b"not json").unwrap();
        assert!(matches!(store.load(), Err(CheckpointError::Corrupt { .. })));
    }

    #[test]
    fn test_list_runs_only_uuids() {
        let temp = TempDir::new().unwrap();
        let id1 = Uuid::new_v4();
        let id2 = Uuid::new_v4();

        CheckpointStore::open_in(temp.path(), id1).unwrap();
        CheckpointStore::open_in(temp.path(), id2).unwrap();
        fs::create_dir(temp.path().join("not-a-run")).unwrap();

        let runs = CheckpointStore::list_runs(temp.path()).unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs.contains(&id1));
        assert!(runs.contains(&id2));
    }
}
