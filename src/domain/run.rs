//! Run state: the single durable record of a signup run's progress.
//!
//! A `RunState` is owned exclusively by the orchestrator and persisted as
//! one unit after every transition. There is no process-wide current-run
//! singleton; state always travels as an explicit value.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{ErrorKind, ErrorRecord};

/// A single execution of a signup flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// Unique identifier for this run
    pub run_id: Uuid,

    /// Name of the flow being executed
    pub flow_name: String,

    /// Current status of the run
    pub status: RunStatus,

    /// Index of the next step to execute. Never decreases.
    pub current_step_index: usize,

    /// Names of completed steps, in execution order. Always a prefix
    /// of the flow's step order.
    pub completed_steps: Vec<String>,

    /// Captured payloads keyed by step name (e.g. confirmation IDs)
    pub step_outputs: BTreeMap<String, serde_json::Value>,

    /// Every failed attempt, retained for the life of the run
    pub errors: Vec<ErrorRecord>,

    /// Non-idempotent attempt handed to the adapter but not yet
    /// confirmed. Persisted before the adapter call, cleared once the
    /// outcome is known; a marker still set on load means the process
    /// died mid-attempt.
    #[serde(default)]
    pub in_flight: Option<AttemptMarker>,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run reached a terminal status
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunState {
    /// Create a fresh run at step index 0.
    pub fn new(run_id: Uuid, flow_name: impl Into<String>) -> Self {
        Self {
            run_id,
            flow_name: flow_name.into(),
            status: RunStatus::Pending,
            current_step_index: 0,
            completed_steps: Vec::new(),
            step_outputs: BTreeMap::new(),
            errors: Vec::new(),
            in_flight: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Check if a step has already completed in this run.
    pub fn is_step_completed(&self, step_name: &str) -> bool {
        self.completed_steps.iter().any(|s| s == step_name)
    }

    /// Record a successful step: output payload, completion marker, and
    /// index advance, as one mutation before the caller persists.
    pub fn record_completion(&mut self, step_name: &str, captured: serde_json::Value) {
        if !captured.is_null() {
            self.step_outputs.insert(step_name.to_string(), captured);
        }
        self.completed_steps.push(step_name.to_string());
        self.current_step_index += 1;
    }

    /// Append a failed attempt to the error history.
    pub fn record_error(&mut self, record: ErrorRecord) {
        self.errors.push(record);
    }

    /// Mark an attempt as handed to the adapter. The caller persists
    /// this before the adapter call so a crash mid-attempt is visible
    /// on resume.
    pub fn begin_attempt(&mut self, step_name: &str, attempt: u32) {
        self.in_flight = Some(AttemptMarker {
            step_name: step_name.to_string(),
            attempt,
            started_at: Utc::now(),
        });
    }

    /// Clear the in-flight marker once the adapter reported an outcome.
    pub fn confirm_attempt(&mut self) {
        self.in_flight = None;
    }

    /// The attempt left unconfirmed by an interrupted process, if any.
    pub fn unconfirmed_attempt(&self, step_name: &str) -> Option<&AttemptMarker> {
        self.in_flight.as_ref().filter(|m| m.step_name == step_name)
    }

    /// The most recent error, if any.
    pub fn last_error(&self) -> Option<&ErrorRecord> {
        self.errors.last()
    }

    /// The unresolved `Unknown` record for a step, if one exists.
    pub fn pending_unknown(&self, step_name: &str) -> Option<&ErrorRecord> {
        self.errors
            .iter()
            .rev()
            .find(|e| e.step_name == step_name && e.kind == ErrorKind::Unknown)
            .filter(|e| e.needs_resolution())
    }

    /// The resolution applied to the latest `Unknown` record for a step.
    pub fn resolution_for(&self, step_name: &str) -> Option<ErrorKind> {
        self.errors
            .iter()
            .rev()
            .find(|e| e.step_name == step_name && e.kind == ErrorKind::Unknown)
            .and_then(|e| e.resolved)
    }

    /// Resolve the pending `Unknown` record, returning the step it covered.
    /// Returns `None` when there is nothing awaiting resolution.
    pub fn resolve_pending_unknown(&mut self, resolution: ErrorKind) -> Option<String> {
        let record = self
            .errors
            .iter_mut()
            .rev()
            .find(|e| e.kind == ErrorKind::Unknown && e.resolved.is_none())?;
        record.resolved = Some(resolution);
        Some(record.step_name.clone())
    }

    /// Transition into a terminal or paused status, stamping the finish
    /// time for terminal ones.
    pub fn finish(&mut self, status: RunStatus) {
        if status.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        self.status = status;
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Summary record handed to the surrounding application.
    pub fn report(&self) -> RunReport {
        RunReport {
            run_id: self.run_id,
            status: self.status.clone(),
            step_outputs: self.step_outputs.clone(),
            last_error: self.last_error().cloned(),
        }
    }
}

/// An attempt handed to the adapter whose outcome has not come back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptMarker {
    pub step_name: String,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
}

/// Lifecycle of a run: `Pending -> Running -> {Succeeded | Failed | Paused}`.
/// `Paused` is resumable; `Succeeded` and `Failed` are immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunStatus {
    /// Created but not yet driving steps
    Pending,

    /// Currently executing
    Running,

    /// Halted at a step boundary; resumable after external action
    Paused { reason: String },

    /// All steps completed
    Succeeded,

    /// Failed with an unrecoverable error
    Failed { error: String },
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed { .. })
    }
}

/// Terminal result passed to the result reporter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub step_outputs: BTreeMap<String, serde_json::Value>,
    pub last_error: Option<ErrorRecord>,
}
