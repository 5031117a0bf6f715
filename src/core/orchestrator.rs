//! Run orchestrator: drives one `RunState` from `Pending` to a terminal
//! status by sequencing form adapter calls, guarded by checkpoints and
//! the retry policy.
//!
//! The critical safety rule lives here: an action with an unconfirmed
//! real-world outcome (`Unknown`) is never blindly retried when the step
//! is not idempotent. The run pauses and waits for explicit external
//! resolution instead.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{FormAdapter, StepOutcome};
use crate::config::AccountConfig;
use crate::domain::{ErrorKind, ErrorRecord, RunState, RunStatus};

use super::checkpoint::CheckpointStore;
use super::flow::{SignupFlow, StepDescriptor, ValueSource};

/// Cooperative cancellation flag, checked at step boundaries only.
/// A step that has started always runs to its own outcome.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives signup runs against a form adapter
pub struct Orchestrator {
    /// Base directory holding per-run checkpoint directories
    runs_dir: PathBuf,
}

impl Orchestrator {
    /// Orchestrator over the configured runs directory
    pub fn new() -> Result<Self> {
        Ok(Self {
            runs_dir: crate::config::runs_dir()?,
        })
    }

    /// Orchestrator over an explicit runs directory
    pub fn with_runs_dir(runs_dir: impl Into<PathBuf>) -> Self {
        Self {
            runs_dir: runs_dir.into(),
        }
    }

    /// Execute (or resume) a run until it reaches `Succeeded`, `Failed`,
    /// or `Paused`. The returned state is the final persisted one.
    #[instrument(skip(self, flow, account, adapter, cancel), fields(%run_id, flow = %flow.name))]
    pub async fn execute(
        &self,
        run_id: Uuid,
        flow: &SignupFlow,
        account: &AccountConfig,
        adapter: &dyn FormAdapter,
        cancel: &CancelToken,
    ) -> Result<RunState> {
        flow.validate()?;

        let store = CheckpointStore::open_in(&self.runs_dir, run_id)?;
        let _lock = store.lock()?;

        let mut run = match store.load()? {
            Some(existing) => {
                if existing.is_terminal() {
                    anyhow::bail!(
                        "run {} already finished with status {:?}",
                        run_id,
                        existing.status
                    );
                }
                if existing.flow_name != flow.name {
                    anyhow::bail!(
                        "run {} belongs to flow '{}', not '{}'",
                        run_id,
                        existing.flow_name,
                        flow.name
                    );
                }
                info!(
                    resume_from = existing.current_step_index,
                    "Resuming existing run"
                );
                existing
            }
            None => {
                info!("Starting new run");
                RunState::new(run_id, flow.name.clone())
            }
        };

        run.status = RunStatus::Running;
        store.save(&run)?;

        while run.current_step_index < flow.steps.len() {
            // Cancellation only takes effect between steps, never mid-step
            if cancel.is_cancelled() {
                return self.pause(&store, &mut run, "cancelled by request");
            }

            let step = &flow.steps[run.current_step_index];

            if run.is_step_completed(&step.name) {
                debug!(step = %step.name, "Step already completed, skipping");
                run.current_step_index += 1;
                store.save(&run)?;
                continue;
            }

            if !step.idempotent {
                // A marker still set means the process died between
                // handing the attempt to the adapter and recording its
                // outcome. Convert it to an Unknown record and pause.
                if let Some(attempt) = run.unconfirmed_attempt(&step.name).map(|m| m.attempt) {
                    run.record_error(ErrorRecord::new(
                        step.name.as_str(),
                        attempt,
                        ErrorKind::Unknown,
                        "process interrupted before the outcome was recorded",
                    ));
                    run.confirm_attempt();
                    let reason =
                        format!("manual verification required for step '{}'", step.name);
                    return self.pause(&store, &mut run, &reason);
                }

                // Never re-invoke a side-effecting step whose prior
                // outcome is unconfirmed.
                if run.pending_unknown(&step.name).is_some() {
                    let reason =
                        format!("manual verification required for step '{}'", step.name);
                    return self.pause(&store, &mut run, &reason);
                }

                if run.resolution_for(&step.name) == Some(ErrorKind::Terminal) {
                    let error = format!(
                        "step '{}' resolved as terminal after unconfirmed outcome",
                        step.name
                    );
                    return self.fail(&store, &mut run, &error);
                }
            }

            let fields = resolve_fields(account, &run, step)?;

            match self
                .execute_step_with_retry(&store, &mut run, flow, step, &fields, adapter)
                .await?
            {
                StepResult::Completed => {}
                StepResult::Halted(finished) => return Ok(finished),
            }
        }

        run.finish(RunStatus::Succeeded);
        store.save(&run)?;
        info!("Run completed successfully");

        Ok(run)
    }

    /// Attempt one step under the retry policy. `Completed` means the
    /// step succeeded and the checkpoint already advanced; `Halted`
    /// carries the final persisted state of a paused or failed run.
    async fn execute_step_with_retry(
        &self,
        store: &CheckpointStore,
        run: &mut RunState,
        flow: &SignupFlow,
        step: &StepDescriptor,
        fields: &BTreeMap<String, String>,
        adapter: &dyn FormAdapter,
    ) -> Result<StepResult> {
        let policy = step.retry_policy(&flow.defaults);
        let step_timeout = step.timeout(&flow.defaults);
        let mut attempt = 1u32;

        loop {
            info!(step = %step.name, attempt, "Executing step");

            if !step.idempotent {
                // Write-ahead marker: a crash during the adapter call
                // must pause the resumed run, not re-invoke the step.
                run.begin_attempt(&step.name, attempt);
                store.save(run)?;
            }

            let outcome =
                match tokio::time::timeout(step_timeout, adapter.perform(&step.name, fields))
                    .await
                {
                    // A timeout says nothing about whether the action
                    // landed; classify Unknown, not Failed.
                    Err(_) => StepOutcome::unknown(format!(
                        "step timed out after {}s",
                        step_timeout.as_secs()
                    )),
                    Ok(Err(e)) => StepOutcome::unknown(format!("adapter fault: {:#}", e)),
                    Ok(Ok(outcome)) => outcome,
                };

            // The adapter handed back control; the next save clears
            // the marker alongside whatever it records.
            run.confirm_attempt();

            let (kind, message) = match outcome {
                StepOutcome::Success { captured } => {
                    match step
                        .postcondition
                        .as_ref()
                        .map(|pc| pc.check(&captured))
                        .unwrap_or(Ok(()))
                    {
                        Ok(()) => {
                            run.record_completion(&step.name, captured);
                            store.save(run)?;
                            info!(step = %step.name, attempt, "Step completed");
                            return Ok(StepResult::Completed);
                        }
                        // The interaction ran but the page lacks the
                        // expected evidence. A repeatable step retries;
                        // a non-idempotent one already acted on the far
                        // side, so its real outcome is unconfirmed.
                        Err(msg) if step.idempotent => (ErrorKind::Transient, msg),
                        Err(msg) => (ErrorKind::Unknown, msg),
                    }
                }
                StepOutcome::Failure { kind, message } => (kind, message),
            };

            run.record_error(ErrorRecord::new(
                step.name.as_str(),
                attempt,
                kind,
                message.as_str(),
            ));
            store.save(run)?;

            if kind == ErrorKind::Unknown && !step.idempotent {
                warn!(step = %step.name, %message, "Unconfirmed outcome on non-idempotent step");
                let reason = format!("manual verification required for step '{}'", step.name);
                return Ok(StepResult::Halted(self.pause(store, run, &reason)?));
            }

            let decision = policy.decide(attempt, kind);
            if !decision.should_retry {
                error!(step = %step.name, attempt, %kind, %message, "Step failed permanently");
                let error = format!(
                    "step '{}' failed after {} attempt(s): {}",
                    step.name, attempt, message
                );
                return Ok(StepResult::Halted(self.fail(store, run, &error)?));
            }

            warn!(
                step = %step.name,
                attempt,
                delay_ms = decision.delay.as_millis() as u64,
                %message,
                "Step failed, retrying"
            );

            tokio::time::sleep(decision.delay).await;
            attempt += 1;
        }
    }

    /// Reclassify a paused run's unconfirmed outcome as `Transient`
    /// (safe to retry) or `Terminal` (give up on resume). This is the
    /// only path out of `Paused` for a non-idempotent step; the
    /// orchestrator never auto-resolves ambiguity.
    #[instrument(skip(self), fields(%run_id))]
    pub fn resolve(&self, run_id: Uuid, resolution: ErrorKind) -> Result<RunState> {
        anyhow::ensure!(
            resolution != ErrorKind::Unknown,
            "resolution must be transient or terminal"
        );

        let store = CheckpointStore::open_in(&self.runs_dir, run_id)?;
        let _lock = store.lock()?;

        let mut run = store
            .load()?
            .with_context(|| format!("Run {} not found", run_id))?;

        anyhow::ensure!(
            matches!(run.status, RunStatus::Paused { .. }),
            "run {} is not paused (status {:?})",
            run_id,
            run.status
        );

        let step = run
            .resolve_pending_unknown(resolution)
            .with_context(|| format!("Run {} has no unconfirmed outcome to resolve", run_id))?;

        run.status = RunStatus::Pending;
        store.save(&run)?;

        info!(%step, %resolution, "Unconfirmed outcome resolved");
        Ok(run)
    }

    /// Load the current state of a run
    pub fn status(&self, run_id: Uuid) -> Result<RunState> {
        let store = CheckpointStore::open_in(&self.runs_dir, run_id)?;
        store
            .load()?
            .with_context(|| format!("Run {} not found", run_id))
    }

    /// List recent runs, newest first
    pub fn list_runs(&self, limit: usize) -> Result<Vec<RunState>> {
        let run_ids = CheckpointStore::list_runs(&self.runs_dir)?;
        let mut runs = Vec::new();

        for run_id in run_ids.into_iter().take(limit) {
            if let Ok(run) = self.status(run_id) {
                runs.push(run);
            }
        }

        Ok(runs)
    }

    fn pause(
        &self,
        store: &CheckpointStore,
        run: &mut RunState,
        reason: &str,
    ) -> Result<RunState> {
        warn!(%reason, "Run paused");
        run.finish(RunStatus::Paused {
            reason: reason.to_string(),
        });
        store.save(run)?;
        Ok(run.clone())
    }

    fn fail(
        &self,
        store: &CheckpointStore,
        run: &mut RunState,
        error: &str,
    ) -> Result<RunState> {
        error!(%error, "Run failed");
        run.finish(RunStatus::Failed {
            error: error.to_string(),
        });
        store.save(run)?;
        Ok(run.clone())
    }
}

enum StepResult {
    Completed,
    Halted(RunState),
}

/// Resolve a step's field values from the account config, earlier step
/// outputs, and statics.
fn resolve_fields(
    account: &AccountConfig,
    run: &RunState,
    step: &StepDescriptor,
) -> Result<BTreeMap<String, String>> {
    let mut fields = BTreeMap::new();

    for (field, source) in &step.fields {
        let value = match source {
            ValueSource::Config { config } => account
                .get(config)
                .map(str::to_string)
                .with_context(|| {
                    format!(
                        "Step '{}' field '{}' references missing config key '{}'",
                        step.name, field, config
                    )
                })?,

            ValueSource::StepOutput { step: from, key } => run
                .step_outputs
                .get(from)
                .and_then(|payload| payload.get(key))
                .map(value_to_string)
                .with_context(|| {
                    format!(
                        "Step '{}' field '{}' references missing output '{}' of step '{}'",
                        step.name, field, key, from
                    )
                })?,

            ValueSource::Static { value } => value_to_string(value),
        };

        fields.insert(field.clone(), value);
    }

    Ok(fields)
}

fn value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
