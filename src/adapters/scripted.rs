//! Scripted form adapter for dry runs and tests.
//!
//! Replays a programmed queue of outcomes per step and counts every
//! invocation, so orchestrator behavior (skipping, retrying, pausing)
//! can be asserted without a browser.

use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use super::{FormAdapter, StepOutcome};

#[derive(Default)]
struct ScriptState {
    /// Outcome queues per step, consumed front-first; the last outcome
    /// repeats once the queue is down to one entry.
    outcomes: BTreeMap<String, Vec<StepOutcome>>,

    /// Invocation counts per step
    calls: BTreeMap<String, u32>,
}

/// In-memory adapter replaying scripted outcomes
#[derive(Default)]
pub struct ScriptedAdapter {
    state: Mutex<ScriptState>,
}

impl ScriptedAdapter {
    /// Adapter that succeeds every step, echoing the field values as
    /// the captured payload. Used by `--dry-run`.
    pub fn always_success() -> Self {
        Self::default()
    }

    /// Queue outcomes for a step, consumed in order.
    pub fn script(self, step_name: impl Into<String>, outcomes: Vec<StepOutcome>) -> Self {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .outcomes
            .insert(step_name.into(), outcomes);
        self
    }

    /// How many times a step has been invoked.
    pub fn calls(&self, step_name: &str) -> u32 {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .calls
            .get(step_name)
            .copied()
            .unwrap_or(0)
    }

    /// Total invocations across all steps.
    pub fn total_calls(&self) -> u32 {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .calls
            .values()
            .sum()
    }
}

#[async_trait]
impl FormAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn perform(
        &self,
        step_name: &str,
        fields: &BTreeMap<String, String>,
    ) -> Result<StepOutcome> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *state.calls.entry(step_name.to_string()).or_insert(0) += 1;

        let outcome = match state.outcomes.get_mut(step_name) {
            Some(queue) if queue.len() > 1 => queue.remove(0),
            Some(queue) if queue.len() == 1 => queue[0].clone(),
            _ => {
                // Unscripted steps succeed, echoing their inputs
                let captured = fields
                    .iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                    .collect::<serde_json::Map<_, _>>();
                StepOutcome::Success {
                    captured: serde_json::Value::Object(captured),
                }
            }
        };

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorKind;

    #[tokio::test]
    async fn test_unscripted_step_echoes_fields() {
        let adapter = ScriptedAdapter::always_success();

        let mut fields = BTreeMap::new();
        fields.insert("email".to_string(), "a@b.c".to_string());

        let outcome = adapter.perform("fill_email", &fields).await.unwrap();
        match outcome {
            StepOutcome::Success { captured } => assert_eq!(captured["email"], "a@b.c"),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(adapter.calls("fill_email"), 1);
    }

    #[tokio::test]
    async fn test_scripted_queue_consumed_in_order() {
        let adapter = ScriptedAdapter::default().script(
            "fill_password",
            vec![
                StepOutcome::Failure {
                    kind: ErrorKind::Transient,
                    message: "not rendered".to_string(),
                },
                StepOutcome::success(),
            ],
        );

        let fields = BTreeMap::new();
        let first = adapter.perform("fill_password", &fields).await.unwrap();
        assert!(matches!(first, StepOutcome::Failure { .. }));

        let second = adapter.perform("fill_password", &fields).await.unwrap();
        assert!(matches!(second, StepOutcome::Success { .. }));

        // Last outcome repeats
        let third = adapter.perform("fill_password", &fields).await.unwrap();
        assert!(matches!(third, StepOutcome::Success { .. }));

        assert_eq!(adapter.calls("fill_password"), 3);
    }
}
