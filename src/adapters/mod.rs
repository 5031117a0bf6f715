//! Form adapter interfaces.
//!
//! A form adapter performs one UI interaction (locate elements, input
//! values, trigger navigation) and reports its outcome. The orchestrator
//! depends only on this trait; concrete browser drivers live behind it
//! and are chosen at composition time.

pub mod driver;
pub mod scripted;

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::ErrorKind;

pub use driver::DriverAdapter;
pub use scripted::ScriptedAdapter;

/// Outcome of one adapter interaction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum StepOutcome {
    /// The interaction happened; captured payload may carry values
    /// later steps depend on (confirmation IDs, generated addresses).
    Success {
        #[serde(default)]
        captured: serde_json::Value,
    },

    /// The interaction did not happen, or its real-world effect is
    /// unconfirmed (`kind = Unknown`).
    Failure { kind: ErrorKind, message: String },
}

impl StepOutcome {
    /// Success with no captured payload
    pub fn success() -> Self {
        Self::Success {
            captured: serde_json::Value::Null,
        }
    }

    /// An ambiguous outcome: the adapter cannot say whether the action
    /// took effect.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::Failure {
            kind: ErrorKind::Unknown,
            message: message.into(),
        }
    }
}

/// Trait for form adapters
#[async_trait]
pub trait FormAdapter: Send + Sync {
    /// Human-readable adapter name
    fn name(&self) -> &str;

    /// Perform the interaction for one step with resolved field values.
    ///
    /// Implementations must report ambiguity honestly: when they cannot
    /// tell whether the action happened (process crash, dropped
    /// connection during submit), the outcome is `Unknown`, not a plain
    /// failure. An `Err` is reserved for adapter-internal faults and is
    /// classified Unknown by the orchestrator.
    async fn perform(&self, step_name: &str, fields: &BTreeMap<String, String>)
        -> Result<StepOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_wire_format() {
        let outcome: StepOutcome =
            serde_json::from_str(r#"{"status": "success", "captured": {"confirmation_id": "x1"}}"#)
                .unwrap();
        assert!(matches!(outcome, StepOutcome::Success { .. }));

        let outcome: StepOutcome =
            serde_json::from_str(r#"{"status": "failure", "kind": "unknown", "message": "dropped"}"#)
                .unwrap();
        assert!(matches!(
            outcome,
            StepOutcome::Failure {
                kind: ErrorKind::Unknown,
                ..
            }
        ));
    }

    #[test]
    fn test_success_without_captured_defaults_to_null() {
        let outcome: StepOutcome = serde_json::from_str(r#"{"status": "success"}"#).unwrap();
        match outcome {
            StepOutcome::Success { captured } => assert!(captured.is_null()),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
