//! Signup flow definitions and loading.
//!
//! Flows are defined in YAML as an ordered list of step descriptors, each
//! naming the form fields to fill, whether the step is safe to repeat, and
//! an optional postcondition on the captured payload.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::retry::RetryPolicy;

/// A complete signup flow definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignupFlow {
    /// Flow name (used in CLI and run records)
    pub name: String,

    /// Human-readable description
    pub description: String,

    /// Defaults applied to steps that do not override them
    #[serde(default)]
    pub defaults: FlowDefaults,

    /// Ordered list of steps to execute
    pub steps: Vec<StepDescriptor>,
}

impl SignupFlow {
    /// Load a flow from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read flow file: {}", path.display()))?;

        Self::from_yaml(&content)
    }

    /// Parse a flow from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse flow YAML")
    }

    /// Validate the flow definition
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            anyhow::bail!("Flow name cannot be empty");
        }

        if self.steps.is_empty() {
            anyhow::bail!("Flow must have at least one step");
        }

        let step_names: Vec<&str> = self.steps.iter().map(|s| s.name.as_str()).collect();

        for (i, step) in self.steps.iter().enumerate() {
            if step.name.is_empty() {
                anyhow::bail!("Step {} has an empty name", i);
            }

            if step_names[..i].contains(&step.name.as_str()) {
                anyhow::bail!("Duplicate step name '{}'", step.name);
            }

            // Step-output references must point at earlier steps
            for (field, source) in &step.fields {
                if let ValueSource::StepOutput { step: referenced, .. } = source {
                    let step_index = step_names.iter().position(|&n| n == referenced.as_str());
                    match step_index {
                        Some(idx) if idx >= i => {
                            anyhow::bail!(
                                "Step '{}' field '{}' references future step '{}' (forward references not allowed)",
                                step.name,
                                field,
                                referenced
                            );
                        }
                        None => {
                            anyhow::bail!(
                                "Step '{}' field '{}' references non-existent step '{}'",
                                step.name,
                                field,
                                referenced
                            );
                        }
                        _ => {}
                    }
                }
            }
        }

        Ok(())
    }

    /// Get a step by name
    pub fn get_step(&self, name: &str) -> Option<&StepDescriptor> {
        self.steps.iter().find(|s| s.name == name)
    }
}

/// Per-flow defaults for retry and timeout behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDefaults {
    /// Retry policy applied to steps without their own
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Per-step timeout in seconds
    #[serde(default = "default_step_timeout")]
    pub step_timeout_seconds: u64,
}

fn default_step_timeout() -> u64 {
    60
}

impl Default for FlowDefaults {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            step_timeout_seconds: default_step_timeout(),
        }
    }
}

/// A single step in a signup flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDescriptor {
    /// Step name (unique within the flow)
    pub name: String,

    /// Whether the step is safe to repeat. Non-idempotent steps (e.g.
    /// "submit_payment") are never re-invoked while their real-world
    /// outcome is unconfirmed.
    #[serde(default = "default_idempotent")]
    pub idempotent: bool,

    /// Form fields to fill: field name -> where the value comes from
    #[serde(default)]
    pub fields: BTreeMap<String, ValueSource>,

    /// Check applied to the captured payload after a successful attempt
    #[serde(default)]
    pub postcondition: Option<Postcondition>,

    /// Retry policy override for this step
    pub retry: Option<RetryPolicy>,

    /// Timeout override for this step (uses defaults.step_timeout_seconds if not set)
    pub timeout_seconds: Option<u64>,
}

fn default_idempotent() -> bool {
    true
}

impl StepDescriptor {
    /// Get the effective timeout for this step
    pub fn timeout(&self, defaults: &FlowDefaults) -> Duration {
        let seconds = self.timeout_seconds.unwrap_or(defaults.step_timeout_seconds);
        Duration::from_secs(seconds)
    }

    /// Get the effective retry policy for this step
    pub fn retry_policy<'a>(&'a self, defaults: &'a FlowDefaults) -> &'a RetryPolicy {
        self.retry.as_ref().unwrap_or(&defaults.retry)
    }
}

/// Source of a field value
///
/// Supports multiple YAML formats:
/// - Account config: `email: { config: email }`
/// - Earlier step output: `address: { step: generate_email, key: address }`
/// - Static: `country: { value: "United States" }`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueSource {
    /// Read from the validated account configuration
    Config { config: String },

    /// Read from an earlier step's captured payload
    StepOutput { step: String, key: String },

    /// Static value
    Static { value: serde_json::Value },
}

/// Postcondition on a successful step's captured payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Postcondition {
    /// The captured payload must contain a non-empty value under this key
    pub captured_key: String,
}

impl Postcondition {
    /// Check the captured payload. Returns an error message on violation.
    pub fn check(&self, captured: &serde_json::Value) -> Result<(), String> {
        let present = captured
            .get(&self.captured_key)
            .map(|v| match v {
                serde_json::Value::Null => false,
                serde_json::Value::String(s) => !s.is_empty(),
                _ => true,
            })
            .unwrap_or(false);

        if present {
            Ok(())
        } else {
            Err(format!(
                "postcondition violated: captured payload missing '{}'",
                self.captured_key
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_FLOW_YAML: &str = r#"
name: test
description: Test flow

defaults:
  retry:
    max_attempts: 3
    base_delay_ms: 500
    max_delay_ms: 5000
  step_timeout_seconds: 10

steps:
  - name: fill_email
    fields:
      email: { config: email }

  - name: fill_address
    fields:
      address: { step: fill_email, key: address }
      country: { value: "United States" }

  - name: submit_payment
    idempotent: false
    postcondition:
      captured_key: confirmation_id
    timeout_seconds: 30
"#;

    #[test]
    fn test_flow_parsing() {
        let flow = SignupFlow::from_yaml(TEST_FLOW_YAML).unwrap();

        assert_eq!(flow.name, "test");
        assert_eq!(flow.steps.len(), 3);
        assert_eq!(flow.defaults.retry.max_attempts, 3);
        assert_eq!(flow.defaults.step_timeout_seconds, 10);

        assert!(flow.steps[0].idempotent);
        assert!(!flow.steps[2].idempotent);

        let pc = flow.steps[2].postcondition.as_ref().unwrap();
        assert_eq!(pc.captured_key, "confirmation_id");
    }

    #[test]
    fn test_flow_validation() {
        let flow = SignupFlow::from_yaml(TEST_FLOW_YAML).unwrap();
        assert!(flow.validate().is_ok());
    }

    #[test]
    fn test_forward_reference_rejected() {
        let yaml = r#"
name: invalid
description: Invalid flow
steps:
  - name: first
    fields:
      email: { step: second, key: email }
  - name: second
"#;
        let flow = SignupFlow::from_yaml(yaml).unwrap();
        assert!(flow.validate().is_err());
    }

    #[test]
    fn test_duplicate_step_name_rejected() {
        let yaml = r#"
name: invalid
description: Invalid flow
steps:
  - name: fill_email
  - name: fill_email
"#;
        let flow = SignupFlow::from_yaml(yaml).unwrap();
        assert!(flow.validate().is_err());
    }

    #[test]
    fn test_step_timeout_override() {
        let flow = SignupFlow::from_yaml(TEST_FLOW_YAML).unwrap();

        assert_eq!(
            flow.steps[0].timeout(&flow.defaults),
            Duration::from_secs(10)
        );
        assert_eq!(
            flow.steps[2].timeout(&flow.defaults),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_postcondition_check() {
        let pc = Postcondition {
            captured_key: "confirmation_id".to_string(),
        };

        assert!(pc.check(&serde_json::json!({"confirmation_id": "abc-123"})).is_ok());
        assert!(pc.check(&serde_json::json!({"confirmation_id": ""})).is_err());
        assert!(pc.check(&serde_json::json!({"other": "x"})).is_err());
        assert!(pc.check(&serde_json::Value::Null).is_err());
    }
}
