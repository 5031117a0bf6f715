//! Bundled flow definition tests
//!
//! The flow files shipped under `flows/` must load through the same
//! parser and validator the CLI uses.

use std::collections::BTreeMap;
use std::path::Path;

use formflow::adapters::{ScriptedAdapter, StepOutcome};
use formflow::config::{AccountConfig, REQUIRED_FIELDS};
use formflow::core::{CancelToken, Orchestrator, SignupFlow, ValueSource};
use formflow::domain::RunStatus;
use tempfile::TempDir;
use uuid::Uuid;

fn bundled_flow() -> SignupFlow {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("flows/aws-signup.yaml");
    let flow = SignupFlow::from_file(&path).unwrap();
    flow.validate().unwrap();
    flow
}

fn account() -> AccountConfig {
    let fields: BTreeMap<String, String> = REQUIRED_FIELDS
        .iter()
        .map(|f| (f.to_string(), format!("value-{}", f)))
        .collect();
    AccountConfig::from_fields(fields)
}

#[test]
fn test_bundled_flow_loads_and_validates() {
    let flow = bundled_flow();
    assert_eq!(flow.name, "aws-signup");

    let navigate = flow.get_step("navigate_signup").unwrap();
    assert_eq!(
        navigate.postcondition.as_ref().unwrap().captured_key,
        "page_url"
    );

    let submit = flow.get_step("submit_registration").unwrap();
    assert!(!submit.idempotent);
    assert_eq!(
        submit.postcondition.as_ref().unwrap().captured_key,
        "confirmation_id"
    );
}

#[test]
fn test_bundled_flow_uses_only_required_config_keys() {
    for step in &bundled_flow().steps {
        for source in step.fields.values() {
            if let ValueSource::Config { config } = source {
                assert!(
                    REQUIRED_FIELDS.contains(&config.as_str()),
                    "step '{}' references unknown config key '{}'",
                    step.name,
                    config
                );
            }
        }
    }
}

#[tokio::test]
async fn test_bundled_flow_runs_end_to_end() {
    let temp = TempDir::new().unwrap();
    let orchestrator = Orchestrator::with_runs_dir(temp.path());
    let flow = bundled_flow();
    let run_id = Uuid::new_v4();

    // Steps with postconditions need scripted captures; the rest echo
    // their fields.
    let adapter = ScriptedAdapter::default()
        .script(
            "navigate_signup",
            vec![StepOutcome::Success {
                captured: serde_json::json!({"page_url": "https://signup.example.com"}),
            }],
        )
        .script(
            "submit_registration",
            vec![StepOutcome::Success {
                captured: serde_json::json!({"confirmation_id": "conf-123"}),
            }],
        );

    let run = orchestrator
        .execute(run_id, &flow, &account(), &adapter, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.completed_steps.len(), flow.steps.len());
    assert_eq!(
        run.step_outputs["submit_registration"]["confirmation_id"],
        "conf-123"
    );
}
