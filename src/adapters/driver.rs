//! Subprocess-backed form adapter.
//!
//! Spawns an external driver command (Selenium, Playwright, or plain
//! HTTP scripts wrapped in any executable), writes a JSON request to its
//! stdin, and parses a JSON `StepOutcome` from its stdout. The driver
//! binary owns all DOM/browser knowledge; this crate never sees a
//! selector.

use std::collections::BTreeMap;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{FormAdapter, StepOutcome};

/// Request sent to the driver process on stdin
#[derive(Debug, Serialize)]
struct DriverRequest<'a> {
    step: &'a str,
    fields: &'a BTreeMap<String, String>,
}

/// Form adapter delegating to an external driver command
pub struct DriverAdapter {
    /// Path to the driver binary
    command: String,

    /// Extra arguments passed before the request
    args: Vec<String>,
}

impl DriverAdapter {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

#[async_trait]
impl FormAdapter for DriverAdapter {
    fn name(&self) -> &str {
        "driver"
    }

    async fn perform(
        &self,
        step_name: &str,
        fields: &BTreeMap<String, String>,
    ) -> Result<StepOutcome> {
        let request = serde_json::to_vec(&DriverRequest {
            step: step_name,
            fields,
        })
        .context("Failed to serialize driver request")?;

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn driver '{}'", self.command))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&request)
                .await
                .context("Failed to write to driver stdin")?;
            // Drop stdin to signal EOF
        }

        let output = child
            .wait_with_output()
            .await
            .with_context(|| format!("Failed to wait for driver '{}'", self.command))?;

        // A driver that died or produced garbage may have acted on the
        // page before failing. Its outcome is unconfirmed, not failed.
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Ok(StepOutcome::unknown(format!(
                "driver exited with code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        match serde_json::from_slice::<StepOutcome>(&output.stdout) {
            Ok(outcome) => Ok(outcome),
            Err(e) => Ok(StepOutcome::unknown(format!(
                "driver reply was not a valid outcome: {}",
                e
            ))),
        }
    }
}
