//! formflow - Resumable form-fill-and-submit automation engine
//!
//! Drives a multi-step signup flow through a pluggable form adapter,
//! with retry/backoff on transient failures and durable progress
//! checkpointing so an interrupted run resumes without repeating
//! side-effecting steps.
//!
//! # Architecture
//!
//! - Every state transition is persisted as a full-state checkpoint
//!   before the next step starts
//! - A step whose real-world outcome is unconfirmed (`Unknown`) is
//!   never retried automatically when it is not idempotent; the run
//!   pauses until someone resolves the ambiguity explicitly
//! - The form adapter is a capability interface; browser drivers live
//!   behind it and are chosen at composition time
//!
//! # Modules
//!
//! - `adapters`: Form adapter trait and implementations (driver subprocess, scripted)
//! - `core`: Orchestration logic (Orchestrator, SignupFlow, RetryPolicy, CheckpointStore)
//! - `domain`: Data structures (RunState, ErrorRecord, RunReport)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Start a signup run
//! formflow create-account account.json --flow aws-signup
//!
//! # Check run status
//! formflow status <run-id>
//!
//! # Resolve an unconfirmed outcome, then resume
//! formflow resolve <run-id> transient
//! formflow resume <run-id> account.json --flow aws-signup
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use adapters::{DriverAdapter, FormAdapter, ScriptedAdapter, StepOutcome};
pub use config::AccountConfig;
pub use self::core::{CancelToken, CheckpointStore, Orchestrator, RetryPolicy, SignupFlow};
pub use domain::{ErrorKind, ErrorRecord, RunReport, RunState, RunStatus};
