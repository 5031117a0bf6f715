//! Orchestration logic: flow definitions, retry policy, checkpoints,
//! and the run state machine.

pub mod checkpoint;
pub mod flow;
pub mod orchestrator;
pub mod retry;

pub use checkpoint::{CheckpointError, CheckpointStore, RunLock};
pub use flow::{FlowDefaults, Postcondition, SignupFlow, StepDescriptor, ValueSource};
pub use orchestrator::{CancelToken, Orchestrator};
pub use retry::{RetryDecision, RetryPolicy};
