//! Data structures owned by the orchestrator.

pub mod error;
pub mod run;

pub use error::{ErrorKind, ErrorRecord};
pub use run::{AttemptMarker, RunReport, RunState, RunStatus};
