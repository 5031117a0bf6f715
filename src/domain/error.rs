//! Failure classification and per-attempt error records.
//!
//! Records are append-only: once written into a run's history they are
//! never removed, even after the failure they describe is resolved.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification of a step failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Retryable: network blip, element not yet rendered, rate limiting.
    Transient,

    /// Not retryable: rejected field value, account already exists.
    Terminal,

    /// The adapter could not determine whether the underlying action
    /// actually happened (e.g. a timeout during a submit).
    Unknown,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Terminal => write!(f, "terminal"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// One failed attempt at a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Step that failed
    pub step_name: String,

    /// Attempt number (1-indexed)
    pub attempt: u32,

    /// How the failure was classified when it happened
    pub kind: ErrorKind,

    /// Human-readable message (NO secrets)
    pub message: String,

    /// When the failure occurred
    pub timestamp: DateTime<Utc>,

    /// Explicit external reclassification of an `Unknown` outcome.
    /// Set at most once; the original `kind` is never rewritten.
    pub resolved: Option<ErrorKind>,
}

impl ErrorRecord {
    /// Record a failure with the current timestamp.
    pub fn new(step_name: impl Into<String>, attempt: u32, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
            attempt,
            kind,
            message: message.into(),
            timestamp: Utc::now(),
            resolved: None,
        }
    }

    /// An `Unknown` outcome that still needs external confirmation.
    pub fn needs_resolution(&self) -> bool {
        self.kind == ErrorKind::Unknown && self.resolved.is_none()
    }
}
