//! Error taxonomy for covcull.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Why a run stopped before reaching its report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortReason {
    /// A test that existed before this run does not compile.
    ExistingTestBroken { test: String, diagnostics: String },

    /// The caller raised the cancellation flag.
    Cancelled { stage: String },

    /// Scratch state could not be removed after an estimation.
    CleanupFailed { path: String, reason: String },
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::ExistingTestBroken { test, .. } => {
                write!(f, "pre-existing test {test} does not compile")
            }
            AbortReason::Cancelled { stage } => write!(f, "run cancelled before stage {stage}"),
            AbortReason::CleanupFailed { path, reason } => {
                write!(f, "failed to clean up scratch copy {path}: {reason}")
            }
        }
    }
}

/// covcull errors.
///
/// A failed compile is a [`CompileOutcome`](crate::CompileOutcome) and a
/// stopped run is a [`RunOutcome::Aborted`](crate::RunOutcome), not errors.
#[derive(Debug, thiserror::Error)]
pub enum CovcullError {
    #[error("coverage oracle failure for {artifact}: {reason}")]
    OracleFailure { artifact: String, reason: String },

    #[error("generator failure for {source_path}: {reason}")]
    GeneratorFailure { source_path: String, reason: String },

    #[error("filesystem error at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("scratch cleanup failed at {path}: {reason}")]
    CleanupFailure { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("repository error: {0}")]
    Repository(String),

    #[error("process error: {0}")]
    Process(String),
}

impl CovcullError {
    /// Wrap an io error with the path it happened at.
    pub fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CovcullError::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Whether the failure is local to one candidate and the run may continue.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CovcullError::OracleFailure { .. }
                | CovcullError::GeneratorFailure { .. }
                | CovcullError::Filesystem { .. }
                | CovcullError::Process(_)
        )
    }
}

/// Result type for covcull operations.
pub type Result<T> = std::result::Result<T, CovcullError>;
