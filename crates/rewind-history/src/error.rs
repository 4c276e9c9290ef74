use std::fmt;

use rewind_runtime::StoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, HistoryError>;

/// Errors from history configuration and the enhanced store surface.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("unknown compression strategy `{0}`")]
    UnknownStrategy(String),

    #[error("{feature} is disabled")]
    FeatureDisabled { feature: &'static str },

    #[error("invalid option `{name}`: {reason}")]
    InvalidOption { name: &'static str, reason: String },

    #[error("snapshot json: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One atom that could not be written back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomRestoreFailure {
    /// Key of the entry in the snapshot state.
    pub atom: String,
    pub reason: String,
}

impl fmt::Display for AtomRestoreFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.atom, self.reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RestorationError {
    #[error("invalid snapshot: {reason}")]
    Invalid { reason: String },

    #[error("{} atom(s) failed to restore: {}", failures.len(), join(failures))]
    Atoms { failures: Vec<AtomRestoreFailure> },
}

impl RestorationError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }
}

fn join(failures: &[AtomRestoreFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
