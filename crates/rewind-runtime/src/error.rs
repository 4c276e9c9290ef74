use thiserror::Error;

use crate::atom::AtomId;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by [`Store`](crate::Store) operations and by atom read and
/// write functions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Computed atoms are read-only.
    #[error("Cannot set value of computed atom")]
    ComputedAtomWrite { atom: AtomId },

    /// An atom was read while its own evaluation was in progress. `cycle`
    /// starts and ends with the revisited atom.
    #[error("circular dependency: {}", format_cycle(.cycle))]
    CircularDependency { cycle: Vec<AtomId> },

    #[error("store has been destroyed")]
    StoreDestroyed,

    /// Failure raised by application code inside a read function.
    #[error("failed to read {atom}: {message}")]
    Read { atom: AtomId, message: String },

    #[error("{0}")]
    Custom(String),
}

impl StoreError {
    #[must_use]
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }

    #[must_use]
    pub fn read(atom: AtomId, message: impl Into<String>) -> Self {
        Self::Read {
            atom,
            message: message.into(),
        }
    }
}

fn format_cycle(cycle: &[AtomId]) -> String {
    cycle
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}
