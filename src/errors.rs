//! Typed error definitions for treemove.
//! Provides a small set of well-known failure modes for better logs and tests.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum RelocateError {
    #[error("Source path not found: {0}")]
    MissingSource(PathBuf),

    #[error("Destination parent not found: {0}")]
    MissingDestinationParent(PathBuf),

    // Field is deliberately not named `source`: that name is thiserror's
    // error-chain hook and PathBuf is not an error type.
    #[error("Destination '{destination}' is equal to or nested under source '{source_path}'")]
    DestinationInsideSource {
        source_path: PathBuf,
        destination: PathBuf,
    },

    #[error("Source path has no final name segment: {0}")]
    SourceWithoutName(PathBuf),

    #[error("Insufficient privileges on {path}: the {set} privilege set is required")]
    InsufficientPrivileges { path: PathBuf, set: &'static str },

    #[error("Relocation halted before completion")]
    Interrupted,

    #[error("Failed to start the pipeline driver: {0}")]
    Spawn(#[from] io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RelocateError {
    /// Stable short code for structured log fields and scripted consumers.
    pub fn code(&self) -> &'static str {
        match self {
            RelocateError::MissingSource(_) => "missing_source",
            RelocateError::MissingDestinationParent(_) => "missing_destination_parent",
            RelocateError::DestinationInsideSource { .. } => "destination_inside_source",
            RelocateError::SourceWithoutName(_) => "source_without_name",
            RelocateError::InsufficientPrivileges { .. } => "insufficient_privileges",
            RelocateError::Interrupted => "interrupted",
            RelocateError::Spawn(_) => "spawn_failed",
            RelocateError::Store(_) => "store_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn nested_destination_error_is_a_leaf() {
        let err = RelocateError::DestinationInsideSource {
            source_path: PathBuf::from("/x/a"),
            destination: PathBuf::from("/x/a/b"),
        };
        assert_eq!(err.code(), "destination_inside_source");
        // Both fields are plain paths; there is no wrapped cause.
        assert!(err.source().is_none());
        assert!(err.to_string().contains("nested under source '/x/a'"));
    }
}
