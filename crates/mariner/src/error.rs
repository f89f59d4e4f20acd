//! Error types for the migration system
//!
//! Every failure a run or a `create` call can surface is a variant of
//! [`MigrateError`]. Errors raised after execution started carry the ids
//! committed before the failure so an operator knows where to resume.

use std::fmt;

use crate::migrations::state::IllegalTransition;

/// Result type alias for migration operations
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Ids that were committed (and recorded) before a run stopped
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Progress(pub Vec<String>);

impl Progress {
    pub fn ids(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "nothing committed")
        } else {
            write!(f, "committed: {}", self.0.join(", "))
        }
    }
}

/// Error types for migration operations
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Migration lock for {target} is held by another run")]
    LockHeld { target: String },

    #[error("Applied migrations missing from the migrations directory: {}", ids.join(", "))]
    MissingMigration { ids: Vec<String> },

    #[error("Migration {id} was edited after it was applied (recorded checksum {recorded}, file checksum {current})")]
    ChecksumMismatch {
        id: String,
        recorded: String,
        current: String,
    },

    #[error("Migration {id} failed: {message} ({progress})")]
    StoreExecution {
        id: String,
        message: String,
        progress: Progress,
    },

    #[error("Migration {id} failed and may have left partial changes, manual inspection required: {message} ({progress})")]
    UnverifiedState {
        id: String,
        message: String,
        progress: Progress,
    },

    #[error("Migration {id} already exists")]
    DuplicateName { id: String },

    #[error("Migration {id} has no down procedure and cannot be reverted")]
    Irreversible { id: String },

    #[error("Invalid migration {id}: {message}")]
    InvalidMigration { id: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Lifecycle(#[from] IllegalTransition),
}

impl MigrateError {
    /// Short, stable name of the error kind, used in one-line diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            MigrateError::Configuration(_) => "ConfigurationError",
            MigrateError::LockHeld { .. } => "LockHeldError",
            MigrateError::MissingMigration { .. } => "MissingMigrationError",
            MigrateError::ChecksumMismatch { .. } => "ChecksumMismatchError",
            MigrateError::StoreExecution { .. } => "StoreExecutionError",
            MigrateError::UnverifiedState { .. } => "UnverifiedStateError",
            MigrateError::DuplicateName { .. } => "DuplicateNameError",
            MigrateError::Irreversible { .. } => "IrreversibleMigrationError",
            MigrateError::InvalidMigration { .. } => "InvalidMigrationError",
            MigrateError::Io(_) => "IoError",
            MigrateError::Database(_) => "DatabaseError",
            MigrateError::Yaml(_) => "ConfigurationError",
            MigrateError::Lifecycle(_) => "LifecycleError",
        }
    }

    /// The migration id the error is about, when there is one
    pub fn migration_id(&self) -> Option<&str> {
        match self {
            MigrateError::ChecksumMismatch { id, .. }
            | MigrateError::StoreExecution { id, .. }
            | MigrateError::UnverifiedState { id, .. }
            | MigrateError::DuplicateName { id }
            | MigrateError::Irreversible { id }
            | MigrateError::InvalidMigration { id, .. } => Some(id),
            MigrateError::MissingMigration { ids } => ids.first().map(String::as_str),
            MigrateError::Lifecycle(t) => Some(&t.id),
            _ => None,
        }
    }

    /// Committed progress attached to execution failures
    pub fn progress(&self) -> Option<&Progress> {
        match self {
            MigrateError::StoreExecution { progress, .. }
            | MigrateError::UnverifiedState { progress, .. } => Some(progress),
            _ => None,
        }
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        MigrateError::Configuration(msg.into())
    }
}
