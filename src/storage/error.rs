//! Error taxonomy for the migration engine
//!
//! Every error here is surfaced to the operator. Nothing is retried except
//! lock acquisition, and nothing is repaired automatically.

use super::builder::UnsupportedOperation;
use super::registry::{Direction, Version};

/// Registry construction failures. Fatal: the runner never starts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Registry is empty")]
    Empty,
    #[error("Version {version} must be positive ('{name}')")]
    NonPositive { version: Version, name: String },
    #[error("Duplicate migration version {version} ('{first}' and '{second}')")]
    Duplicate {
        version: Version,
        first: String,
        second: String,
    },
    #[error("Migration '{name}' (v{version}) is registered after v{previous}; versions must ascend")]
    NonMonotonic {
        version: Version,
        previous: Version,
        name: String,
    },
}

/// Failure while executing a transformation against a backend.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("statement #{index} failed: {source} [{statement}]")]
    Statement {
        index: usize,
        statement: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("ledger write failed: {0}")]
    Ledger(#[source] sqlx::Error),
    #[error("transaction failed: {0}")]
    Transaction(#[source] sqlx::Error),
}

impl ExecError {
    /// Number of statements that were executed before the failure, when known.
    pub fn statements_completed(&self) -> Option<usize> {
        match self {
            ExecError::Statement { index, .. } => Some(*index),
            _ => None,
        }
    }
}

/// Why a transformation could not be carried out.
#[derive(Debug, thiserror::Error)]
pub enum TransformationFailure {
    #[error(transparent)]
    Unsupported(#[from] UnsupportedOperation),
    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Top-level error for runner operations
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Ledger inconsistency: {detail}")]
    LedgerInconsistency { detail: String },

    #[error("Migration v{version} '{name}' ({direction}) failed: {source}")]
    Transformation {
        version: Version,
        name: String,
        direction: Direction,
        #[source]
        source: TransformationFailure,
    },

    #[error("Migration lock held by another runner (gave up after {attempts} attempts)")]
    LockContention { attempts: u32 },

    #[error("Unknown migration version {0}")]
    UnknownVersion(Version),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl MigrationError {
    /// Process exit code reported by the `migrate` binary.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrationError::Transformation { .. }
            | MigrationError::UnknownVersion(_)
            | MigrationError::Database(_) => 1,
            MigrationError::LedgerInconsistency { .. } => 2,
            MigrationError::LockContention { .. } => 3,
            MigrationError::Registry(_) => 4,
        }
    }

    /// Version of the failing unit, if the error is tied to one.
    pub fn failing_version(&self) -> Option<Version> {
        match self {
            MigrationError::Transformation { version, .. } => Some(*version),
            MigrationError::UnknownVersion(version) => Some(*version),
            _ => None,
        }
    }

    pub(crate) fn inconsistent(detail: impl Into<String>) -> Self {
        MigrationError::LedgerInconsistency {
            detail: detail.into(),
        }
    }
}
