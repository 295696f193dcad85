//! Primary error type for Tephra operations.
//!
//! One structured enum for the whole workspace. Commit conflicts are
//! deliberately *not* represented here: a conflicting flush returns
//! `Ok(false)` and the caller reverts and retries.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Primary error type for Tephra operations.
///
/// Structured variants for common cases, recovery hints for user-facing
/// errors.
#[derive(Error, Debug)]
pub enum TephraError {
    // === Store lifecycle ===
    /// Opening, removing, or truncating a store that does not exist.
    #[error("unknown store: '{name}'")]
    StoreNotFound { name: String },

    /// Opening an existing store with an incompatible configuration.
    #[error("store '{name}' configuration mismatch: {detail}")]
    ConfigMismatch { name: String, detail: String },

    // === Environment state ===
    /// Any write against a readonly environment.
    #[error("environment is readonly")]
    ReadonlyViolation,

    /// The environment became inoperative after an unrecoverable commit
    /// failure. Sticky: every subsequent begin or commit fails with the
    /// original commit failure as the cause.
    #[error("environment is inoperative: {cause}")]
    Inoperative { cause: Arc<TephraError> },

    /// Any operation after `close`.
    #[error("environment is closed: '{location}'")]
    Closed { location: PathBuf },

    /// `clear` or a non-forced `close` while transactions are live.
    #[error("environment '{location}' is active: {count} transaction(s) not finished")]
    EnvironmentActive { location: PathBuf, count: usize },

    // === Commit path ===
    /// A transaction flush failed after touching the log; the log's high
    /// address was rolled back.
    #[error("failed to flush transaction: {cause}")]
    FlushFailed { cause: Arc<TephraError> },

    // === Log ===
    /// A log record or segment failed to decode.
    #[error("log is corrupt: {detail}")]
    LogCorrupt { detail: String },

    /// An address that does not point at a record in this log.
    #[error("invalid log address 0x{address:x}")]
    InvalidAddress { address: u64 },

    // === Configuration ===
    /// An unrecognized setting name or a value of the wrong type.
    #[error("invalid setting '{key}': {detail}")]
    InvalidConfig { key: String, detail: String },

    // === I/O ===
    /// Underlying filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TephraError {
    /// Create a [`TephraError::StoreNotFound`].
    pub fn store_not_found(name: impl Into<String>) -> Self {
        Self::StoreNotFound { name: name.into() }
    }

    /// Create a [`TephraError::ConfigMismatch`].
    pub fn config_mismatch(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::ConfigMismatch {
            name: name.into(),
            detail: detail.into(),
        }
    }

    /// Create a [`TephraError::LogCorrupt`].
    pub fn log_corrupt(detail: impl Into<String>) -> Self {
        Self::LogCorrupt {
            detail: detail.into(),
        }
    }

    /// Create a [`TephraError::InvalidConfig`].
    pub fn invalid_config(key: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::InvalidConfig {
            key: key.into(),
            detail: detail.into(),
        }
    }

    /// Whether this error never goes away for the environment that raised
    /// it.
    #[must_use]
    pub const fn is_sticky(&self) -> bool {
        matches!(self, Self::Inoperative { .. } | Self::Closed { .. })
    }

    /// Whether the user can likely fix this without code changes.
    #[must_use]
    pub const fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            Self::StoreNotFound { .. }
                | Self::ConfigMismatch { .. }
                | Self::ReadonlyViolation
                | Self::EnvironmentActive { .. }
                | Self::InvalidConfig { .. }
        )
    }

    /// The root commit failure behind an inoperative or flush-failed error,
    /// if any.
    #[must_use]
    pub fn commit_cause(&self) -> Option<&TephraError> {
        match self {
            Self::Inoperative { cause } | Self::FlushFailed { cause } => Some(cause),
            _ => None,
        }
    }
}

/// Result type alias using [`TephraError`].
pub type Result<T> = std::result::Result<T, TephraError>;
