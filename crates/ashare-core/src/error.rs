//! Unified error taxonomy for the pipeline.
//!
//! Every failure a stage can raise funnels through this single enum so callers
//! can classify it without matching on adapter- or store-specific types.

use std::fmt;

/// Top-level error type shared across every crate in the workspace.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // -- Integrity -----------------------------------------------------
    #[error("duplicate file hash: {hash}")]
    DuplicateFileHash { hash: String },

    #[error("file path {path} already archived with a different hash")]
    FilePathHashMismatch { path: String },

    #[error("company {code} is unknown; research reports require a pre-existing company")]
    UnknownCompany { code: String },

    #[error("concept category {category:?} is not in the closed set")]
    InvalidCategory { category: String },

    #[error("extraction contains no business concepts")]
    NoBusinessConcepts,

    // -- Concurrency -----------------------------------------------------
    #[error("optimistic lock conflict on concept {concept_id} at version {expected_version}")]
    OptimisticLockConflict {
        concept_id: uuid::Uuid,
        expected_version: i32,
    },

    #[error("could not acquire lock for {path} within {timeout_secs}s")]
    LockTimeout { path: String, timeout_secs: u64 },

    // -- Vectorization -----------------------------------------------------
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    // -- Corrupt input -----------------------------------------------------
    #[error("could not decode {path} with any known encoding")]
    UndecodableText { path: String },

    #[error("malformed extracted JSON at {path}: {source}")]
    CorruptExtractedJson {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    // -- Transient-external -----------------------------------------------------
    #[error("external adapter call failed: {message}")]
    TransientExternal { message: String },

    #[error("circuit breaker open for adapter {adapter}")]
    CircuitOpen { adapter: String },

    // -- Fatal / infra -----------------------------------------------------
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

/// Stable, UPPER_SNAKE classification code, stable across releases and used
/// in logs and the final run summary table.
impl Error {
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::DuplicateFileHash { .. } => "DUPLICATE_FILE_HASH",
            Self::FilePathHashMismatch { .. } => "FILE_PATH_HASH_MISMATCH",
            Self::UnknownCompany { .. } => "UNKNOWN_COMPANY",
            Self::InvalidCategory { .. } => "INVALID_CATEGORY",
            Self::NoBusinessConcepts => "NO_BUSINESS_CONCEPTS",
            Self::OptimisticLockConflict { .. } => "OPTIMISTIC_LOCK_CONFLICT",
            Self::LockTimeout { .. } => "LOCK_TIMEOUT",
            Self::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Self::UndecodableText { .. } => "UNDECODABLE_TEXT",
            Self::CorruptExtractedJson { .. } => "CORRUPT_EXTRACTED_JSON",
            Self::TransientExternal { .. } => "TRANSIENT_EXTERNAL",
            Self::CircuitOpen { .. } => "CIRCUIT_OPEN",
            Self::Configuration(_) => "CONFIGURATION",
            Self::Database(_) => "DATABASE",
            Self::Migration(_) => "MIGRATION",
            Self::Io(_) => "IO",
            Self::Json(_) => "JSON",
            Self::Cancelled => "CANCELLED",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Whether the pipeline can make forward progress after this error by
    /// degrading the current unit of work to `skipped`/`failed` and resuming
    /// on a later run, as opposed to the run as a whole needing to abort.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::DuplicateFileHash { .. }
            | Self::FilePathHashMismatch { .. }
            | Self::UnknownCompany { .. }
            | Self::InvalidCategory { .. }
            | Self::NoBusinessConcepts
            | Self::OptimisticLockConflict { .. }
            | Self::LockTimeout { .. }
            | Self::DimensionMismatch { .. }
            | Self::UndecodableText { .. }
            | Self::CorruptExtractedJson { .. }
            | Self::TransientExternal { .. }
            | Self::CircuitOpen { .. }
            | Self::Cancelled => true,
            Self::Configuration(_)
            | Self::Database(_)
            | Self::Migration(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Internal(_) => false,
        }
    }

    /// Coarse category name matching §7's taxonomy, used for the additive
    /// per-category counters in the final run summary.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::TransientExternal { .. } | Self::CircuitOpen { .. } => {
                ErrorCategory::TransientExternal
            }
            Self::DuplicateFileHash { .. }
            | Self::FilePathHashMismatch { .. }
            | Self::UnknownCompany { .. }
            | Self::InvalidCategory { .. }
            | Self::NoBusinessConcepts => ErrorCategory::Integrity,
            Self::OptimisticLockConflict { .. } => ErrorCategory::OptimisticLockConflict,
            Self::DimensionMismatch { .. } => ErrorCategory::DimensionMismatch,
            Self::UndecodableText { .. } | Self::CorruptExtractedJson { .. } => {
                ErrorCategory::CorruptInput
            }
            Self::LockTimeout { .. } | Self::Cancelled => ErrorCategory::Integrity,
            Self::Configuration(_)
            | Self::Database(_)
            | Self::Migration(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Internal(_) => ErrorCategory::Fatal,
        }
    }
}

/// The six error kinds named in the error-handling design, independent of
/// any particular variant's shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    TransientExternal,
    Integrity,
    OptimisticLockConflict,
    DimensionMismatch,
    CorruptInput,
    Fatal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TransientExternal => "transient_external",
            Self::Integrity => "integrity",
            Self::OptimisticLockConflict => "optimistic_lock_conflict",
            Self::DimensionMismatch => "dimension_mismatch",
            Self::CorruptInput => "corrupt_input",
            Self::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
