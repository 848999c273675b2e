use thiserror::Error;

// ── Error codes ─────────────────────────────────────────────────────
//
// Stable, machine-readable identifiers. Clients match on these —
// never on the human-readable message string.

/// Stable error code constants.
///
/// Clients should match on `code` from `{"code": "NOT_FOUND", "message": "..."}`.
/// Codes never change; messages may be reworded.
pub mod error_code {
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const ALREADY_EXISTS: &str = "ALREADY_EXISTS";
    pub const VALIDATION_FAILED: &str = "VALIDATION_FAILED";
    pub const INVALID_TRANSITION: &str = "INVALID_TRANSITION";
    pub const STATUS_MISMATCH: &str = "STATUS_MISMATCH";
    pub const DEPENDENCY_MISSING: &str = "DEPENDENCY_MISSING";
    pub const DEPENDENCY_CYCLE: &str = "DEPENDENCY_CYCLE";
    pub const TERMINAL: &str = "TERMINAL";
    pub const CANNOT_RETRY: &str = "CANNOT_RETRY";
    pub const STORAGE_ERROR: &str = "STORAGE_ERROR";
    pub const INTERNAL: &str = "INTERNAL";
}

// ── ServiceError ────────────────────────────────────────────────────

/// Unified service error type used across all modules.
///
/// Each variant maps to a stable error code (see [`error_code`]). The
/// transport layer (out of tree) turns these into wire responses; inside
/// the core they are matched on directly.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Referenced task does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Duplicate id on create.
    #[error("{0}")]
    Conflict(String),

    /// Input data is invalid.
    #[error("{0}")]
    Validation(String),

    /// The state machine rejected the requested transition.
    #[error("{0}")]
    InvalidTransition(String),

    /// A conditional status update lost the race: the current status no
    /// longer matches the expected pre-image.
    #[error("{0}")]
    StatusMismatch(String),

    /// A declared upstream task is absent.
    #[error("{0}")]
    DependencyMissing(String),

    /// The declared dependency graph contains a cycle.
    #[error("{0}")]
    DependencyCycle(String),

    /// Operation forbidden on a task in a terminal status.
    #[error("{0}")]
    Terminal(String),

    /// Retry requested but the task is not FAILED or its budget is spent.
    #[error("{0}")]
    CannotRetry(String),

    /// Storage backend failure.
    #[error("{0}")]
    Storage(String),

    /// Unexpected internal error.
    #[error("{0}")]
    Internal(String),
}

impl ServiceError {
    /// Stable, machine-readable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            ServiceError::NotFound(_) => error_code::NOT_FOUND,
            ServiceError::Conflict(_) => error_code::ALREADY_EXISTS,
            ServiceError::Validation(_) => error_code::VALIDATION_FAILED,
            ServiceError::InvalidTransition(_) => error_code::INVALID_TRANSITION,
            ServiceError::StatusMismatch(_) => error_code::STATUS_MISMATCH,
            ServiceError::DependencyMissing(_) => error_code::DEPENDENCY_MISSING,
            ServiceError::DependencyCycle(_) => error_code::DEPENDENCY_CYCLE,
            ServiceError::Terminal(_) => error_code::TERMINAL,
            ServiceError::CannotRetry(_) => error_code::CANNOT_RETRY,
            ServiceError::Storage(_) => error_code::STORAGE_ERROR,
            ServiceError::Internal(_) => error_code::INTERNAL,
        }
    }
}
