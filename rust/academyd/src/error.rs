use thiserror::Error;

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Failure taxonomy shared by every operation. The first failure aborts the
/// operation and is reported to the caller as-is.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Missing, malformed, or rejected bearer credential.
    #[error("{0}")]
    Unauthorized(String),

    /// Valid credential, insufficient role.
    #[error("{0}")]
    Forbidden(String),

    /// Missing or malformed fields, or a business-rule violation.
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    NotFound(String),

    /// Uniqueness violation, including attendance already marked twice.
    #[error("{0}")]
    Conflict(String),

    /// An identifier generator ran out of attempts. Retryable.
    #[error("{0}")]
    GenerationExhausted(String),

    /// Identity provider, object store, or relational store failed unexpectedly.
    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("{0}")]
    MethodNotAllowed(String),

    /// Request body over the configured limit.
    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Unauthorized(_) => "unauthorized",
            ServiceError::Forbidden(_) => "forbidden",
            ServiceError::InvalidInput(_) => "invalid_input",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::Conflict(_) => "conflict",
            ServiceError::GenerationExhausted(_) => "generation_exhausted",
            ServiceError::Upstream(_) => "upstream_failure",
            ServiceError::MethodNotAllowed(_) => "method_not_allowed",
            ServiceError::PayloadTooLarge(_) => "payload_too_large",
            ServiceError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            ServiceError::Unauthorized(_) => 401,
            ServiceError::Forbidden(_) => 403,
            ServiceError::InvalidInput(_) => 400,
            ServiceError::NotFound(_) => 404,
            ServiceError::Conflict(_) => 409,
            ServiceError::GenerationExhausted(_) => 503,
            ServiceError::Upstream(_) => 500,
            ServiceError::MethodNotAllowed(_) => 405,
            ServiceError::PayloadTooLarge(_) => 413,
            ServiceError::Internal(_) => 500,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        ServiceError::InvalidInput(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ServiceError::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ServiceError::Conflict(message.into())
    }
}

/// True when the error is a SQLite UNIQUE / PRIMARY KEY violation.
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == rusqlite::ErrorCode::ConstraintViolation
                && matches!(
                    e.extended_code,
                    rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                        | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                )
        }
        _ => false,
    }
}

impl From<rusqlite::Error> for ServiceError {
    fn from(err: rusqlite::Error) -> Self {
        if is_unique_violation(&err) {
            ServiceError::Conflict(err.to_string())
        } else {
            ServiceError::Upstream(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::InvalidInput(format!("invalid request body: {err}"))
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(err: std::io::Error) -> Self {
        ServiceError::Upstream(err.to_string())
    }
}
