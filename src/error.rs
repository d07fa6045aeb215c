//! Store error types.
//!
//! DESIGN
//! ======
//! Every store action returns `Result<T, StoreError>`. The auth and profile
//! domains keep their errors separate (each store holds its own last error),
//! but share one shape so callers can match on [`ErrorKind`] uniformly.

use serde::{Deserialize, Serialize};

/// Coarse classification of a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transport failure, timeout, or an unexpected server response.
    NetworkFailure,
    /// The requested record does not exist.
    NotFound,
    /// The platform rejected the input (bad email, duplicate row, weak password).
    ValidationFailure,
    /// Missing, expired, or rejected credentials.
    Unauthorized,
}

impl ErrorKind {
    /// Stable machine-readable code, e.g. for UI lookups.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::NetworkFailure => "E_NETWORK",
            Self::NotFound => "E_NOT_FOUND",
            Self::ValidationFailure => "E_VALIDATION",
            Self::Unauthorized => "E_UNAUTHORIZED",
        }
    }

    /// Classify an HTTP status returned by the platform.
    #[must_use]
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Unauthorized,
            404 => Self::NotFound,
            400 | 409 | 422 => Self::ValidationFailure,
            _ => Self::NetworkFailure,
        }
    }
}

/// Error stored by a store after a failed action and returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("{}: {message}", .kind.code())]
pub struct StoreError {
    pub kind: ErrorKind,
    pub message: String,
}

impl StoreError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NetworkFailure, message)
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationFailure, message)
    }

    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => Self::new(ErrorKind::from_status(status.as_u16()), e.to_string()),
            None => Self::network(e.to_string()),
        }
    }
}

/// Result of an auth-domain action.
pub type AuthResult<T> = Result<T, StoreError>;

/// Result of a profile-domain action.
pub type ProfileResult<T> = Result<T, StoreError>;

/// The store an error or loading flag belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Auth,
    Profile,
}

/// A [`StoreError`] tagged with the domain that produced it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{domain:?} error: {error}")]
pub struct DomainError {
    pub domain: Domain,
    #[source]
    pub error: StoreError,
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
