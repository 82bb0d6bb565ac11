//! Error taxonomy for the registry core.
//!
//! `ResolutionUnsatisfied` is deliberately absent: an unresolved
//! dependency is never an error, it's a `ResolvedDep` value with
//! `status: Unresolved` (see `model.rs`).

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("agent '{0}' not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("transient store error: {0}")]
    Transient(String),
}

impl RegistryError {
    /// HTTP status code this error maps to at the transport boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            RegistryError::Validation(_) => 400,
            RegistryError::NotFound(_) => 404,
            RegistryError::Conflict(_) => 409,
            RegistryError::Transient(_) => 503,
        }
    }
}

/// Every error response carries `{error, timestamp}`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&RegistryError> for ErrorBody {
    fn from(err: &RegistryError) -> Self {
        Self {
            error: err.to_string(),
            timestamp: Utc::now(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;
