//! Error types for registry operations.

use std::fmt;

use redfleet_state::{ApplicationId, StateError};
use redfleet_vault::VaultError;
use serde::Serialize;
use thiserror::Error;

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("no connection available for application {0}")]
    NoConnectionAvailable(ApplicationId),

    #[error("credential vault error: {0}")]
    Encryption(#[from] VaultError),

    #[error("state error: {0}")]
    State(StateError),
}

impl From<StateError> for RegistryError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::NotFound(what) => RegistryError::NotFound(what),
            StateError::Conflict(what) => RegistryError::Conflict(what),
            other => RegistryError::State(other),
        }
    }
}

/// A single rejected field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Every field violation found in one write request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub errors: Vec<FieldError>,
}

impl ValidationError {
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            errors: vec![FieldError {
                field: field.into(),
                message: message.into(),
            }],
        }
    }

    /// Whether `field` is among the rejected fields.
    pub fn has(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validation failed")?;
        for (i, e) in self.errors.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{} {}", e.field, e.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_not_found_and_conflict_are_lifted() {
        let e: RegistryError = StateError::NotFound("application 3".into()).into();
        assert!(matches!(e, RegistryError::NotFound(ref w) if w == "application 3"));

        let e: RegistryError = StateError::Conflict("slug".into()).into();
        assert!(matches!(e, RegistryError::Conflict(_)));

        let e: RegistryError = StateError::Write("disk full".into()).into();
        assert!(matches!(e, RegistryError::State(_)));
    }

    #[test]
    fn validation_error_lists_every_field() {
        let err = ValidationError {
            errors: vec![
                FieldError {
                    field: "port".into(),
                    message: "must be between 1 and 65535".into(),
                },
                FieldError {
                    field: "database".into(),
                    message: "must be between 0 and 15".into(),
                },
            ],
        };
        assert_eq!(
            err.to_string(),
            "validation failed: port must be between 1 and 65535; database must be between 0 and 15"
        );
        assert!(err.has("database"));
        assert!(!err.has("host"));
    }
}
