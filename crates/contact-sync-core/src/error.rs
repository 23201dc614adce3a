//! Validation errors shared by the core model.

use thiserror::Error;

/// A model value failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field was empty or blank.
    #[error("{field} cannot be empty")]
    EmptyField { field: &'static str },

    /// A field had an invalid value.
    #[error("invalid {field}: {message}")]
    InvalidField {
        field: &'static str,
        message: String,
    },

    /// An unknown contact kind was supplied.
    #[error("unknown contact kind: {value}")]
    UnknownContactKind { value: String },
}

impl ValidationError {
    /// Create an empty-field error.
    #[must_use]
    pub fn empty(field: &'static str) -> Self {
        Self::EmptyField { field }
    }

    /// Create an invalid-field error.
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            message: message.into(),
        }
    }
}
