//! Error types and handling
//!
//! This module provides the error types used throughout the Trellis engine.
//! All errors implement the `ErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.
//!
//! # Error Categories
//!
//! - **Configuration**: a required property (path, verb, sender) is unset, or
//!   the configuration file is unreadable
//! - **Type/range**: a typed property received a value it cannot hold
//! - **Validation**: desired state names a field the controller does not have,
//!   or a value breaks a field rule; raised while planning, before any write
//! - **Controller response**: a mandatory read came back unsuccessful
//! - **Network**: the request sender could not reach the controller
//!
//! Exhausted-retry submission failures are *not* errors. They are recorded in
//! the outcome report and surface as `failed = true`.

use thiserror::Error;

/// Trait for Trellis error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information. All engine errors implement this trait.
pub trait ErrorExt {
    /// Returns a user-friendly hint for the error
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried as-is. Non-recoverable errors need the
    /// caller to change configuration or desired state first.
    fn is_recoverable(&self) -> bool;
}

/// Main reconciliation error type
///
/// # Examples
///
/// ```
/// use sdk::errors::{ErrorExt, ReconcileError};
///
/// let error = ReconcileError::UnknownField {
///     resource: "F1".to_string(),
///     field: "BGP_ASN".to_string(),
/// };
/// assert!(!error.is_recoverable());
///
/// let transient = ReconcileError::Network("connection refused".to_string());
/// assert!(transient.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum ReconcileError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Type/range errors
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Unsupported verb: {verb}")]
    UnsupportedVerb { verb: String },

    // Validation errors
    #[error("Resource {resource}: field {field} does not exist on the controller")]
    UnknownField { resource: String, field: String },

    #[error("Validation error: {0}")]
    Validation(String),

    // Controller response errors
    #[error("Controller returned an unsuccessful response for {path}: {message}")]
    ControllerResponse { path: String, message: String },

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    // Payload errors
    #[error("Parse error: {0}")]
    Parse(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReconcileError {
    /// Shorthand for a type/range error on a named field
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl ErrorExt for ReconcileError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file and request setup",
            Self::InvalidValue { .. } => "A setting has the wrong type or is out of range",
            Self::UnsupportedVerb { .. } => "Only GET, POST, PUT and DELETE are supported",
            Self::UnknownField { .. } => {
                "Desired state names a field the controller does not know. Check spelling"
            }
            Self::Validation(_) => "Desired state failed validation. Fix it and run again",
            Self::ControllerResponse { .. } => {
                "The controller rejected a required read. Check controller health"
            }
            Self::Network(_) => "Network operation failed. Check your connection",
            Self::Parse(_) => "The controller returned data in an unexpected shape",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::Network(_) | Self::ControllerResponse { .. } | Self::Io(_) => true,

            // Everything else needs a change on the caller's side
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_field_message_names_field() {
        let error = ReconcileError::UnknownField {
            resource: "F1".to_string(),
            field: "REPLICATION_MODE".to_string(),
        };
        let text = error.to_string();
        assert!(text.contains("F1"));
        assert!(text.contains("REPLICATION_MODE"));
    }

    #[test]
    fn test_recoverability() {
        assert!(ReconcileError::Network("timeout".into()).is_recoverable());
        assert!(!ReconcileError::Config("path is not set".into()).is_recoverable());
        assert!(!ReconcileError::invalid_value("timeout", "must be at least 1").is_recoverable());
        assert!(!ReconcileError::Validation("duplicate".into()).is_recoverable());
    }

    #[test]
    fn test_every_error_has_hint() {
        let errors = vec![
            ReconcileError::Config("x".into()),
            ReconcileError::invalid_value("check_mode", "not a boolean"),
            ReconcileError::UnsupportedVerb {
                verb: "PATCH".into(),
            },
            ReconcileError::Validation("x".into()),
            ReconcileError::ControllerResponse {
                path: "/fabrics".into(),
                message: "Internal Server Error".into(),
            },
            ReconcileError::Parse("x".into()),
        ];
        for error in errors {
            assert!(!error.user_hint().is_empty());
        }
    }
}
