//! Error types for the lead form service.

use std::fmt;

use serde::Serialize;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Enrichment error: {0}")]
    Enrichment(#[from] EnrichmentError),

    #[error("Submission error: {0}")]
    Submission(#[from] SubmissionError),

    #[error("Form error: {0}")]
    Form(#[from] FormError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Session store errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Missing or expired. Clients treat this as "start fresh".
    #[error("Session {id} not found or expired")]
    NotFound { id: String },

    /// The session kept changing underneath a read-modify-write.
    #[error("Session {id} was modified concurrently, please retry")]
    Conflict { id: String },

    #[error("Session storage failed: {0}")]
    Storage(#[from] DatabaseError),
}

/// A single field that failed a format or presence rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// All field failures collected for one validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors {
    pub fields: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.fields.push(FieldError::new(field, message));
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Message for a given field, if it failed.
    pub fn message_for(&self, field: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.field == field)
            .map(|f| f.message.as_str())
    }

    /// `Ok(())` when nothing was collected, otherwise `Err(self)`.
    pub fn into_result(self) -> std::result::Result<(), ValidationErrors> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .fields
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

/// Enrichment errors. None of these block the form workflow.
#[derive(Debug, thiserror::Error)]
pub enum EnrichmentError {
    #[error("Unable to verify business at this time: {reason}")]
    Unavailable { reason: String },

    #[error("Business name and ZIP code are required for enrichment")]
    MissingInput {
        business_name: bool,
        zip_code: bool,
    },

    #[error("Enrichment already in progress for session {session_id}")]
    InProgress { session_id: String },
}

/// Step sequencing errors.
#[derive(Debug, thiserror::Error)]
pub enum FormError {
    #[error("Step {step} requires earlier steps to be completed (missing: {})", .missing.join(", "))]
    OutOfOrder { step: u8, missing: Vec<String> },

    #[error("Cannot move from step {from} to step {to}")]
    InvalidTransition { from: u8, to: u8 },

    #[error("Unknown form step: {0}")]
    UnknownStep(u8),
}

/// Final submission errors.
#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("All form steps must be completed (missing: {})", .missing.join(", "))]
    Incomplete { missing: Vec<String> },

    #[error("Lead data is invalid: {0}")]
    Invalid(ValidationErrors),

    #[error("An application for {business_name} with {email} already exists")]
    Duplicate {
        email: String,
        business_name: String,
    },

    #[error("Failed to store lead: {0}")]
    Storage(DatabaseError),
}

impl From<DatabaseError> for SubmissionError {
    fn from(e: DatabaseError) -> Self {
        Self::Storage(e)
    }
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_display_lists_fields() {
        let mut errors = ValidationErrors::default();
        errors.push("email", "Invalid email address");
        errors.push("phone", "Phone number is required");
        let text = errors.to_string();
        assert!(text.contains("email: Invalid email address"));
        assert!(text.contains("phone: Phone number is required"));
        assert_eq!(errors.message_for("phone"), Some("Phone number is required"));
        assert!(errors.message_for("first_name").is_none());
    }

    #[test]
    fn empty_validation_errors_is_ok() {
        assert!(ValidationErrors::default().into_result().is_ok());
    }

    #[test]
    fn incomplete_lists_missing_steps() {
        let err = SubmissionError::Incomplete {
            missing: vec!["step2".into(), "step3".into()],
        };
        assert_eq!(
            err.to_string(),
            "All form steps must be completed (missing: step2, step3)"
        );
    }
}
