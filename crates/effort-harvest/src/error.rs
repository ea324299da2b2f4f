//! Error types for the harvest pipeline.

use thiserror::Error;

/// Errors that can occur while previewing or executing a harvest.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// The requested term does not exist in the destination store
    #[error("Term {term_code} not found")]
    TermNotFound { term_code: i32 },

    /// An upstream repository could not be read
    #[error("Source '{source_name}' unavailable: {message}")]
    Source { source_name: String, message: String },

    /// A phase failed while normalizing upstream data
    #[error("Phase '{phase}' failed: {message}")]
    Phase { phase: String, message: String },

    /// The R-course collaborator failed
    #[error("R-course post-processing failed: {message}")]
    PostProcessing { message: String },

    /// The caller cancelled the operation before it committed
    #[error("Harvest cancelled")]
    Cancelled,

    /// Another harvest of the same term holds the term lock
    #[error("A harvest for term {term_code} is already in progress")]
    HarvestInProgress { term_code: i32 },

    /// A rule on the stored data was violated
    #[error("Validation failed: {message}")]
    Validation { message: String },

    /// Invalid configuration value
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// Destination store error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization of audit details failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A thread panicked while holding the store connection
    #[error("Store connection lock poisoned")]
    StorePoisoned,
}

impl HarvestError {
    /// Shorthand for an upstream read failure.
    pub fn source(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        HarvestError::Source {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a validation failure.
    pub fn validation(message: impl Into<String>) -> Self {
        HarvestError::Validation {
            message: message.into(),
        }
    }

    /// Returns true if retrying the harvest later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HarvestError::Source { .. }
                | HarvestError::Cancelled
                | HarvestError::HarvestInProgress { .. }
        )
    }

    /// Returns true for faults that are not part of the harvest's expected
    /// failure modes. These propagate to the caller instead of being folded
    /// into a failed `HarvestResult`.
    pub fn is_unexpected(&self) -> bool {
        matches!(
            self,
            HarvestError::Database(_) | HarvestError::StorePoisoned | HarvestError::Serialization(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_errors_are_retryable() {
        let err = HarvestError::source("registrar", "connection refused");
        assert!(err.is_retryable());
        assert!(!err.is_unexpected());
        assert_eq!(
            err.to_string(),
            "Source 'registrar' unavailable: connection refused"
        );
    }

    #[test]
    fn test_database_errors_are_unexpected() {
        let err = HarvestError::from(rusqlite::Error::InvalidQuery);
        assert!(err.is_unexpected());
        assert!(!err.is_retryable());
    }
}
