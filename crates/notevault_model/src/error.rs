//! Error types for the data model.

use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors that can occur while building or mutating items.
#[derive(Debug, Error)]
pub enum ModelError {
    /// A mutation targeted a uuid that is not in the index.
    #[error("mutation on unknown uuid: {uuid}")]
    MutationOnUnknownUuid {
        /// The missing uuid.
        uuid: String,
    },

    /// The mutation kind does not allow the requested change.
    #[error("invalid mutation type {mutation_type}: {message}")]
    InvalidMutationType {
        /// Name of the mutation kind.
        mutation_type: String,
        /// What was attempted.
        message: String,
    },

    /// Content was missing, encrypted, or structurally wrong.
    #[error("invalid content: {0}")]
    InvalidContent(String),

    /// JSON (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ModelError {
    /// Creates an unknown-uuid error.
    pub fn unknown_uuid(uuid: impl Into<String>) -> Self {
        Self::MutationOnUnknownUuid { uuid: uuid.into() }
    }

    /// Creates an invalid-content error.
    pub fn invalid_content(message: impl Into<String>) -> Self {
        Self::InvalidContent(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ModelError::unknown_uuid("abc");
        assert_eq!(err.to_string(), "mutation on unknown uuid: abc");

        let err = ModelError::InvalidMutationType {
            mutation_type: "NonDirtying".into(),
            message: "content changed".into(),
        };
        assert!(err.to_string().contains("NonDirtying"));
    }
}
