//! Error types for the retrieval engine.

use thiserror::Error;

/// Result type alias using RetrievalError.
pub type Result<T> = std::result::Result<T, RetrievalError>;

/// Errors that can occur in the retrieval engine.
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// Collection not found.
    #[error("Collection not found: {name}")]
    CollectionNotFound { name: String },

    /// Collection already exists.
    #[error("Collection already exists: {name}")]
    CollectionExists { name: String },

    /// Point not found.
    #[error("Point not found: {id}")]
    PointNotFound { id: String },

    /// Invalid argument provided.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Vector store error.
    #[error("Store error: {message}")]
    Store { message: String },

    /// Dense or sparse embedding failure.
    #[error("Embedding error: {message}")]
    Embedding { message: String },

    /// Network, HTTP or API failure of an external provider.
    #[error("Provider {provider} failed: {message}")]
    Provider { provider: String, message: String },

    /// Collection schema migration failed.
    #[error("Schema migration failed: {message}")]
    SchemaMigration { message: String },

    /// Malformed provider output.
    #[error("Parse error: {message}")]
    Parse { message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Internal error (unexpected).
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl RetrievalError {
    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Create an embedding error.
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding {
            message: message.into(),
        }
    }

    /// Create a provider error.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a schema migration error.
    pub fn migration(message: impl Into<String>) -> Self {
        Self::SchemaMigration {
            message: message.into(),
        }
    }

    /// Create a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the failure came from an external provider and may be
    /// absorbed by falling through to the next tier.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Provider { .. } | Self::Store { .. } | Self::Embedding { .. })
    }

    /// Stable error code for API responses and logs.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::CollectionNotFound { .. } => "COLLECTION_NOT_FOUND",
            Self::CollectionExists { .. } => "COLLECTION_EXISTS",
            Self::PointNotFound { .. } => "POINT_NOT_FOUND",
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::Store { .. } => "STORE_ERROR",
            Self::Embedding { .. } => "EMBEDDING_ERROR",
            Self::Provider { .. } => "PROVIDER_ERROR",
            Self::SchemaMigration { .. } => "SCHEMA_MIGRATION_ERROR",
            Self::Parse { .. } => "PARSE_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RetrievalError::CollectionNotFound {
            name: "documents".to_string(),
        };
        assert!(err.to_string().contains("documents"));

        let err = RetrievalError::provider("jina", "HTTP 503");
        assert_eq!(err.to_string(), "Provider jina failed: HTTP 503");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            RetrievalError::CollectionNotFound {
                name: "x".to_string()
            }
            .error_code(),
            "COLLECTION_NOT_FOUND"
        );
        assert_eq!(RetrievalError::store("test").error_code(), "STORE_ERROR");
        assert_eq!(
            RetrievalError::migration("test").error_code(),
            "SCHEMA_MIGRATION_ERROR"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(RetrievalError::provider("cohere", "timeout").is_transient());
        assert!(RetrievalError::store("connection reset").is_transient());
        assert!(!RetrievalError::parse("not json").is_transient());
        assert!(!RetrievalError::config("missing key").is_transient());
    }
}
