use thiserror::Error;

/// Main error type for the RAG core
#[derive(Debug, Clone, Error)]
pub enum RagError {
    /// Malformed inputs; never retried, surfaced as a client error
    #[error("Validation error: {0}")]
    Validation(String),

    /// A returned record's tenant id did not match the querying tenant.
    /// Must never occur in normal operation; fail loudly rather than
    /// return the row.
    #[error("Tenant isolation violation: expected tenant '{expected}', found '{found}'")]
    TenantIsolation { expected: String, found: String },

    /// Vector store or model backend unreachable; retryable
    #[error("Backend connectivity error: {0}")]
    BackendConnectivity(String),

    /// Response generation exceeded its timeout
    #[error("Generation timed out after {0}ms")]
    GenerationTimeout(u64),

    /// Embedding generation exceeded its timeout
    #[error("Embedding timed out after {0}ms")]
    EmbeddingTimeout(u64),

    /// Cache backend down or misbehaving; absorbed by cache layers,
    /// never surfaced to callers
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Model backend returned an error response
    #[error("Generation error: {0}")]
    Generation(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RagError {
    /// Check if the error should be retried with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RagError::BackendConnectivity(_) | RagError::Internal(_)
        )
    }

    /// Check if the error came from the cache backend
    pub fn is_cache_error(&self) -> bool {
        matches!(self, RagError::CacheUnavailable(_))
    }

    /// Check if the error is a timeout on a model backend call
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            RagError::GenerationTimeout(_) | RagError::EmbeddingTimeout(_)
        )
    }

    /// Check if the error is a client-side validation failure
    pub fn is_validation_error(&self) -> bool {
        matches!(self, RagError::Validation(_))
    }
}

impl From<serde_json::Error> for RagError {
    fn from(err: serde_json::Error) -> Self {
        RagError::Serialization(err.to_string())
    }
}

/// Result type alias for RAG core operations
pub type RagResult<T> = Result<T, RagError>;
