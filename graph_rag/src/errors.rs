use thiserror::Error;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Neo4j error: {0}")]
    Neo4j(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("Malformed generation output: {0}")]
    MalformedOutput(String),

    #[error("Operation not supported by this backend: {0}")]
    Unsupported(String),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] kgrag_config::ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GraphError {
    /// Failures of an external collaborator rather than of the caller's input.
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            GraphError::Neo4j(_)
                | GraphError::Llm(_)
                | GraphError::Embedding(_)
                | GraphError::Http(_)
                | GraphError::Timeout(_)
        )
    }
}

pub type GraphResult<T> = Result<T, GraphError>;
