use rmcp::model::ErrorData;

use crate::graph::CompilationError;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Prompt error: {0}")]
    Prompt(String),

    #[error("Graph compilation failed: {0}")]
    Compilation(#[from] CompilationError),

    #[error("Recursion limit of {0} steps reached without hitting END")]
    RecursionLimit(usize),

    #[error("Graph error: {0}")]
    Graph(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(i64),

    #[error("Write operation rejected: {0}")]
    ReadOnly(String),

    #[error("Invalid parameter: {0}")]
    InvalidParams(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;

impl AgentError {
    pub fn to_mcp_error(&self) -> ErrorData {
        match self {
            AgentError::TransactionNotFound(_)
            | AgentError::ReadOnly(_)
            | AgentError::InvalidParams(_) => ErrorData::invalid_params(self.to_string(), None),
            _ => ErrorData::internal_error(self.to_string(), None),
        }
    }
}
