use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("LLM parsing error: {0}")]
    LLMParsing(String),
    #[error("Embedding error: {0}")]
    Embedding(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Ingestion Processing error: {0}")]
    Processing(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}
