//! Top-level error type for the reading pipeline.

use crate::backend::BackendAttempt;
use crate::config::ConfigError;
use crate::knowledge_base::KnowledgeBaseError;
use crate::spread::ValidationError;
use thiserror::Error;

/// Errors surfaced to callers of [`crate::service::ReadingService`].
///
/// A blocked reading is not an error; it comes back as a normal response
/// carrying a safe fallback message.
#[derive(Debug, Error)]
pub enum ReadingError {
    #[error("Invalid spread: {0}")]
    Validation(#[from] ValidationError),

    #[error("Every backend failed ({} attempts)", attempts.len())]
    BackendsExhausted { attempts: Vec<BackendAttempt> },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Knowledge base error: {0}")]
    KnowledgeBase(#[from] KnowledgeBaseError),

    #[error("Streaming error: {0}")]
    Streaming(String),
}

pub type Result<T> = std::result::Result<T, ReadingError>;
