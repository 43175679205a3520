//! Typed failures that callers need to tell apart.
//!
//! Everything else travels as `anyhow::Error`. These variants are wrapped
//! into it and recovered with `downcast_ref` by the HTTP layer and the CLI.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("LLM unavailable: {0}")]
    LlmUnavailable(String),
}

impl PipelineError {
    pub fn prd_not_found(id: &str) -> Self {
        Self::NotFound(format!("PRD {}", id))
    }

    pub fn chunk_not_found(id: &str) -> Self {
        Self::NotFound(format!("Chunk {}", id))
    }
}

/// Recover a [`PipelineError`] from anywhere in an error chain.
pub fn classify(err: &anyhow::Error) -> Option<&PipelineError> {
    err.chain().find_map(|e| e.downcast_ref::<PipelineError>())
}
