//! Summarization model trait.

use async_trait::async_trait;

use crate::error::SummarizeError;
use crate::types::config::ModelConfig;

/// Summarization model.
///
/// Implementations wrap a specific LLM provider. Callers guarantee `text`
/// fits within `config.token_budget` as measured by their tokenizer.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str, config: &ModelConfig) -> Result<String, SummarizeError>;
}
