//! OpenAI implementation of the Summarizer trait.
//!
//! # Example
//!
//! ```rust,ignore
//! use harvester::ai::OpenAiSummarizer;
//!
//! let model = OpenAiSummarizer::from_env()?;
//! let summarizer = ChunkingSummarizer::new(Arc::new(model), ChunkConfig::default());
//! ```

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::SummarizeError;
use crate::security::SecretString;
use crate::traits::summarizer::Summarizer;
use crate::types::config::ModelConfig;

/// Chat-completions summarizer.
///
/// The model name and temperature come from the per-call [`ModelConfig`].
#[derive(Clone)]
pub struct OpenAiSummarizer {
    client: Client,
    api_key: SecretString,
    base_url: String,
    max_output_tokens: u32,
}

impl OpenAiSummarizer {
    pub fn new(api_key: impl Into<SecretString>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            max_output_tokens: 512,
        }
    }

    /// Create from environment variable `OPENAI_API_KEY`.
    pub fn from_env() -> Result<Self, SummarizeError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| SummarizeError::Config("OPENAI_API_KEY not set".into()))?;
        Ok(Self::new(api_key))
    }

    /// Set a custom base URL (for Azure, proxies, etc.).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = tokens;
        self
    }
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(&self, text: &str, config: &ModelConfig) -> Result<String, SummarizeError> {
        let mut messages = Vec::with_capacity(2);
        if !config.instructions.is_empty() {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: config.instructions.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: text.to_string(),
        });

        let request = ChatRequest {
            model: config.model.clone(),
            messages,
            temperature: Some(config.temperature),
            max_tokens: Some(self.max_output_tokens),
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key.expose()))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| SummarizeError::Service(Box::new(e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(SummarizeError::Service(
                format!("OpenAI API error {}: {}", status, error_text).into(),
            ));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| SummarizeError::Service(Box::new(e)))?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(SummarizeError::EmptyResponse)
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}
