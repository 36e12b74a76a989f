//! Summarization model implementations.
//!
//! Reference implementations of the `Summarizer` trait.

#[cfg(feature = "openai")]
mod openai;

#[cfg(feature = "openai")]
pub use openai::OpenAiSummarizer;
