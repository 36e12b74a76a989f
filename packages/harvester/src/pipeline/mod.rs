//! Acquisition pipeline.
//!
//! - [`chunk`] - record serialization and budget-aware chunking
//! - [`prompts`] - summarization prompts and their hash
//! - [`summarize`] - chunking summarizer with hierarchical merge
//! - [`orchestrator`] - drives a worklist to terminal cache states

pub mod chunk;
pub mod orchestrator;
pub mod prompts;
pub mod summarize;

pub use chunk::{chunk_text, serialize_record, CharRatioTokenizer, Chunk, Tokenizer, WordTokenizer};
pub use orchestrator::{Orchestrator, RunReport, TargetOutcome};
pub use prompts::{default_prompt_hash, prompt_hash, CHUNK_PROMPT, MERGE_PROMPT};
pub use summarize::ChunkingSummarizer;
