//! Chunking summarizer - turns a raw record into a summary under a token
//! budget.

use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{Result, SummarizeError};
use crate::pipeline::chunk::{chunk_text, serialize_record, CharRatioTokenizer, Chunk, Tokenizer};
use crate::pipeline::prompts::{prompt_hash, CHUNK_PROMPT, MERGE_PROMPT};
use crate::traits::summarizer::Summarizer;
use crate::types::{
    config::{ChunkConfig, MergeStrategy, ModelConfig},
    record::{RawRecord, Summary},
};

/// Separator placed between chunk summaries when they are combined.
const SUMMARY_SEPARATOR: &str = "\n\n";

/// Splits records into budget-sized chunks and summarizes them.
pub struct ChunkingSummarizer {
    model: Arc<dyn Summarizer>,
    tokenizer: Arc<dyn Tokenizer>,
    config: ChunkConfig,
    chunk_prompt: String,
    merge_prompt: String,
}

impl ChunkingSummarizer {
    pub fn new(model: Arc<dyn Summarizer>, config: ChunkConfig) -> Self {
        Self {
            model,
            tokenizer: Arc::new(CharRatioTokenizer::default()),
            config,
            chunk_prompt: CHUNK_PROMPT.to_string(),
            merge_prompt: MERGE_PROMPT.to_string(),
        }
    }

    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    pub fn with_prompts(mut self, chunk: impl Into<String>, merge: impl Into<String>) -> Self {
        self.chunk_prompt = chunk.into();
        self.merge_prompt = merge.into();
        self
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// Hash stamped on every summary this instance produces.
    pub fn prompt_hash(&self) -> String {
        prompt_hash(&self.chunk_prompt, &self.merge_prompt)
    }

    /// Summarize one record. Any failing chunk fails the whole summary.
    pub async fn summarize(&self, record: &RawRecord) -> Result<Summary> {
        let text = serialize_record(record);
        let budget = self.config.token_budget();
        let chunks = chunk_text(&text, budget, self.tokenizer.as_ref())?;

        debug!(
            target_id = %record.target,
            chunks = chunks.len(),
            budget,
            "summarizing record"
        );

        let chunk_config = self.model_config(&self.chunk_prompt);
        let chunk_summaries = self.call_each(&chunks, &chunk_config).await?;

        let merged = match (chunk_summaries.as_slice(), self.config.merge) {
            ([single], _) => single.clone(),
            (parts, MergeStrategy::Concatenate) => parts.join(SUMMARY_SEPARATOR),
            (parts, MergeStrategy::Hierarchical) => self.reduce(parts.join(SUMMARY_SEPARATOR)).await?,
        };

        info!(
            target_id = %record.target,
            chunks = chunk_summaries.len(),
            "summary ready"
        );

        Ok(Summary::new(
            record.target.clone(),
            chunk_summaries,
            merged,
            self.prompt_hash(),
        ))
    }

    /// Re-summarize combined summaries until they fit one call.
    async fn reduce(&self, mut combined: String) -> Result<String> {
        let merge_config = self.model_config(&self.merge_prompt);
        let budget = self.config.token_budget();
        let max_depth = self.config.max_merge_depth.max(1);

        for depth in 1..=max_depth {
            let chunks = chunk_text(&combined, budget, self.tokenizer.as_ref())?;
            if let [single] = chunks.as_slice() {
                return Ok(self.call(&single.text, &merge_config).await?);
            }

            debug!(depth, chunks = chunks.len(), "merge input over budget, re-chunking");
            let parts = self.call_each(&chunks, &merge_config).await?;
            combined = parts.join(SUMMARY_SEPARATOR);
        }

        Err(SummarizeError::MergeDepth { depth: max_depth }.into())
    }

    /// One call per chunk in index order, each awaited before the next.
    async fn call_each(
        &self,
        chunks: &[Chunk],
        config: &ModelConfig,
    ) -> std::result::Result<Vec<String>, SummarizeError> {
        let mut summaries = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            summaries.push(self.call(&chunk.text, config).await?);
        }
        Ok(summaries)
    }

    async fn call(&self, text: &str, config: &ModelConfig) -> std::result::Result<String, SummarizeError> {
        let summary = self.model.summarize(text, config).await?;
        let summary = summary.trim();
        if summary.is_empty() {
            return Err(SummarizeError::EmptyResponse);
        }
        Ok(summary.to_string())
    }

    fn model_config(&self, prompt: &str) -> ModelConfig {
        let mut config = self.config.model.clone();
        if config.instructions.is_empty() {
            config.instructions = prompt.to_string();
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ChunkError, HarvestError};
    use crate::pipeline::chunk::WordTokenizer;
    use crate::testing::MockSummarizer;
    use crate::types::target::TargetId;

    fn record(experience_items: usize) -> RawRecord {
        let items = (0..experience_items)
            .map(|i| format!("Role number {} at Company {}", i, i))
            .collect::<Vec<_>>();
        RawRecord::new(
            TargetId::new("https://www.linkedin.com/in/ada").unwrap(),
            Default::default(),
        )
        .with_field("name", "Ada Lovelace")
        .with_field("experience", items)
    }

    fn summarizer(model: Arc<MockSummarizer>, budget: usize, merge: MergeStrategy) -> ChunkingSummarizer {
        let config = ChunkConfig::new(ModelConfig::new("test-model", budget)).with_merge(merge);
        ChunkingSummarizer::new(model, config).with_tokenizer(Arc::new(WordTokenizer))
    }

    #[tokio::test]
    async fn test_single_chunk_single_call() {
        let model = Arc::new(MockSummarizer::new());
        let summary = summarizer(model.clone(), 1000, MergeStrategy::Hierarchical)
            .summarize(&record(2))
            .await
            .unwrap();

        assert_eq!(model.call_count(), 1);
        assert_eq!(summary.chunk_summaries.len(), 1);
        assert_eq!(summary.text, summary.chunk_summaries[0]);
        assert_eq!(summary.prompt_hash, crate::pipeline::prompts::default_prompt_hash());
    }

    #[tokio::test]
    async fn test_hierarchical_merge_calls_model_once_more() {
        let model = Arc::new(MockSummarizer::new());
        let summary = summarizer(model.clone(), 12, MergeStrategy::Hierarchical)
            .summarize(&record(6))
            .await
            .unwrap();

        let chunks = summary.chunk_summaries.len();
        assert!(chunks > 1);
        assert_eq!(model.call_count(), chunks + 1);

        let calls = model.calls();
        assert!(calls[..chunks].iter().all(|c| c.instructions == CHUNK_PROMPT));
        assert_eq!(calls[chunks].instructions, MERGE_PROMPT);
        // Every call respected the budget
        assert!(calls.iter().all(|c| WordTokenizer.count(&c.text) <= 12));
    }

    #[tokio::test]
    async fn test_concatenate_joins_in_order() {
        let model = Arc::new(MockSummarizer::new());
        let summary = summarizer(model.clone(), 12, MergeStrategy::Concatenate)
            .summarize(&record(6))
            .await
            .unwrap();

        assert_eq!(model.call_count(), summary.chunk_summaries.len());
        assert_eq!(summary.text, summary.chunk_summaries.join("\n\n"));
    }

    /// Model that records how many calls overlap.
    #[derive(Default)]
    struct OverlapModel {
        in_flight: std::sync::atomic::AtomicUsize,
        peak: std::sync::atomic::AtomicUsize,
        texts: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl Summarizer for OverlapModel {
        async fn summarize(&self, text: &str, _config: &ModelConfig) -> std::result::Result<String, SummarizeError> {
            use std::sync::atomic::Ordering;
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.texts.lock().unwrap().push(text.to_string());
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok("s".to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunks_summarized_one_at_a_time_in_order() {
        let model = Arc::new(OverlapModel::default());
        let config = ChunkConfig::new(ModelConfig::new("test-model", 12))
            .with_merge(MergeStrategy::Hierarchical);
        let summarizer = ChunkingSummarizer::new(model.clone(), config)
            .with_tokenizer(Arc::new(WordTokenizer));

        let record = record(6);
        let summary = summarizer.summarize(&record).await.unwrap();
        assert!(summary.chunk_summaries.len() > 1);
        assert_eq!(model.peak.load(std::sync::atomic::Ordering::SeqCst), 1);

        // Chunk calls arrive in index order and cover the serialized text
        let texts = model.texts.lock().unwrap();
        let chunk_calls = &texts[..summary.chunk_summaries.len()];
        assert_eq!(chunk_calls.concat(), serialize_record(&record));
    }

    #[tokio::test]
    async fn test_one_failing_chunk_fails_everything() {
        let model = Arc::new(MockSummarizer::new().failing_on("Company 4"));
        let err = summarizer(model, 12, MergeStrategy::Hierarchical)
            .summarize(&record(6))
            .await
            .unwrap_err();

        assert!(matches!(err, HarvestError::Summarize(SummarizeError::Service(_))));
    }

    #[tokio::test]
    async fn test_oversized_word_is_budget_exceeded() {
        let model = Arc::new(MockSummarizer::new());
        let record = record(0).with_field("about", "x".repeat(500));
        let summarizer = ChunkingSummarizer::new(
            model.clone(),
            ChunkConfig::new(ModelConfig::new("test-model", 16)),
        )
        .with_tokenizer(Arc::new(CharRatioTokenizer::new(4)));

        let err = summarizer.summarize(&record).await.unwrap_err();
        assert!(matches!(err, HarvestError::Chunk(ChunkError::BudgetExceeded { .. })));
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_non_converging_merge_hits_depth_limit() {
        let model = Arc::new(MockSummarizer::echo());
        let config = ChunkConfig::new(ModelConfig::new("test-model", 12))
            .with_max_merge_depth(2);
        let summarizer =
            ChunkingSummarizer::new(model, config).with_tokenizer(Arc::new(WordTokenizer));

        let err = summarizer.summarize(&record(6)).await.unwrap_err();
        assert!(matches!(
            err,
            HarvestError::Summarize(SummarizeError::MergeDepth { depth: 2 })
        ));
    }

    #[tokio::test]
    async fn test_blank_model_output_is_empty_response() {
        let model = Arc::new(MockSummarizer::new().with_response("   "));
        let err = summarizer(model, 1000, MergeStrategy::Hierarchical)
            .summarize(&record(1))
            .await
            .unwrap_err();

        assert!(matches!(err, HarvestError::Summarize(SummarizeError::EmptyResponse)));
    }
}
