//! Record serialization and budget-aware chunking.
//!
//! Chunks are contiguous slices of the serialized text: concatenating them
//! in index order reproduces the text byte for byte. Splitting prefers the
//! coarsest boundary that works, in this order:
//!
//! 1. field boundaries
//! 2. line and sentence boundaries
//! 3. word boundaries
//!
//! A single word that exceeds the budget on its own is an error, never a
//! silent truncation.

use crate::error::ChunkError;
use crate::types::record::{FieldValue, RawRecord};

/// Token counter matching the summarization model's notion of length.
///
/// Counts must be subadditive: the count of `a + b` never exceeds the
/// count of `a` plus the count of `b`.
pub trait Tokenizer: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// One token per whitespace-separated word.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordTokenizer;

impl Tokenizer for WordTokenizer {
    fn count(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

/// Approximation used for BPE models: one token per N characters.
#[derive(Debug, Clone, Copy)]
pub struct CharRatioTokenizer {
    chars_per_token: usize,
}

impl CharRatioTokenizer {
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }
}

impl Default for CharRatioTokenizer {
    fn default() -> Self {
        Self::new(4)
    }
}

impl Tokenizer for CharRatioTokenizer {
    fn count(&self, text: &str) -> usize {
        text.chars().count().div_ceil(self.chars_per_token)
    }
}

/// An ordered slice of a record's serialized text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
    pub tokens: usize,
}

/// Serialize a record's fields in their stable order.
///
/// Scalars become `name: value`, lists become `name:` followed by one
/// `- item` line per element.
pub fn serialize_record(record: &RawRecord) -> String {
    let mut out = String::new();
    for (name, value) in &record.fields {
        match value {
            FieldValue::Text(text) => {
                out.push_str(name);
                out.push_str(": ");
                out.push_str(text.trim());
                out.push('\n');
            }
            FieldValue::List(items) => {
                out.push_str(name);
                out.push_str(":\n");
                for item in items {
                    out.push_str("- ");
                    out.push_str(item.trim());
                    out.push('\n');
                }
            }
        }
    }
    out
}

/// Split `text` into chunks of at most `budget` tokens each.
pub fn chunk_text(
    text: &str,
    budget: usize,
    tokenizer: &dyn Tokenizer,
) -> Result<Vec<Chunk>, ChunkError> {
    if text.trim().is_empty() {
        return Err(ChunkError::Empty);
    }

    let mut packer = Packer {
        text,
        budget,
        tokenizer,
        ranges: Vec::new(),
        start: 0,
        end: 0,
        open_tokens: 0,
    };
    packer.push(0, text.len(), Level::Document)?;
    packer.flush();

    Ok(packer
        .ranges
        .into_iter()
        .enumerate()
        .map(|(index, (start, end))| {
            let text = &text[start..end];
            Chunk {
                index,
                text: text.to_string(),
                tokens: tokenizer.count(text),
            }
        })
        .collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Document,
    Field,
    Sentence,
    Word,
}

impl Level {
    fn finer(self) -> Option<Self> {
        match self {
            Self::Document => Some(Self::Field),
            Self::Field => Some(Self::Sentence),
            Self::Sentence => Some(Self::Word),
            Self::Word => None,
        }
    }
}

/// Greedy packer over contiguous byte ranges.
///
/// Pieces arrive in order and always start where the open range ends, so
/// the open range can be extended without copying. Each piece is counted
/// once; the open range is recounted only when the running sum overflows.
struct Packer<'a> {
    text: &'a str,
    budget: usize,
    tokenizer: &'a dyn Tokenizer,
    ranges: Vec<(usize, usize)>,
    start: usize,
    end: usize,
    open_tokens: usize,
}

impl Packer<'_> {
    fn push(&mut self, from: usize, to: usize, level: Level) -> Result<(), ChunkError> {
        debug_assert_eq!(from, self.end);
        let tokens = self.tokenizer.count(&self.text[from..to]);

        if self.open_tokens + tokens <= self.budget {
            self.extend(to, self.open_tokens + tokens);
            return Ok(());
        }

        // The running sum only bounds the open range from above
        if self.start < self.end {
            let exact = self.tokenizer.count(&self.text[self.start..to]);
            if exact <= self.budget {
                self.extend(to, exact);
                return Ok(());
            }
            self.flush();
        }
        if tokens <= self.budget {
            self.extend(to, tokens);
            return Ok(());
        }

        let Some(finer) = level.finer() else {
            let unit = &self.text[from..to];
            return Err(ChunkError::BudgetExceeded {
                tokens,
                budget: self.budget,
                preview: unit.chars().take(40).collect(),
            });
        };

        for (piece_from, piece_to) in split_pieces(self.text, from, to, finer) {
            self.push(piece_from, piece_to, finer)?;
        }
        Ok(())
    }

    fn extend(&mut self, to: usize, open_tokens: usize) {
        self.end = to;
        self.open_tokens = open_tokens;
    }

    fn flush(&mut self) {
        if self.start < self.end {
            self.ranges.push((self.start, self.end));
        }
        self.start = self.end;
        self.open_tokens = 0;
    }
}

/// Cut `text[from..to]` into contiguous pieces at `level` boundaries.
fn split_pieces(text: &str, from: usize, to: usize, level: Level) -> Vec<(usize, usize)> {
    let slice = &text[from..to];
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut prev: Option<char> = None;
    let mut prev2: Option<char> = None;

    for (i, c) in slice.char_indices() {
        let boundary = i > start
            && match level {
                Level::Document => false,
                // List items stay with their field header
                Level::Field => prev == Some('\n') && !slice[i..].starts_with("- "),
                Level::Sentence => {
                    prev == Some('\n')
                        || (prev.is_some_and(char::is_whitespace)
                            && matches!(prev2, Some('.' | '!' | '?')))
                }
                Level::Word => prev.is_some_and(char::is_whitespace) && !c.is_whitespace(),
            };

        if boundary {
            pieces.push((from + start, from + i));
            start = i;
        }
        prev2 = prev;
        prev = Some(c);
    }

    if start < slice.len() {
        pieces.push((from + start, to));
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::target::TargetId;
    use proptest::prelude::*;

    fn joined(chunks: &[Chunk]) -> String {
        chunks.iter().map(|c| c.text.as_str()).collect()
    }

    fn record() -> RawRecord {
        RawRecord::new(
            TargetId::new("https://www.linkedin.com/in/ada").unwrap(),
            Default::default(),
        )
        .with_field("name", "Ada Lovelace")
        .with_field("headline", "Analyst at Babbage & Co")
        .with_field(
            "experience",
            vec![
                "Analytical Engine notes".to_string(),
                "Translator of Menabrea".to_string(),
            ],
        )
    }

    #[test]
    fn test_serialize_record_format() {
        let text = serialize_record(&record());
        assert_eq!(
            text,
            "name: Ada Lovelace\n\
             headline: Analyst at Babbage & Co\n\
             experience:\n\
             - Analytical Engine notes\n\
             - Translator of Menabrea\n"
        );
    }

    #[test]
    fn test_small_text_is_one_chunk() {
        let text = serialize_record(&record());
        let chunks = chunk_text(&text, 100, &WordTokenizer).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
        assert_eq!(chunks[0].index, 0);
    }

    #[test]
    fn test_splits_on_field_boundaries_first() {
        let text = serialize_record(&record());
        let chunks = chunk_text(&text, 8, &WordTokenizer).unwrap();

        assert!(chunks.len() > 1);
        assert_eq!(joined(&chunks), text);
        for chunk in &chunks {
            assert!(chunk.tokens <= 8);
            assert!(chunk.text.ends_with('\n'), "split mid-field: {:?}", chunk.text);
        }
        // The list stays attached to its header
        assert!(chunks.iter().any(|c| c.text.starts_with("experience:\n- ")));
    }

    #[test]
    fn test_falls_back_to_words() {
        let text = "about: one two three four five six seven eight nine ten\n";
        let chunks = chunk_text(text, 3, &WordTokenizer).unwrap();

        assert_eq!(joined(&chunks), text);
        assert!(chunks.iter().all(|c| c.tokens <= 3));
        assert_eq!(chunks.len(), 4);
    }

    #[test]
    fn test_sentence_boundaries() {
        let text = "about: First sentence here. Second one follows. Third.\n";
        let chunks = chunk_text(text, 4, &WordTokenizer).unwrap();

        assert_eq!(joined(&chunks), text);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "about: First sentence here. ");
        assert_eq!(chunks[1].text, "Second one follows. Third.\n");
    }

    #[test]
    fn test_oversized_word_is_budget_exceeded() {
        let word = "x".repeat(100);
        let text = format!("name: {}\n", word);
        let err = chunk_text(&text, 10, &CharRatioTokenizer::new(4)).unwrap_err();

        match err {
            ChunkError::BudgetExceeded { tokens, budget, preview } => {
                assert!(tokens > budget);
                assert!(preview.starts_with("xxxx"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_empty_text() {
        assert!(matches!(
            chunk_text("  \n ", 10, &WordTokenizer),
            Err(ChunkError::Empty)
        ));
    }

    #[test]
    fn test_char_ratio_rounds_up() {
        let tokenizer = CharRatioTokenizer::new(4);
        assert_eq!(tokenizer.count(""), 0);
        assert_eq!(tokenizer.count("abcd"), 1);
        assert_eq!(tokenizer.count("abcde"), 2);
    }

    /// Word counts, plus the number of bytes handed to `count`.
    #[derive(Default)]
    struct ScanCounter {
        scanned: std::sync::atomic::AtomicUsize,
    }

    impl Tokenizer for ScanCounter {
        fn count(&self, text: &str) -> usize {
            self.scanned
                .fetch_add(text.len(), std::sync::atomic::Ordering::SeqCst);
            WordTokenizer.count(text)
        }
    }

    #[test]
    fn test_long_field_is_scanned_a_bounded_number_of_times() {
        let words: Vec<String> = (0..2000).map(|i| format!("w{i}")).collect();
        let text = format!("about: {}\n", words.join(" "));
        let tokenizer = ScanCounter::default();

        let chunks = chunk_text(&text, 50, &tokenizer).unwrap();

        assert_eq!(joined(&chunks), text);
        assert!(chunks.iter().all(|c| c.tokens <= 50));
        // Chunk construction recounts each chunk once more
        let scanned = tokenizer.scanned.load(std::sync::atomic::Ordering::SeqCst);
        assert!(
            scanned <= 8 * text.len(),
            "scanned {scanned} bytes for {} bytes of text",
            text.len()
        );
    }

    fn profile_text() -> impl Strategy<Value = String> {
        let word = "[a-z]{1,8}";
        let sep = prop_oneof![Just(" "), Just("\n"), Just(". "), Just("\n- ")];
        prop::collection::vec((word, sep), 1..60).prop_map(|parts| {
            parts
                .into_iter()
                .map(|(w, s)| format!("{}{}", w, s))
                .collect::<String>()
        })
    }

    proptest! {
        #[test]
        fn prop_chunks_reassemble_exactly(text in profile_text(), budget in 3usize..40) {
            let chunks = chunk_text(&text, budget, &WordTokenizer).unwrap();
            prop_assert_eq!(joined(&chunks), text);
            for (i, chunk) in chunks.iter().enumerate() {
                prop_assert_eq!(chunk.index, i);
                prop_assert!(chunk.tokens <= budget);
            }
        }

        #[test]
        fn prop_char_budget_respected(text in profile_text(), budget in 4usize..64) {
            let tokenizer = CharRatioTokenizer::new(4);
            let chunks = chunk_text(&text, budget, &tokenizer).unwrap();
            prop_assert_eq!(joined(&chunks), text);
            prop_assert!(chunks.iter().all(|c| c.tokens <= budget));
        }
    }
}
