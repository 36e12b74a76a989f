//! LLM prompts for profile summarization.

use sha2::{Digest, Sha256};

/// System instructions for summarizing one chunk of a profile.
pub const CHUNK_PROMPT: &str = r#"You are given part of a professional profile as `field: value` lines.

Summarize it in plain prose for someone deciding whether to contact this person.
Keep:
- current role, employer and location
- notable past roles and education
- concrete skills, domains and achievements

Do not invent facts. Do not mention that the input was partial.
Return only the summary text."#;

/// System instructions for merging chunk summaries into one.
pub const MERGE_PROMPT: &str = r#"You are given several partial summaries of the same professional profile, in order.

Merge them into one concise summary (at most 150 words).
Remove repetition, keep every distinct fact, and preserve the ordering of roles.
Return only the merged summary text."#;

/// Hash of the prompts currently in use.
///
/// Stored on every summary so stale summaries can be found after prompt
/// changes.
pub fn prompt_hash(chunk_prompt: &str, merge_prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(chunk_prompt.as_bytes());
    hasher.update([0u8]);
    hasher.update(merge_prompt.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Hash of the built-in prompts.
pub fn default_prompt_hash() -> String {
    prompt_hash(CHUNK_PROMPT, MERGE_PROMPT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_hash_is_consistent() {
        let hash1 = default_prompt_hash();
        let hash2 = default_prompt_hash();
        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64); // SHA-256 hex
    }

    #[test]
    fn test_prompt_hash_changes_with_either_prompt() {
        let base = default_prompt_hash();
        assert_ne!(base, prompt_hash("other", MERGE_PROMPT));
        assert_ne!(base, prompt_hash(CHUNK_PROMPT, "other"));
        // Boundary between the two prompts matters
        assert_ne!(prompt_hash("ab", "c"), prompt_hash("a", "bc"));
    }
}
