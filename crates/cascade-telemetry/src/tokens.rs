//! Token estimation for usage accounting

/// Estimate BPE token count for conversational text.
///
/// Uses the larger of two heuristics: ~4 chars per token, and ~0.75 words
/// per token. Short queries are dominated by the word count, long passages
/// by the character count.
pub fn estimate_tokens(text: &str) -> u64 {
    let text = text.trim();
    if text.is_empty() {
        return 0;
    }

    let by_chars = text.chars().count() as f64 / 4.0;
    let by_words = text.split_whitespace().count() as f64 * 4.0 / 3.0;

    by_chars.max(by_words).ceil().max(1.0) as u64
}

/// Sum of [`estimate_tokens`] over several texts
pub fn estimate_tokens_all<'a>(texts: impl IntoIterator<Item = &'a str>) -> u64 {
    texts.into_iter().map(estimate_tokens).sum()
}
