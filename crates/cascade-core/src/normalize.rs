//! Query text canonicalization

/// Turns raw user text into the form every layer evaluates
pub trait Normalizer: Send + Sync {
    fn normalize(&self, raw: &str) -> String;
}

/// Lowercases, collapses whitespace, and strips trailing sentence punctuation
#[derive(Debug, Clone, Copy, Default)]
pub struct CanonicalNormalizer;

const TRAILING_PUNCTUATION: &[char] = &['?', '!', '.', ',', ';', ':', '…'];

impl Normalizer for CanonicalNormalizer {
    fn normalize(&self, raw: &str) -> String {
        let collapsed = raw
            .split_whitespace()
            .map(|word| word.to_lowercase())
            .collect::<Vec<_>>()
            .join(" ");

        collapsed
            .trim_end_matches(|c: char| TRAILING_PUNCTUATION.contains(&c) || c.is_whitespace())
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_normalizer() {
        let n = CanonicalNormalizer;
        assert_eq!(
            n.normalize("What are your return policies?"),
            "what are your return policies"
        );
        assert_eq!(
            n.normalize("  Tell me about the ingredients in the focus gummies. "),
            "tell me about the ingredients in the focus gummies"
        );
        assert_eq!(n.normalize("Where\tis   my\norder?!"), "where is my order");
    }

    #[test]
    fn test_punctuation_only_is_empty() {
        assert_eq!(CanonicalNormalizer.normalize(" ?!. "), "");
        assert_eq!(CanonicalNormalizer.normalize(""), "");
    }
}
