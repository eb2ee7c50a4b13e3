//! Regex matching with a compiled-set cache

use cascade_core::{EvaluationError, PatternSet, RegexMatchCapability};
use regex::{RegexSet, RegexSetBuilder};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Case-insensitive matcher; each pattern set compiles once into a [`RegexSet`]
#[derive(Debug, Default)]
pub struct RegexMatcher {
    compiled: RwLock<HashMap<Vec<String>, Arc<RegexSet>>>,
}

impl RegexMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn compiled(&self, set: &PatternSet) -> Result<Arc<RegexSet>, regex::Error> {
        if let Ok(cache) = self.compiled.read() {
            if let Some(hit) = cache.get(&set.patterns) {
                return Ok(Arc::clone(hit));
            }
        }

        let regex = Arc::new(
            RegexSetBuilder::new(&set.patterns)
                .case_insensitive(true)
                .build()?,
        );
        let mut cache = match self.compiled.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        cache.insert(set.patterns.clone(), Arc::clone(&regex));
        Ok(regex)
    }
}

impl RegexMatchCapability for RegexMatcher {
    fn validate(&self, set: &PatternSet) -> Result<(), String> {
        self.compiled(set).map(|_| ()).map_err(|e| e.to_string())
    }

    fn is_match(&self, set: &PatternSet, text: &str) -> Result<bool, EvaluationError> {
        let regex = self
            .compiled(set)
            .map_err(|e| EvaluationError::CapabilityUnavailable(e.to_string()))?;
        Ok(regex.is_match(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_any_pattern_in_set() {
        let matcher = RegexMatcher::new();
        let set = PatternSet::new("returns", &[r"\brefund\b", r"\breturns?\b"], 0.6);

        assert!(matcher.is_match(&set, "what is your return policy").unwrap());
        assert!(matcher.is_match(&set, "I want a REFUND").unwrap());
        assert!(!matcher.is_match(&set, "returning customer").unwrap());
    }

    #[test]
    fn test_validate_rejects_bad_pattern() {
        let matcher = RegexMatcher::new();
        let bad = PatternSet::new("broken", &[r"(unclosed"], 1.0);
        assert!(matcher.validate(&bad).is_err());
        assert!(matches!(
            matcher.is_match(&bad, "anything"),
            Err(EvaluationError::CapabilityUnavailable(_))
        ));
    }

    #[test]
    fn test_compiled_sets_are_cached() {
        let matcher = RegexMatcher::new();
        let set = PatternSet::new("order", &[r"\border\b"], 0.5);
        matcher.validate(&set).unwrap();
        matcher.is_match(&set, "order").unwrap();
        assert_eq!(matcher.compiled.read().unwrap().len(), 1);
    }
}
