//! Exemplar-set similarity for the AI layers

use crate::embedder::{cosine, HashEmbedder};
use async_trait::async_trait;
use cascade_core::{EmbeddingSimilarityCapability, EvaluationError, SimilarityScores};
use cascade_telemetry::{clamp_score, estimate_tokens, TokenUsage};
use std::collections::{BTreeMap, HashMap};

/// Scores a query against named exemplar sets: the best cosine over each set.
///
/// Exemplars are embedded once at construction. Only the query is billed.
#[derive(Debug, Clone)]
pub struct ExemplarSimilarity {
    embedder: HashEmbedder,
    sets: HashMap<String, Vec<Vec<f32>>>,
}

impl ExemplarSimilarity {
    pub fn new(embedder: HashEmbedder, exemplars: &BTreeMap<String, Vec<String>>) -> Self {
        let sets = exemplars
            .iter()
            .map(|(name, texts)| {
                let vectors = texts.iter().map(|t| embedder.embed(t)).collect();
                (name.clone(), vectors)
            })
            .collect();
        Self { embedder, sets }
    }

    pub fn set_names(&self) -> impl Iterator<Item = &str> {
        self.sets.keys().map(String::as_str)
    }

    fn best_match(&self, query: &[f32], set: &str) -> Result<f64, EvaluationError> {
        let vectors = self.sets.get(set).ok_or_else(|| {
            EvaluationError::CapabilityUnavailable(format!("unknown exemplar set {set}"))
        })?;
        Ok(vectors
            .iter()
            .map(|v| clamp_score(cosine(query, v)))
            .fold(0.0, f64::max))
    }
}

#[async_trait]
impl EmbeddingSimilarityCapability for ExemplarSimilarity {
    async fn similarity(
        &self,
        text: &str,
        exemplar_sets: &[String],
    ) -> Result<SimilarityScores, EvaluationError> {
        let query = self.embedder.embed(text);
        let scores = exemplar_sets
            .iter()
            .map(|set| self.best_match(&query, set))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SimilarityScores {
            scores,
            usage: TokenUsage::embedding(estimate_tokens(text)),
        })
    }
}

/// Exemplar sets referenced by the default router configuration
pub fn default_exemplars() -> BTreeMap<String, Vec<String>> {
    let sets: [(&str, &[&str]); 5] = [
        (
            "medical-risk",
            &[
                "can i take this with my medication",
                "is this safe with my heart condition",
                "will this cure my anxiety",
                "can this treat high blood pressure",
                "is it safe to give this to my child",
            ],
        ),
        (
            "pregnancy-risk",
            &[
                "is this safe during pregnancy",
                "can i take this while pregnant",
                "is it safe while breastfeeding",
                "safe to use when trying to conceive",
            ],
        ),
        (
            "product-usage",
            &[
                "how do i take the sleep gummies",
                "how many capsules should i take a day",
                "when is the best time to take this",
                "should i take it with food",
            ],
        ),
        (
            "product-information",
            &[
                "what ingredients are in this product",
                "is this product vegan",
                "does it contain gluten or allergens",
                "where are your ingredients sourced",
            ],
        ),
        (
            "order-shipping",
            &[
                "how long does shipping take",
                "do you ship internationally",
                "when will my order arrive",
                "how much is shipping",
            ],
        ),
    ];

    sets.iter()
        .map(|(name, texts)| {
            (
                name.to_string(),
                texts.iter().map(|t| t.to_string()).collect(),
            )
        })
        .collect()
}
