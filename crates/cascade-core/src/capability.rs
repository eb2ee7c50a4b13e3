//! External capabilities consulted by layers
//!
//! Layers never embed a matcher, model or retriever; they receive these
//! interfaces at router construction so tests can substitute frozen fakes.

use crate::error::EvaluationError;
use async_trait::async_trait;
use cascade_telemetry::TokenUsage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// A named group of regex patterns contributing `weight` to a rule score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSet {
    pub name: String,
    pub patterns: Vec<String>,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

impl PatternSet {
    pub fn new(name: impl Into<String>, patterns: &[&str], weight: f64) -> Self {
        Self {
            name: name.into(),
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            weight,
        }
    }
}

/// Deterministic pattern matching. Must not suspend and must not cost money.
pub trait RegexMatchCapability: Send + Sync {
    /// Reject unusable pattern sets at router construction
    fn validate(&self, _set: &PatternSet) -> Result<(), String> {
        Ok(())
    }

    /// Whether any pattern in `set` matches `text`
    fn is_match(&self, set: &PatternSet, text: &str) -> Result<bool, EvaluationError>;
}

/// One similarity score per requested exemplar set, in request order
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityScores {
    pub scores: Vec<f64>,
    pub usage: TokenUsage,
}

#[async_trait]
pub trait EmbeddingSimilarityCapability: Send + Sync {
    /// Score `text` against each named exemplar set in a single call
    async fn similarity(
        &self,
        text: &str,
        exemplar_sets: &[String],
    ) -> Result<SimilarityScores, EvaluationError>;
}

/// A ranked knowledge-base passage
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedPassage {
    pub id: String,
    pub score: f64,
    pub text: String,
}

/// Ranked passages plus the answer generated from them
#[derive(Debug, Clone, PartialEq)]
pub struct Retrieval {
    /// Highest score first
    pub passages: Vec<RetrievedPassage>,
    pub answer: String,
    pub usage: TokenUsage,
    pub generation: Duration,
}

impl Retrieval {
    pub fn top_score(&self) -> f64 {
        self.passages.first().map(|p| p.score).unwrap_or(0.0)
    }
}

#[async_trait]
pub trait RetrievalCapability: Send + Sync {
    async fn retrieve(&self, text: &str) -> Result<Retrieval, EvaluationError>;
}

/// What a live agent queue is told about an escalated query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffRequest {
    pub query_id: String,
    pub normalized_message: String,
}

/// Escalation receipt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub ticket: String,
}

#[async_trait]
pub trait HandoffCapability: Send + Sync {
    async fn hand_off(&self, request: &HandoffRequest) -> Result<Acknowledgement, EvaluationError>;
}

/// The full set of capabilities injected into a router
#[derive(Clone)]
pub struct Capabilities {
    pub regex: Arc<dyn RegexMatchCapability>,
    pub embedding: Arc<dyn EmbeddingSimilarityCapability>,
    pub retrieval: Arc<dyn RetrievalCapability>,
    pub handoff: Arc<dyn HandoffCapability>,
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities").finish_non_exhaustive()
    }
}
