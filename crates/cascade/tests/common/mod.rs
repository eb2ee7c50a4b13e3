#![allow(dead_code)]

use async_trait::async_trait;
use cascade_core::{
    Acknowledgement, Capabilities, EmbeddingSimilarityCapability, EvaluationError,
    HandoffCapability, HandoffRequest, LayerConfig, PatternSet, RegexMatchCapability, Retrieval,
    RetrievalCapability, RetrievedPassage, Router, RouterConfig, RuleConfig, SimilarityScores,
};
use cascade_core::FrozenClock;
use cascade_telemetry::{Comparison, CostAccumulator, LayerId, Retention, TokenUsage, TraceRecorder};
use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const EMBED_TOKENS: u64 = 10;

/// Plain substring matching; patterns in test configs are literal words
pub struct SubstringRegex;

impl RegexMatchCapability for SubstringRegex {
    fn is_match(&self, set: &PatternSet, text: &str) -> Result<bool, EvaluationError> {
        Ok(set.patterns.iter().any(|p| text.contains(p.as_str())))
    }
}

/// Similarity scores looked up by normalized query and exemplar set; unknown pairs score 0
#[derive(Default)]
pub struct ScriptedSimilarity {
    scores: HashMap<(String, String), f64>,
}

impl ScriptedSimilarity {
    pub fn score(mut self, query: &str, set: &str, score: f64) -> Self {
        self.scores.insert((query.to_string(), set.to_string()), score);
        self
    }
}

#[async_trait]
impl EmbeddingSimilarityCapability for ScriptedSimilarity {
    async fn similarity(
        &self,
        text: &str,
        sets: &[String],
    ) -> Result<SimilarityScores, EvaluationError> {
        let scores = sets
            .iter()
            .map(|s| {
                self.scores
                    .get(&(text.to_string(), s.clone()))
                    .copied()
                    .unwrap_or(0.0)
            })
            .collect();
        Ok(SimilarityScores {
            scores,
            usage: TokenUsage::embedding(EMBED_TOKENS),
        })
    }
}

/// Retrieval with a fixed top score for every query
pub struct FixedRetrieval(pub f64);

#[async_trait]
impl RetrievalCapability for FixedRetrieval {
    async fn retrieve(&self, _text: &str) -> Result<Retrieval, EvaluationError> {
        Ok(Retrieval {
            passages: vec![
                RetrievedPassage {
                    id: "kb_focus_gummies".to_string(),
                    score: self.0,
                    text: "Focus gummies contain L-theanine and green tea extract.".to_string(),
                },
                RetrievedPassage {
                    id: "kb_green_tea_extract".to_string(),
                    score: self.0 * 0.9,
                    text: "Green tea extract provides natural caffeine.".to_string(),
                },
            ],
            answer: "Focus gummies contain L-theanine and green tea extract.".to_string(),
            usage: TokenUsage {
                embedding_tokens: EMBED_TOKENS,
                completion_input_tokens: 200,
                completion_output_tokens: 40,
                flat_cost: 0.0,
                api_calls: 1,
            },
            generation: Duration::from_millis(250),
        })
    }
}

/// Counts escalations
#[derive(Default)]
pub struct CountingHandoff {
    pub calls: AtomicUsize,
}

#[async_trait]
impl HandoffCapability for CountingHandoff {
    async fn hand_off(&self, request: &HandoffRequest) -> Result<Acknowledgement, EvaluationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Acknowledgement {
            ticket: format!("T-{}", &request.query_id[..4]),
        })
    }
}

/// Every call fails as if the backing service were down
pub struct Down;

#[async_trait]
impl EmbeddingSimilarityCapability for Down {
    async fn similarity(
        &self,
        _text: &str,
        _sets: &[String],
    ) -> Result<SimilarityScores, EvaluationError> {
        Err(EvaluationError::CapabilityUnavailable("503 from embedding service".to_string()))
    }
}

#[async_trait]
impl RetrievalCapability for Down {
    async fn retrieve(&self, _text: &str) -> Result<Retrieval, EvaluationError> {
        Err(EvaluationError::CapabilityUnavailable("vector store offline".to_string()))
    }
}

#[async_trait]
impl HandoffCapability for Down {
    async fn hand_off(&self, _r: &HandoffRequest) -> Result<Acknowledgement, EvaluationError> {
        Err(EvaluationError::CapabilityUnavailable("agent queue offline".to_string()))
    }
}

/// Never answers within any reasonable timeout
pub struct Stalled(pub Duration);

#[async_trait]
impl EmbeddingSimilarityCapability for Stalled {
    async fn similarity(
        &self,
        _text: &str,
        sets: &[String],
    ) -> Result<SimilarityScores, EvaluationError> {
        tokio::time::sleep(self.0).await;
        Ok(SimilarityScores {
            scores: vec![1.0; sets.len()],
            usage: TokenUsage::embedding(EMBED_TOKENS),
        })
    }
}

/// The six-layer pipeline with literal-word patterns for [`SubstringRegex`]
pub fn scenario_config() -> RouterConfig {
    RouterConfig {
        layers: vec![
            LayerConfig::new(LayerId::SafetyRegex, 0.8, Comparison::Gte)
                .rule(
                    RuleConfig::new("emergency-keywords")
                        .pattern(PatternSet::new("emergency-terms", &["overdose", "chest pain"], 0.95))
                        .pattern(PatternSet::new("question-cues", &["what", "is this"], 0.05)),
                )
                .rule(
                    RuleConfig::new("pregnancy-keywords")
                        .threshold(0.85)
                        .pattern(PatternSet::new("pregnancy-terms", &["pregnan"], 0.78))
                        .pattern(PatternSet::new("risk-terms", &["bleeding", "cramps"], 0.22)),
                ),
            LayerConfig::new(LayerId::SafetyEmbed, 0.42, Comparison::Gte)
                .rule(RuleConfig::new("safety-exemplars").exemplars("medical-risk"))
                .rule(
                    RuleConfig::new("safety-embed-pregnancy")
                        .threshold(0.45)
                        .exemplars("pregnancy-risk"),
                ),
            LayerConfig::new(LayerId::BusinessRegex, 0.9, Comparison::Gte).rule(
                RuleConfig::new("returns-keyword")
                    .pattern(PatternSet::new("returns-terms", &["return"], 0.6))
                    .pattern(PatternSet::new("policy-terms", &["polic"], 0.4))
                    .template("template_returns_policy")
                    .response("Returns are accepted within 30 days."),
            ),
            LayerConfig::new(LayerId::SemanticIntent, 0.6, Comparison::Gt).rule(
                RuleConfig::new("product-usage")
                    .exemplars("product-usage")
                    .template("template_product_usage")
                    .response("Take one daily with food."),
            ),
            LayerConfig::new(LayerId::RagFallback, 0.5, Comparison::Gte)
                .rule(RuleConfig::new("kb-similarity-top3")),
            LayerConfig::new(LayerId::Handoff, 0.0, Comparison::Gte)
                .flat_cost(0.10)
                .rule(RuleConfig::new("live-agent").response("Connecting you with our team.")),
        ],
        ..RouterConfig::new()
    }
}

/// Similarity script for the documented walkthrough queries
pub fn scenario_similarity() -> ScriptedSimilarity {
    ScriptedSimilarity::default()
        .score("what are your return policies", "medical-risk", 0.18)
        .score("what are your return policies", "pregnancy-risk", 0.05)
        .score("is this safe during pregnancy", "medical-risk", 0.31)
        .score("is this safe during pregnancy", "pregnancy-risk", 0.66)
        .score("how do i take the sleep gummies", "product-usage", 0.82)
        .score("my cat ate a gummy at exactly the line", "product-usage", 0.6)
}

pub struct Harness {
    pub router: Arc<Router>,
    pub recorder: Arc<TraceRecorder>,
    pub costs: Arc<CostAccumulator>,
    pub handoff: Arc<CountingHandoff>,
}

pub fn frozen_clock() -> Arc<FrozenClock> {
    Arc::new(FrozenClock::new(
        Utc.with_ymd_and_hms(2024, 9, 18, 14, 22, 11).unwrap(),
    ))
}

pub fn harness_with(
    config: RouterConfig,
    embedding: Arc<dyn EmbeddingSimilarityCapability>,
    retrieval: Arc<dyn RetrievalCapability>,
) -> Harness {
    let handoff = Arc::new(CountingHandoff::default());
    let recorder = Arc::new(TraceRecorder::new(Retention::default()));
    let costs = Arc::new(CostAccumulator::default());
    let capabilities = Capabilities {
        regex: Arc::new(SubstringRegex),
        embedding,
        retrieval,
        handoff: handoff.clone(),
    };
    let router = Router::new(config, capabilities, recorder.clone(), costs.clone())
        .unwrap()
        .with_clock(frozen_clock());

    Harness {
        router: Arc::new(router),
        recorder,
        costs,
        handoff,
    }
}

pub fn harness() -> Harness {
    harness_with(
        scenario_config(),
        Arc::new(scenario_similarity()),
        Arc::new(FixedRetrieval(0.3)),
    )
}
