//! Routing layers: one evaluation stage each

use crate::capability::{Capabilities, HandoffRequest, PatternSet};
use crate::clock::Clock;
use crate::config::{LayerConfig, RuleConfig};
use crate::error::{ConfigError, EvaluationError};
use cascade_telemetry::{
    clamp_score, Comparison, Decision, LayerClass, LayerId, Source, TokenUsage,
};
use std::future::Future;
use std::time::Duration;

const DEFAULT_REFUSAL: &str =
    "I'm not able to help with that. Please consult with a qualified professional.";

/// Everything a layer may consult while evaluating one query
pub struct EvalContext<'a> {
    pub capabilities: &'a Capabilities,
    pub clock: &'a dyn Clock,
    pub query_id: &'a str,
    pub timeout: Duration,
    /// Last layer of the pipeline; must trigger
    pub terminal: bool,
    pub fallback_answer: &'a str,
}

/// A layer's decision plus the answer it would give if it terminates
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub decision: Decision,
    pub answer: String,
    pub sources: Vec<Source>,
    pub generation_ms: f64,
}

/// A rule resolved against its layer's defaults
#[derive(Debug, Clone)]
struct Rule {
    name: String,
    threshold: f64,
    comparison: Comparison,
    patterns: Vec<PatternSet>,
    exemplars: String,
    response: Option<String>,
    template_id: String,
}

impl Rule {
    fn resolve(config: &RuleConfig, layer: &LayerConfig) -> Self {
        Self {
            name: config.name.clone(),
            threshold: config.threshold.unwrap_or(layer.threshold),
            comparison: config.comparison.unwrap_or(layer.comparison),
            patterns: config.patterns.clone(),
            exemplars: config.exemplars.clone().unwrap_or_default(),
            response: config.response.clone(),
            template_id: config
                .template_id
                .clone()
                .unwrap_or_else(|| config.name.clone()),
        }
    }

    fn fires(&self, score: f64) -> bool {
        self.comparison.fires(score, self.threshold)
    }
}

/// Settings shared by every layer kind
#[derive(Debug, Clone)]
struct Stage {
    id: LayerId,
    rules: Vec<Rule>,
}

impl Stage {
    fn from_config(config: &LayerConfig) -> Self {
        Self {
            id: config.id,
            rules: config
                .rules
                .iter()
                .map(|r| Rule::resolve(r, config))
                .collect(),
        }
    }

    fn primary(&self) -> &Rule {
        // Validated non-empty at construction
        &self.rules[0]
    }

    /// Highest-scoring firing rule, else highest-scoring rule; ties keep declaration order
    fn select(&self, scores: &[f64]) -> (usize, bool) {
        let mut best: Option<(usize, bool)> = None;
        for (idx, (rule, &score)) in self.rules.iter().zip(scores).enumerate() {
            let fired = rule.fires(score);
            best = match best {
                None => Some((idx, fired)),
                Some((b, b_fired)) => {
                    let better = (fired && !b_fired) || (fired == b_fired && score > scores[b]);
                    if better {
                        Some((idx, fired))
                    } else {
                        Some((b, b_fired))
                    }
                }
            };
        }
        best.unwrap_or((0, false))
    }

    fn decision(&self, rule: &Rule, score: f64, triggered: bool, execution_ms: f64) -> Decision {
        Decision {
            layer: self.id,
            rule: rule.name.clone(),
            score,
            threshold: rule.threshold,
            comparison: rule.comparison,
            triggered,
            execution_ms,
            decision: String::new(),
            usage: TokenUsage::default(),
            cost: 0.0,
            degraded: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegexLayer {
    stage: Stage,
}

#[derive(Debug, Clone)]
pub struct EmbeddingLayer {
    stage: Stage,
}

#[derive(Debug, Clone)]
pub struct RetrievalLayer {
    stage: Stage,
}

#[derive(Debug, Clone)]
pub struct HandoffLayer {
    stage: Stage,
    flat_cost: f64,
}

/// The closed set of layer kinds
#[derive(Debug, Clone)]
pub enum Layer {
    SafetyRegex(RegexLayer),
    SafetyEmbed(EmbeddingLayer),
    BusinessRegex(RegexLayer),
    SemanticIntent(EmbeddingLayer),
    RagFallback(RetrievalLayer),
    Handoff(HandoffLayer),
}

impl Layer {
    pub fn from_config(config: &LayerConfig) -> Result<Self, ConfigError> {
        let stage = Stage::from_config(config);
        if stage.rules.is_empty() {
            return Err(ConfigError::NoRules(config.id));
        }
        Ok(match config.id {
            LayerId::SafetyRegex => Layer::SafetyRegex(RegexLayer { stage }),
            LayerId::SafetyEmbed => Layer::SafetyEmbed(EmbeddingLayer { stage }),
            LayerId::BusinessRegex => Layer::BusinessRegex(RegexLayer { stage }),
            LayerId::SemanticIntent => Layer::SemanticIntent(EmbeddingLayer { stage }),
            LayerId::RagFallback => Layer::RagFallback(RetrievalLayer { stage }),
            LayerId::Handoff => Layer::Handoff(HandoffLayer {
                stage,
                flat_cost: config.flat_cost,
            }),
        })
    }

    pub fn id(&self) -> LayerId {
        self.stage().id
    }

    pub fn class(&self) -> LayerClass {
        self.id().class()
    }

    fn stage(&self) -> &Stage {
        match self {
            Layer::SafetyRegex(l) | Layer::BusinessRegex(l) => &l.stage,
            Layer::SafetyEmbed(l) | Layer::SemanticIntent(l) => &l.stage,
            Layer::RagFallback(l) => &l.stage,
            Layer::Handoff(l) => &l.stage,
        }
    }

    /// Every pattern set this layer will hand to the regex capability
    pub fn pattern_sets(&self) -> impl Iterator<Item = (&str, &PatternSet)> {
        self.stage()
            .rules
            .iter()
            .flat_map(|r| r.patterns.iter().map(move |p| (r.name.as_str(), p)))
    }

    /// Evaluate this layer against a normalized query
    pub async fn evaluate(
        &self,
        query: &str,
        ctx: &EvalContext<'_>,
    ) -> Result<Evaluation, EvaluationError> {
        match self {
            Layer::SafetyRegex(l) | Layer::BusinessRegex(l) => l.evaluate(query, ctx),
            Layer::SafetyEmbed(l) | Layer::SemanticIntent(l) => l.evaluate(query, ctx).await,
            Layer::RagFallback(l) => l.evaluate(query, ctx).await,
            Layer::Handoff(l) => l.evaluate(query, ctx).await,
        }
    }

    /// Decision recorded when this layer's capability was unavailable: a
    /// synthetic zero score that only triggers when the layer is terminal
    pub fn degraded(&self, reason: &str, execution_ms: f64, ctx: &EvalContext<'_>) -> Evaluation {
        let stage = self.stage();
        let rule = stage.primary();
        let mut decision = stage.decision(rule, 0.0, ctx.terminal, execution_ms);
        decision.degraded = true;
        decision.decision = if ctx.terminal {
            format!("Capability unavailable ({reason}); answered with fallback message.")
        } else {
            format!("Capability unavailable ({reason}); continuing to next layer.")
        };
        Evaluation {
            decision,
            answer: if ctx.terminal {
                ctx.fallback_answer.to_string()
            } else {
                String::new()
            },
            sources: Vec::new(),
            generation_ms: 0.0,
        }
    }
}

/// Run a capability future under the context's timeout
async fn bounded<T, F>(ctx: &EvalContext<'_>, fut: F) -> Result<T, EvaluationError>
where
    F: Future<Output = Result<T, EvaluationError>>,
{
    match tokio::time::timeout(ctx.timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(EvaluationError::CapabilityUnavailable(format!(
            "timed out after {}ms",
            ctx.timeout.as_millis()
        ))),
    }
}

impl RegexLayer {
    fn evaluate(&self, query: &str, ctx: &EvalContext<'_>) -> Result<Evaluation, EvaluationError> {
        let started = ctx.clock.monotonic_ms();
        let regex = &ctx.capabilities.regex;

        let mut scores = Vec::with_capacity(self.stage.rules.len());
        for rule in &self.stage.rules {
            let mut score = 0.0;
            for set in &rule.patterns {
                if regex.is_match(set, query)? {
                    score += set.weight;
                }
            }
            scores.push(clamp_score(score));
        }

        let (idx, fired) = self.stage.select(&scores);
        let rule = &self.stage.rules[idx];
        let score = scores[idx];
        let elapsed = ctx.clock.monotonic_ms() - started;

        let mut decision = self.stage.decision(rule, score, fired, elapsed);
        let safety = self.stage.id.is_safety();
        decision.decision = match (fired, safety) {
            (true, true) => format!("Safety rule {} matched; refusing.", rule.name),
            (true, false) => format!("Template matched for {}.", rule.name),
            (false, _) if score > 0.0 => {
                "Keywords detected but score below trigger threshold.".to_string()
            }
            (false, true) => "No safety keywords detected.".to_string(),
            (false, false) => "No deterministic patterns matched.".to_string(),
        };

        let (answer, sources) = if !fired {
            (String::new(), Vec::new())
        } else if safety {
            (refusal(rule), Vec::new())
        } else {
            (
                rule.response.clone().unwrap_or_default(),
                vec![Source::template(&rule.template_id, score)],
            )
        };

        Ok(Evaluation {
            decision,
            answer,
            sources,
            generation_ms: 0.0,
        })
    }
}

impl EmbeddingLayer {
    async fn evaluate(
        &self,
        query: &str,
        ctx: &EvalContext<'_>,
    ) -> Result<Evaluation, EvaluationError> {
        let sets: Vec<String> = self
            .stage
            .rules
            .iter()
            .map(|r| r.exemplars.clone())
            .collect();

        let started = ctx.clock.monotonic_ms();
        let response = bounded(ctx, ctx.capabilities.embedding.similarity(query, &sets)).await?;
        let elapsed = ctx.clock.monotonic_ms() - started;

        if response.scores.len() != sets.len() {
            return Err(EvaluationError::CapabilityUnavailable(format!(
                "expected {} similarity scores, got {}",
                sets.len(),
                response.scores.len()
            )));
        }
        let scores: Vec<f64> = response.scores.iter().map(|&s| clamp_score(s)).collect();

        let (idx, fired) = self.stage.select(&scores);
        let rule = &self.stage.rules[idx];
        let score = scores[idx];
        let safety = self.stage.id.is_safety();

        let mut decision = self.stage.decision(rule, score, fired, elapsed);
        decision.usage = response.usage;
        decision.decision = match (fired, safety) {
            (true, true) => format!("Embedding similarity exceeded {} threshold.", rule.name),
            (true, false) => format!("Intent {} classified with sufficient confidence.", rule.name),
            (false, true) => "Similarity below risk threshold.".to_string(),
            (false, false) => "Intent confidence below template routing threshold.".to_string(),
        };

        let (answer, sources) = if !fired {
            (String::new(), Vec::new())
        } else if safety {
            (refusal(rule), Vec::new())
        } else {
            (
                rule.response.clone().unwrap_or_default(),
                vec![Source::template(&rule.template_id, score)],
            )
        };

        Ok(Evaluation {
            decision,
            answer,
            sources,
            generation_ms: 0.0,
        })
    }
}

impl RetrievalLayer {
    async fn evaluate(
        &self,
        query: &str,
        ctx: &EvalContext<'_>,
    ) -> Result<Evaluation, EvaluationError> {
        let started = ctx.clock.monotonic_ms();
        let retrieval = bounded(ctx, ctx.capabilities.retrieval.retrieve(query)).await?;
        let elapsed = ctx.clock.monotonic_ms() - started;

        let rule = self.stage.primary();
        let score = clamp_score(retrieval.top_score());
        let fired = rule.fires(score);
        let triggered = fired || ctx.terminal;

        let mut decision = self.stage.decision(rule, score, triggered, elapsed);
        decision.usage = retrieval.usage;
        decision.decision = match (fired, triggered) {
            (true, _) => "RAG pipeline retrieved high-confidence context.".to_string(),
            (false, true) => {
                "Retrieved context below confidence threshold; answering as final layer."
                    .to_string()
            }
            (false, false) => "Retrieved context below confidence threshold.".to_string(),
        };

        if !triggered {
            return Ok(Evaluation {
                decision,
                answer: String::new(),
                sources: Vec::new(),
                generation_ms: 0.0,
            });
        }

        let answer = if retrieval.answer.trim().is_empty() {
            ctx.fallback_answer.to_string()
        } else {
            retrieval.answer.clone()
        };
        let sources = retrieval
            .passages
            .iter()
            .map(|p| Source::rag(&p.id, clamp_score(p.score)))
            .collect();

        Ok(Evaluation {
            decision,
            answer,
            sources,
            generation_ms: retrieval.generation.as_secs_f64() * 1000.0,
        })
    }
}

impl HandoffLayer {
    async fn evaluate(
        &self,
        query: &str,
        ctx: &EvalContext<'_>,
    ) -> Result<Evaluation, EvaluationError> {
        let request = HandoffRequest {
            query_id: ctx.query_id.to_string(),
            normalized_message: query.to_string(),
        };

        let started = ctx.clock.monotonic_ms();
        let ack = bounded(ctx, ctx.capabilities.handoff.hand_off(&request)).await?;
        let elapsed = ctx.clock.monotonic_ms() - started;

        let rule = self.stage.primary();
        let score = 1.0;
        let triggered = rule.fires(score) || ctx.terminal;

        let mut decision = self.stage.decision(rule, score, triggered, elapsed);
        if self.flat_cost > 0.0 {
            decision.usage = TokenUsage::flat(self.flat_cost);
        }
        decision.decision = format!("Escalated to live agent (ticket {}).", ack.ticket);

        let message = rule
            .response
            .clone()
            .unwrap_or_else(|| "A member of our team will follow up shortly.".to_string());

        Ok(Evaluation {
            decision,
            answer: if triggered {
                format!("{message} (ticket {})", ack.ticket)
            } else {
                String::new()
            },
            sources: Vec::new(),
            generation_ms: 0.0,
        })
    }
}

fn refusal(rule: &Rule) -> String {
    rule.response
        .clone()
        .unwrap_or_else(|| DEFAULT_REFUSAL.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{
        Acknowledgement, EmbeddingSimilarityCapability, HandoffCapability, RegexMatchCapability,
        Retrieval, RetrievalCapability, RetrievedPassage, SimilarityScores,
    };
    use crate::clock::FrozenClock;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Arc;

    /// Matches a pattern set when its name is listed
    struct NamedSets(Vec<&'static str>);

    impl RegexMatchCapability for NamedSets {
        fn is_match(&self, set: &PatternSet, _text: &str) -> Result<bool, EvaluationError> {
            Ok(self.0.contains(&set.name.as_str()))
        }
    }

    struct Scores(HashMap<&'static str, f64>);

    #[async_trait]
    impl EmbeddingSimilarityCapability for Scores {
        async fn similarity(
            &self,
            _text: &str,
            sets: &[String],
        ) -> Result<SimilarityScores, EvaluationError> {
            Ok(SimilarityScores {
                scores: sets
                    .iter()
                    .map(|s| self.0.get(s.as_str()).copied().unwrap_or(0.0))
                    .collect(),
                usage: TokenUsage::embedding(8),
            })
        }
    }

    struct Kb(f64);

    #[async_trait]
    impl RetrievalCapability for Kb {
        async fn retrieve(&self, _text: &str) -> Result<Retrieval, EvaluationError> {
            Ok(Retrieval {
                passages: vec![RetrievedPassage {
                    id: "kb_focus_gummies".to_string(),
                    score: self.0,
                    text: "L-theanine".to_string(),
                }],
                answer: "Focus gummies contain L-theanine.".to_string(),
                usage: TokenUsage::embedding(8),
                generation: Duration::from_millis(300),
            })
        }
    }

    struct Desk;

    #[async_trait]
    impl HandoffCapability for Desk {
        async fn hand_off(
            &self,
            request: &HandoffRequest,
        ) -> Result<Acknowledgement, EvaluationError> {
            Ok(Acknowledgement {
                ticket: format!("T-{}", request.query_id),
            })
        }
    }

    fn capabilities(sets: Vec<&'static str>, scores: &[(&'static str, f64)], kb: f64) -> Capabilities {
        Capabilities {
            regex: Arc::new(NamedSets(sets)),
            embedding: Arc::new(Scores(scores.iter().copied().collect())),
            retrieval: Arc::new(Kb(kb)),
            handoff: Arc::new(Desk),
        }
    }

    fn ctx<'a>(caps: &'a Capabilities, clock: &'a FrozenClock, terminal: bool) -> EvalContext<'a> {
        EvalContext {
            capabilities: caps,
            clock,
            query_id: "q1",
            timeout: Duration::from_secs(1),
            terminal,
            fallback_answer: "fallback",
        }
    }

    fn business() -> Layer {
        Layer::from_config(
            &LayerConfig::new(LayerId::BusinessRegex, 0.9, Comparison::Gte)
                .rule(
                    RuleConfig::new("returns-keyword")
                        .pattern(PatternSet::new("returns", &["return"], 0.6))
                        .pattern(PatternSet::new("policy", &["polic"], 0.4))
                        .template("template_returns_policy")
                        .response("30 day returns"),
                )
                .rule(
                    RuleConfig::new("order-status")
                        .pattern(PatternSet::new("order", &["order"], 0.5)),
                ),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_regex_layer_sums_weights_and_emits_template() {
        let caps = capabilities(vec!["returns", "policy"], &[], 0.0);
        let clock = FrozenClock::new(Utc::now());
        let eval = business().evaluate("q", &ctx(&caps, &clock, false)).await.unwrap();

        assert!(eval.decision.triggered);
        assert_eq!(eval.decision.rule, "returns-keyword");
        assert_eq!(eval.decision.score, 1.0);
        assert_eq!(eval.answer, "30 day returns");
        assert_eq!(eval.sources, vec![Source::template("template_returns_policy", 1.0)]);
        assert!(eval.decision.usage.is_zero());
    }

    #[tokio::test]
    async fn test_regex_layer_reports_best_non_firing_rule() {
        let caps = capabilities(vec!["order"], &[], 0.0);
        let clock = FrozenClock::new(Utc::now());
        let eval = business().evaluate("q", &ctx(&caps, &clock, false)).await.unwrap();

        assert!(!eval.decision.triggered);
        assert_eq!(eval.decision.rule, "order-status");
        assert_eq!(eval.decision.score, 0.5);
        assert!(eval.sources.is_empty());
    }

    #[tokio::test]
    async fn test_gt_comparison_does_not_fire_at_threshold() {
        let layer = Layer::from_config(
            &LayerConfig::new(LayerId::SafetyRegex, 0.6, Comparison::Gt).rule(
                RuleConfig::new("r").pattern(PatternSet::new("s", &["x"], 0.6)),
            ),
        )
        .unwrap();
        let caps = capabilities(vec!["s"], &[], 0.0);
        let clock = FrozenClock::new(Utc::now());

        for _ in 0..3 {
            let eval = layer.evaluate("q", &ctx(&caps, &clock, false)).await.unwrap();
            assert!(!eval.decision.triggered);
            assert_eq!(eval.decision.comparison, Comparison::Gt);
        }
    }

    #[tokio::test]
    async fn test_embedding_layer_uses_rule_thresholds() {
        let layer = Layer::from_config(
            &LayerConfig::new(LayerId::SafetyEmbed, 0.42, Comparison::Gte)
                .rule(RuleConfig::new("safety-exemplars").exemplars("medical"))
                .rule(
                    RuleConfig::new("safety-embed-pregnancy")
                        .threshold(0.45)
                        .exemplars("pregnancy"),
                ),
        )
        .unwrap();
        let caps = capabilities(vec![], &[("medical", 0.2), ("pregnancy", 0.66)], 0.0);
        let clock = FrozenClock::new(Utc::now());
        let eval = layer.evaluate("q", &ctx(&caps, &clock, false)).await.unwrap();

        assert!(eval.decision.triggered);
        assert_eq!(eval.decision.rule, "safety-embed-pregnancy");
        assert_eq!(eval.decision.threshold, 0.45);
        assert_eq!(eval.decision.usage.embedding_tokens, 8);
        assert!(eval.sources.is_empty());
    }

    #[tokio::test]
    async fn test_retrieval_layer_triggers_when_terminal() {
        let layer = Layer::from_config(
            &LayerConfig::new(LayerId::RagFallback, 0.5, Comparison::Gte)
                .rule(RuleConfig::new("kb-similarity-top3")),
        )
        .unwrap();
        let caps = capabilities(vec![], &[], 0.3);
        let clock = FrozenClock::new(Utc::now());

        let passing = layer.evaluate("q", &ctx(&caps, &clock, false)).await.unwrap();
        assert!(!passing.decision.triggered);

        let terminal = layer.evaluate("q", &ctx(&caps, &clock, true)).await.unwrap();
        assert!(terminal.decision.triggered);
        assert_eq!(terminal.sources, vec![Source::rag("kb_focus_gummies", 0.3)]);
        assert_eq!(terminal.generation_ms, 300.0);
    }

    #[tokio::test]
    async fn test_handoff_layer_carries_flat_cost() {
        let layer = Layer::from_config(
            &LayerConfig::new(LayerId::Handoff, 0.0, Comparison::Gte)
                .flat_cost(0.1)
                .rule(RuleConfig::new("live-agent").response("Connecting you")),
        )
        .unwrap();
        let caps = capabilities(vec![], &[], 0.0);
        let clock = FrozenClock::new(Utc::now());
        let eval = layer.evaluate("q", &ctx(&caps, &clock, true)).await.unwrap();

        assert!(eval.decision.triggered);
        assert_eq!(eval.answer, "Connecting you (ticket T-q1)");
        assert_eq!(eval.decision.usage.flat_cost, 0.1);
    }

    #[test]
    fn test_degraded_terminal_triggers_with_fallback() {
        let layer = business();
        let caps = capabilities(vec![], &[], 0.0);
        let clock = FrozenClock::new(Utc::now());

        let mid = layer.degraded("down", 5.0, &ctx(&caps, &clock, false));
        assert!(!mid.decision.triggered);
        assert!(mid.decision.degraded);
        assert_eq!(mid.decision.score, 0.0);

        let last = layer.degraded("down", 5.0, &ctx(&caps, &clock, true));
        assert!(last.decision.triggered);
        assert_eq!(last.answer, "fallback");
    }
}
