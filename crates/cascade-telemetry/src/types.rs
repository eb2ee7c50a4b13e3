//! Routing record types: layers, decisions, sources and sealed query traces

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scores and thresholds are compared at this resolution.
const PPM: f64 = 1_000_000.0;

/// The closed set of routing layers, in canonical priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayerId {
    SafetyRegex,
    SafetyEmbed,
    BusinessRegex,
    SemanticIntent,
    RagFallback,
    Handoff,
}

impl LayerId {
    /// Canonical evaluation order (safety, business, semantic, retrieval, human)
    pub const ORDER: [LayerId; 6] = [
        LayerId::SafetyRegex,
        LayerId::SafetyEmbed,
        LayerId::BusinessRegex,
        LayerId::SemanticIntent,
        LayerId::RagFallback,
        LayerId::Handoff,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LayerId::SafetyRegex => "safety-regex",
            LayerId::SafetyEmbed => "safety-embed",
            LayerId::BusinessRegex => "business-regex",
            LayerId::SemanticIntent => "semantic-intent",
            LayerId::RagFallback => "rag-fallback",
            LayerId::Handoff => "handoff",
        }
    }

    pub fn class(self) -> LayerClass {
        match self {
            LayerId::SafetyRegex | LayerId::BusinessRegex => LayerClass::Deterministic,
            LayerId::SafetyEmbed | LayerId::SemanticIntent => LayerClass::AiPowered,
            LayerId::RagFallback | LayerId::Handoff => LayerClass::Fallback,
        }
    }

    pub fn is_deterministic(self) -> bool {
        self.class() == LayerClass::Deterministic
    }

    /// Safety layers terminate with a refusal
    pub fn is_safety(self) -> bool {
        matches!(self, LayerId::SafetyRegex | LayerId::SafetyEmbed)
    }

    /// Position in [`LayerId::ORDER`]
    pub fn priority(self) -> usize {
        LayerId::ORDER
            .iter()
            .position(|&id| id == self)
            .unwrap_or(LayerId::ORDER.len())
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Layer classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayerClass {
    /// Regex/rule based, zero marginal cost
    Deterministic,
    /// Consults an external embedding capability
    AiPowered,
    /// Retrieval or human handoff; terminal when last
    Fallback,
}

/// Trigger comparison operator, declared per layer (and optionally per rule)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    /// score > threshold
    Gt,
    /// score >= threshold
    #[default]
    Gte,
}

impl Comparison {
    /// Whether `score` fires against `threshold`.
    ///
    /// Both sides are quantized to parts-per-million first, so a score that
    /// equals its threshold resolves the same way on every evaluation.
    pub fn fires(self, score: f64, threshold: f64) -> bool {
        let score = quantize(score);
        let threshold = quantize(threshold);
        match self {
            Comparison::Gt => score > threshold,
            Comparison::Gte => score >= threshold,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Comparison::Gt => ">",
            Comparison::Gte => ">=",
        }
    }
}

fn quantize(value: f64) -> i64 {
    (value * PPM).round() as i64
}

/// Clamp a capability score into [0,1]; non-finite scores become 0.0
pub fn clamp_score(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Token and call usage attributed to one layer evaluation
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub embedding_tokens: u64,
    #[serde(default)]
    pub completion_input_tokens: u64,
    #[serde(default)]
    pub completion_output_tokens: u64,
    /// Per-call flat dollar cost (e.g. a live agent escalation)
    #[serde(default)]
    pub flat_cost: f64,
    #[serde(default)]
    pub api_calls: u64,
}

impl TokenUsage {
    pub fn embedding(tokens: u64) -> Self {
        Self {
            embedding_tokens: tokens,
            api_calls: 1,
            ..Self::default()
        }
    }

    pub fn flat(cost: f64) -> Self {
        Self {
            flat_cost: cost,
            api_calls: 1,
            ..Self::default()
        }
    }

    pub fn is_zero(&self) -> bool {
        self.embedding_tokens == 0
            && self.completion_input_tokens == 0
            && self.completion_output_tokens == 0
            && self.flat_cost == 0.0
            && self.api_calls == 0
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.embedding_tokens += other.embedding_tokens;
        self.completion_input_tokens += other.completion_input_tokens;
        self.completion_output_tokens += other.completion_output_tokens;
        self.flat_cost += other.flat_cost;
        self.api_calls += other.api_calls;
    }
}

/// One layer's verdict for one query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub layer: LayerId,
    pub rule: String,
    pub score: f64,
    pub threshold: f64,
    pub comparison: Comparison,
    pub triggered: bool,
    pub execution_ms: f64,
    /// Human-readable rationale
    pub decision: String,
    #[serde(default)]
    pub usage: TokenUsage,
    #[serde(default)]
    pub cost: f64,
    /// Capability was unavailable; score is synthetic
    #[serde(default)]
    pub degraded: bool,
}

/// Evidence kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Literal template match
    Template,
    /// Retrieved knowledge-base passage
    Rag,
}

/// Evidence used to produce an answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub score: f64,
    #[serde(rename = "type")]
    pub kind: SourceKind,
}

impl Source {
    pub fn template(id: impl Into<String>, score: f64) -> Self {
        Self {
            id: id.into(),
            score,
            kind: SourceKind::Template,
        }
    }

    pub fn rag(id: impl Into<String>, score: f64) -> Self {
        Self {
            id: id.into(),
            score,
            kind: SourceKind::Rag,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TraceError {
    #[error("trace {0} already terminated; no further decisions accepted")]
    AlreadyTerminated(String),
    #[error("trace {0} has no triggered decision")]
    NotTerminated(String),
    #[error("trace {0} has no decisions")]
    Empty(String),
    #[error("trace {0} has a triggered decision before its last position")]
    TriggerNotLast(String),
}

/// In-flight trace, exclusively owned by the routing call that created it
#[derive(Debug)]
pub struct TraceBuilder {
    id: String,
    timestamp: DateTime<Utc>,
    user_message: String,
    normalized_message: String,
    decisions: Vec<Decision>,
}

impl TraceBuilder {
    pub fn new(
        id: impl Into<String>,
        timestamp: DateTime<Utc>,
        user_message: impl Into<String>,
        normalized_message: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp,
            user_message: user_message.into(),
            normalized_message: normalized_message.into(),
            decisions: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn decisions(&self) -> &[Decision] {
        &self.decisions
    }

    pub fn is_terminated(&self) -> bool {
        self.decisions.last().is_some_and(|d| d.triggered)
    }

    /// Append the next decision in evaluation order
    pub fn push(&mut self, decision: Decision) -> Result<(), TraceError> {
        if self.is_terminated() {
            return Err(TraceError::AlreadyTerminated(self.id.clone()));
        }
        self.decisions.push(decision);
        Ok(())
    }

    /// Consume the builder into an immutable trace
    pub fn seal(
        self,
        response_answer: impl Into<String>,
        sources: Vec<Source>,
        generation_ms: f64,
    ) -> Result<QueryTrace, TraceError> {
        let last = match self.decisions.last() {
            Some(d) => d,
            None => return Err(TraceError::Empty(self.id)),
        };
        if !last.triggered {
            return Err(TraceError::NotTerminated(self.id));
        }
        let routing_layer = last.layer;

        let execution_ms: f64 = self.decisions.iter().map(|d| d.execution_ms).sum();
        let total_cost: f64 = self.decisions.iter().map(|d| d.cost).sum();

        Ok(QueryTrace {
            id: self.id,
            timestamp: self.timestamp,
            user_message: self.user_message,
            normalized_message: self.normalized_message,
            routing_layer,
            response_answer: response_answer.into(),
            response_ms: execution_ms + generation_ms,
            generation_ms,
            total_cost,
            decisions: self.decisions,
            sources,
        })
    }
}

/// Sealed, immutable record of every decision made while routing one query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryTrace {
    id: String,
    timestamp: DateTime<Utc>,
    user_message: String,
    normalized_message: String,
    routing_layer: LayerId,
    response_answer: String,
    /// Sum of per-layer execution times plus generation time
    response_ms: f64,
    #[serde(default)]
    generation_ms: f64,
    total_cost: f64,
    decisions: Vec<Decision>,
    #[serde(default)]
    sources: Vec<Source>,
}

impl QueryTrace {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn normalized_message(&self) -> &str {
        &self.normalized_message
    }

    /// Layer whose decision terminated the pipeline
    pub fn routing_layer(&self) -> LayerId {
        self.routing_layer
    }

    pub fn response_answer(&self) -> &str {
        &self.response_answer
    }

    pub fn response_ms(&self) -> f64 {
        self.response_ms
    }

    pub fn generation_ms(&self) -> f64 {
        self.generation_ms
    }

    pub fn total_cost(&self) -> f64 {
        self.total_cost
    }

    pub fn decisions(&self) -> &[Decision] {
        &self.decisions
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn terminal_decision(&self) -> &Decision {
        // Sealed traces are never empty
        &self.decisions[self.decisions.len() - 1]
    }

    /// Check the sealing invariants; used on traces read back from a journal
    pub fn validate(&self) -> Result<(), TraceError> {
        let Some(last) = self.decisions.last() else {
            return Err(TraceError::Empty(self.id.clone()));
        };
        if !last.triggered {
            return Err(TraceError::NotTerminated(self.id.clone()));
        }
        let triggered = self.decisions.iter().filter(|d| d.triggered).count();
        if triggered != 1 {
            return Err(TraceError::TriggerNotLast(self.id.clone()));
        }
        Ok(())
    }
}
