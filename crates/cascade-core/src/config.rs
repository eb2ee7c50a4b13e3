//! Router configuration

use crate::capability::PatternSet;
use crate::error::ConfigError;
use cascade_telemetry::{Comparison, LayerClass, LayerId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

const DEFAULT_CAPABILITY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_MAX_QUERY_CHARS: usize = 2_000;
const DEFAULT_HANDOFF_COST: f64 = 0.10;

/// One named rule inside a layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub name: String,
    /// Overrides the layer threshold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    /// Overrides the layer comparison
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparison: Option<Comparison>,
    /// Regex layers: weighted pattern sets
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patterns: Vec<PatternSet>,
    /// AI layers: exemplar set scored by the embedding capability
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exemplars: Option<String>,
    /// Answer returned when this rule terminates the pipeline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    /// Template source id for business and intent rules (defaults to the rule name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
}

impl RuleConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            threshold: None,
            comparison: None,
            patterns: Vec::new(),
            exemplars: None,
            response: None,
            template_id: None,
        }
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn comparison(mut self, comparison: Comparison) -> Self {
        self.comparison = Some(comparison);
        self
    }

    pub fn pattern(mut self, set: PatternSet) -> Self {
        self.patterns.push(set);
        self
    }

    pub fn exemplars(mut self, set: impl Into<String>) -> Self {
        self.exemplars = Some(set.into());
        self
    }

    pub fn response(mut self, response: impl Into<String>) -> Self {
        self.response = Some(response.into());
        self
    }

    pub fn template(mut self, template_id: impl Into<String>) -> Self {
        self.template_id = Some(template_id.into());
        self
    }
}

/// One layer of the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerConfig {
    pub id: LayerId,
    pub threshold: f64,
    #[serde(default)]
    pub comparison: Comparison,
    pub rules: Vec<RuleConfig>,
    /// Flat dollar cost per invocation (handoff escalations)
    #[serde(default)]
    pub flat_cost: f64,
}

impl LayerConfig {
    pub fn new(id: LayerId, threshold: f64, comparison: Comparison) -> Self {
        Self {
            id,
            threshold,
            comparison,
            rules: Vec::new(),
            flat_cost: 0.0,
        }
    }

    pub fn rule(mut self, rule: RuleConfig) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn flat_cost(mut self, cost: f64) -> Self {
        self.flat_cost = cost;
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        check_threshold(self.id, self.threshold)?;
        if self.rules.is_empty() {
            return Err(ConfigError::NoRules(self.id));
        }
        if !self.flat_cost.is_finite() || self.flat_cost < 0.0 {
            return Err(ConfigError::InvalidRule {
                layer: self.id,
                rule: "*".to_string(),
                reason: format!("flat cost {} must be a non-negative number", self.flat_cost),
            });
        }
        if self.id.is_deterministic() && self.flat_cost != 0.0 {
            return Err(ConfigError::InvalidRule {
                layer: self.id,
                rule: "*".to_string(),
                reason: "deterministic layers cannot carry a cost".to_string(),
            });
        }

        let mut names = HashSet::new();
        for rule in &self.rules {
            let invalid = |reason: &str| ConfigError::InvalidRule {
                layer: self.id,
                rule: rule.name.clone(),
                reason: reason.to_string(),
            };

            if !names.insert(rule.name.as_str()) {
                return Err(invalid("duplicate rule name"));
            }
            if let Some(threshold) = rule.threshold {
                check_threshold(self.id, threshold)?;
            }
            match self.id.class() {
                LayerClass::Deterministic => {
                    if rule.patterns.is_empty() {
                        return Err(invalid("regex rule has no pattern sets"));
                    }
                    for set in &rule.patterns {
                        if set.patterns.is_empty() {
                            return Err(invalid(&format!("pattern set {} is empty", set.name)));
                        }
                        if !set.weight.is_finite() || !(0.0..=1.0).contains(&set.weight) {
                            return Err(invalid(&format!(
                                "pattern set {} weight outside [0,1]",
                                set.name
                            )));
                        }
                    }
                }
                LayerClass::AiPowered => {
                    if rule.exemplars.as_deref().map_or(true, str::is_empty) {
                        return Err(invalid("AI rule has no exemplar set"));
                    }
                }
                LayerClass::Fallback => {}
            }
        }
        Ok(())
    }
}

fn check_threshold(layer: LayerId, threshold: f64) -> Result<(), ConfigError> {
    if threshold.is_finite() && (0.0..=1.0).contains(&threshold) {
        Ok(())
    } else {
        Err(ConfigError::ThresholdOutOfRange { layer, threshold })
    }
}

/// Router configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Layers in evaluation order
    pub layers: Vec<LayerConfig>,

    /// Upper bound on any single capability call
    #[serde(default = "default_capability_timeout_ms")]
    pub capability_timeout_ms: u64,

    /// Longer queries are rejected as invalid input
    #[serde(default = "default_max_query_chars")]
    pub max_query_chars: usize,

    /// Answer used when the terminal layer's capability is unavailable
    #[serde(default = "default_fallback_answer")]
    pub fallback_answer: String,
}

fn default_capability_timeout_ms() -> u64 {
    DEFAULT_CAPABILITY_TIMEOUT_MS
}

fn default_max_query_chars() -> usize {
    DEFAULT_MAX_QUERY_CHARS
}

fn default_fallback_answer() -> String {
    "Sorry, I can't answer that right now. A member of our team will follow up shortly."
        .to_string()
}

impl RouterConfig {
    /// The standard six-layer wellness-store pipeline
    pub fn new() -> Self {
        Self {
            layers: vec![
                safety_regex_layer(),
                safety_embed_layer(),
                business_regex_layer(),
                semantic_intent_layer(),
                LayerConfig::new(LayerId::RagFallback, 0.5, Comparison::Gte)
                    .rule(RuleConfig::new("kb-similarity-top3")),
                LayerConfig::new(LayerId::Handoff, 0.0, Comparison::Gte)
                    .flat_cost(DEFAULT_HANDOFF_COST)
                    .rule(RuleConfig::new("live-agent").response(
                        "I'm connecting you with a member of our concierge team.",
                    )),
            ],
            capability_timeout_ms: DEFAULT_CAPABILITY_TIMEOUT_MS,
            max_query_chars: DEFAULT_MAX_QUERY_CHARS,
            fallback_answer: default_fallback_answer(),
        }
    }

    pub fn capability_timeout(&self) -> Duration {
        Duration::from_millis(self.capability_timeout_ms)
    }

    /// Structural checks; fatal at router construction
    pub fn validate(&self) -> Result<(), ConfigError> {
        let last = self.layers.last().ok_or(ConfigError::NoLayers)?;
        if self.capability_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }

        let mut seen = HashSet::new();
        let mut previous: Option<LayerId> = None;
        for layer in &self.layers {
            if !seen.insert(layer.id) {
                return Err(ConfigError::DuplicateLayer(layer.id));
            }
            if let Some(earlier) = previous {
                if layer.id.priority() < earlier.priority() {
                    return Err(ConfigError::OutOfOrder {
                        earlier,
                        later: layer.id,
                    });
                }
            }
            previous = Some(layer.id);
            layer.validate()?;
        }

        if last.id.class() != LayerClass::Fallback {
            return Err(ConfigError::NonTerminalLast(last.id));
        }
        Ok(())
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn safety_regex_layer() -> LayerConfig {
    LayerConfig::new(LayerId::SafetyRegex, 0.8, Comparison::Gte)
        .rule(
            RuleConfig::new("emergency-keywords")
                .pattern(PatternSet::new(
                    "emergency-terms",
                    &[
                        r"\b(overdose|overdosed|poison(ed|ing)?|seizure|unconscious)\b",
                        r"\b(can'?t|cannot) breathe\b",
                        r"\bchest pain\b",
                        r"\bsuicid(e|al)\b",
                    ],
                    0.9,
                ))
                .pattern(PatternSet::new(
                    "urgency-cues",
                    &[r"\b(emergency|urgent|right now|immediately)\b"],
                    0.1,
                ))
                .response(
                    "This sounds like an emergency. Please call 911 or your local emergency number now.",
                ),
        )
        .rule(
            RuleConfig::new("pregnancy-keywords")
                .threshold(0.85)
                .pattern(PatternSet::new(
                    "pregnancy-terms",
                    &[r"\bpregnan(t|cy)\b", r"\btrimester\b", r"\bbreast ?feed(ing)?\b"],
                    0.78,
                ))
                .pattern(PatternSet::new(
                    "risk-terms",
                    &[r"\b(bleeding|cramp(s|ing)?|miscarriage|contractions)\b"],
                    0.22,
                ))
                .response(
                    "I'm not able to provide pregnancy safety advice. Please consult with your healthcare provider.",
                ),
        )
        .rule(
            RuleConfig::new("medication-interactions")
                .pattern(PatternSet::new(
                    "prescription-terms",
                    &[
                        r"\b(warfarin|ssri|antidepressants?|blood thinners?|insulin|metformin)\b",
                        r"\bprescription\b",
                    ],
                    0.6,
                ))
                .pattern(PatternSet::new(
                    "interaction-terms",
                    &[r"\b(interact(s|ion)?|combine|together with|mix(ed)? with)\b"],
                    0.4,
                ))
                .response(
                    "I can't advise on medication interactions. Please check with your doctor or pharmacist.",
                ),
        )
}

fn safety_embed_layer() -> LayerConfig {
    LayerConfig::new(LayerId::SafetyEmbed, 0.42, Comparison::Gte)
        .rule(RuleConfig::new("safety-exemplars").exemplars("medical-risk").response(
            "I'm not able to give medical advice. Please consult with a qualified healthcare provider.",
        ))
        .rule(
            RuleConfig::new("safety-embed-pregnancy")
                .threshold(0.45)
                .exemplars("pregnancy-risk")
                .response(
                    "I'm not able to provide pregnancy safety advice. Please consult with your healthcare provider.",
                ),
        )
}

fn business_regex_layer() -> LayerConfig {
    LayerConfig::new(LayerId::BusinessRegex, 0.9, Comparison::Gte)
        .rule(
            RuleConfig::new("returns-keyword")
                .pattern(PatternSet::new(
                    "returns-terms",
                    &[r"\b(return|returns|refund|refunds|exchange)\b"],
                    0.6,
                ))
                .pattern(PatternSet::new(
                    "policy-terms",
                    &[r"\b(polic(y|ies)|how do i|can i|window)\b"],
                    0.4,
                ))
                .template("template_returns_policy")
                .response(
                    "Our wellness kits can be returned within 30 days of delivery for a full refund.",
                ),
        )
        .rule(
            RuleConfig::new("order-status")
                .pattern(PatternSet::new(
                    "order-terms",
                    &[r"\b(order|package|shipment|delivery)\b"],
                    0.5,
                ))
                .pattern(PatternSet::new(
                    "tracking-terms",
                    &[r"\b(where is|track(ing)?|status|arrive|shipped)\b"],
                    0.5,
                ))
                .template("template_order_status")
                .response(
                    "You can track your order from the link in your shipping confirmation email.",
                ),
        )
        .rule(
            RuleConfig::new("subscription-pause")
                .pattern(PatternSet::new(
                    "subscription-terms",
                    &[r"\b(subscription|monthly box|auto-?ship)\b"],
                    0.5,
                ))
                .pattern(PatternSet::new(
                    "pause-terms",
                    &[r"\b(pause|skip|cancel|stop)\b"],
                    0.5,
                ))
                .template("template_subscription_pause")
                .response("You can pause or skip your subscription any time from your account page."),
        )
}

fn semantic_intent_layer() -> LayerConfig {
    LayerConfig::new(LayerId::SemanticIntent, 0.6, Comparison::Gt)
        .rule(
            RuleConfig::new("product-usage")
                .exemplars("product-usage")
                .template("template_product_usage")
                .response("Most of our supplements are taken once daily with food; see the label for your product."),
        )
        .rule(
            RuleConfig::new("product-information")
                .exemplars("product-information")
                .template("template_product_information")
                .response("You can find full ingredient lists and sourcing details on each product page."),
        )
        .rule(
            RuleConfig::new("order-shipping")
                .exemplars("order-shipping")
                .template("template_order_status")
                .response("Orders ship within 2 business days; tracking arrives by email."),
        )
}
