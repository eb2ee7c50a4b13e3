//! On-disk settings and router assembly

use anyhow::Context;
use cascade_capabilities::{
    default_exemplars, ExemplarSimilarity, HashEmbedder, KnowledgeBase, KnowledgeBaseRetriever,
    QueueHandoff, RegexMatcher,
};
use cascade_core::{Capabilities, Router, RouterConfig};
use cascade_telemetry::{CostAccumulator, Paths, Pricing, Retention, TraceRecorder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

const DEFAULT_EMBEDDING_DIMENSION: usize = 384;

/// Contents of `cascade.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub pricing: Pricing,
    #[serde(default)]
    pub retention: Retention,
    /// Named exemplar sets scored by the AI layers
    #[serde(default = "default_exemplars")]
    pub exemplars: BTreeMap<String, Vec<String>>,
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,
}

fn default_embedding_dimension() -> usize {
    DEFAULT_EMBEDDING_DIMENSION
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            router: RouterConfig::default(),
            pricing: Pricing::default(),
            retention: Retention::default(),
            exemplars: default_exemplars(),
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
        }
    }
}

impl Settings {
    /// Load `cascade.json`; a missing file means defaults
    pub fn load(paths: &Paths) -> anyhow::Result<Self> {
        let path = paths.config_file();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }
}

/// Load the knowledge base, falling back to the bundled sample
pub fn load_knowledge(paths: &Paths) -> anyhow::Result<KnowledgeBase> {
    let path = paths.knowledge_file();
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no knowledge base, using sample");
        return Ok(KnowledgeBase::sample());
    }
    KnowledgeBase::load(&path).with_context(|| format!("loading {}", path.display()))
}

/// Replay the trace journal into a recorder that keeps appending to it
pub fn open_recorder(paths: &Paths, retention: Retention) -> anyhow::Result<TraceRecorder> {
    let journal = paths.traces_file();
    let recorder = TraceRecorder::replay(&journal, retention)
        .with_context(|| format!("replaying {}", journal.display()))?;
    Ok(recorder.with_journal(journal))
}

/// Assemble a router over the local capabilities
pub fn build_router(paths: &Paths, settings: &Settings) -> anyhow::Result<Router> {
    let knowledge = load_knowledge(paths)?;
    let capabilities = Capabilities {
        regex: Arc::new(RegexMatcher::new()),
        embedding: Arc::new(ExemplarSimilarity::new(
            HashEmbedder::new(settings.embedding_dimension),
            &settings.exemplars,
        )),
        retrieval: Arc::new(KnowledgeBaseRetriever::new(&knowledge)),
        handoff: Arc::new(QueueHandoff::new(paths.handoffs_file())),
    };

    let recorder = Arc::new(open_recorder(paths, settings.retention)?);
    let costs = Arc::new(CostAccumulator::new(settings.pricing));

    let router = Router::new(settings.router.clone(), capabilities, recorder, costs)
        .context("invalid router configuration")?;
    Ok(router)
}
