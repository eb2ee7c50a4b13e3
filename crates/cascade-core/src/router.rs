//! Cascading router: runs layers in priority order until one triggers

use crate::capability::Capabilities;
use crate::clock::{Clock, SystemClock};
use crate::config::RouterConfig;
use crate::error::{ConfigError, EvaluationError, RouteError};
use crate::layer::{EvalContext, Evaluation, Layer};
use crate::normalize::{CanonicalNormalizer, Normalizer};
use cascade_telemetry::{
    Charge, CostAccumulator, QueryTrace, RecordError, TraceBuilder, TraceRecorder,
};
use std::sync::Arc;
use std::time::Duration;

/// Routes queries through a validated layer pipeline.
///
/// A router is shared by reference across concurrent queries; each call
/// owns its in-flight trace, and only the recorder and cost accumulator
/// are shared.
pub struct Router {
    layers: Vec<Layer>,
    config: RouterConfig,
    capabilities: Capabilities,
    recorder: Arc<TraceRecorder>,
    costs: Arc<CostAccumulator>,
    clock: Arc<dyn Clock>,
    normalizer: Arc<dyn Normalizer>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("layers", &self.layers.iter().map(Layer::id).collect::<Vec<_>>())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Router {
    /// Validate `config` and build the layer pipeline.
    ///
    /// Every regex pattern set is handed to the regex capability once so
    /// that malformed patterns fail here rather than mid-query.
    pub fn new(
        config: RouterConfig,
        capabilities: Capabilities,
        recorder: Arc<TraceRecorder>,
        costs: Arc<CostAccumulator>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let layers = config
            .layers
            .iter()
            .map(Layer::from_config)
            .collect::<Result<Vec<_>, _>>()?;

        for layer in &layers {
            for (rule, set) in layer.pattern_sets() {
                capabilities
                    .regex
                    .validate(set)
                    .map_err(|reason| ConfigError::InvalidRule {
                        layer: layer.id(),
                        rule: rule.to_string(),
                        reason: format!("pattern set {}: {reason}", set.name),
                    })?;
            }
        }

        tracing::debug!(layers = layers.len(), "router configured");

        Ok(Self {
            layers,
            config,
            capabilities,
            recorder,
            costs,
            clock: Arc::new(SystemClock::new()),
            normalizer: Arc::new(CanonicalNormalizer),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_normalizer(mut self, normalizer: Arc<dyn Normalizer>) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn recorder(&self) -> &Arc<TraceRecorder> {
        &self.recorder
    }

    pub fn costs(&self) -> &Arc<CostAccumulator> {
        &self.costs
    }

    /// Route one query and record its sealed trace.
    ///
    /// Dropping the returned future before it completes discards the
    /// partial trace; nothing is recorded for an abandoned query. Once the
    /// trace is sealed its recording runs to completion on the blocking pool.
    pub async fn route(&self, query: &str) -> Result<QueryTrace, RouteError> {
        let normalized = self.normalizer.normalize(query);
        if normalized.is_empty() {
            return Err(RouteError::InvalidInput("query is empty".to_string()));
        }
        let chars = normalized.chars().count();
        if chars > self.config.max_query_chars {
            return Err(RouteError::InvalidInput(format!(
                "query is {chars} characters, limit is {}",
                self.config.max_query_chars
            )));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let mut builder = TraceBuilder::new(&id, self.clock.utc_now(), query, &normalized);
        let last = self.layers.len() - 1;

        for (idx, layer) in self.layers.iter().enumerate() {
            let ctx = EvalContext {
                capabilities: &self.capabilities,
                clock: self.clock.as_ref(),
                query_id: &id,
                timeout: self.config.capability_timeout(),
                terminal: idx == last,
                fallback_answer: &self.config.fallback_answer,
            };

            let started = self.clock.monotonic_ms();
            let mut evaluation = match layer.evaluate(&normalized, &ctx).await {
                Ok(evaluation) => evaluation,
                Err(EvaluationError::CapabilityUnavailable(reason)) => {
                    tracing::warn!(
                        query = %id,
                        layer = %layer.id(),
                        %reason,
                        "capability unavailable, failing open"
                    );
                    let elapsed = self.clock.monotonic_ms() - started;
                    layer.degraded(&reason, elapsed, &ctx)
                }
                Err(EvaluationError::InvalidInput(reason)) => {
                    tracing::debug!(query = %id, layer = %layer.id(), %reason, "query rejected");
                    return Err(RouteError::InvalidInput(reason));
                }
            };

            if !evaluation.decision.usage.is_zero() {
                evaluation.decision.cost = self
                    .costs
                    .charge(layer.id(), Charge::Tokens(evaluation.decision.usage));
            }

            tracing::debug!(
                query = %id,
                layer = %layer.id(),
                rule = %evaluation.decision.rule,
                score = evaluation.decision.score,
                threshold = evaluation.decision.threshold,
                triggered = evaluation.decision.triggered,
                "layer evaluated"
            );

            let triggered = evaluation.decision.triggered;
            builder.push(evaluation.decision.clone())?;
            if triggered {
                return self.finish(builder, evaluation).await;
            }
        }

        // The terminal layer always triggers, so a validated pipeline never gets here
        Err(RouteError::Trace(cascade_telemetry::TraceError::NotTerminated(
            id,
        )))
    }

    /// Route with an overall deadline; on expiry the query is abandoned unrecorded
    pub async fn route_with_deadline(
        &self,
        query: &str,
        deadline: Duration,
    ) -> Result<QueryTrace, RouteError> {
        match tokio::time::timeout(deadline, self.route(query)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(?deadline, "routing deadline expired, trace discarded");
                Err(RouteError::Aborted(deadline))
            }
        }
    }

    async fn finish(
        &self,
        builder: TraceBuilder,
        evaluation: Evaluation,
    ) -> Result<QueryTrace, RouteError> {
        let trace = builder.seal(
            evaluation.answer,
            evaluation.sources,
            evaluation.generation_ms,
        )?;

        // Journal appends touch the disk; keep them off the async workers
        let recorder = Arc::clone(&self.recorder);
        let sealed = trace.clone();
        tokio::task::spawn_blocking(move || recorder.record(sealed))
            .await
            .map_err(|e| RecordError::Journal(std::io::Error::other(e)))??;

        tracing::info!(
            query = %trace.id(),
            layer = %trace.routing_layer(),
            evaluated = trace.decisions().len(),
            cost = trace.total_cost(),
            response_ms = trace.response_ms(),
            "query routed"
        );
        Ok(trace)
    }
}
