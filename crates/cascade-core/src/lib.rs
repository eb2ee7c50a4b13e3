//! Cascade routing core
//!
//! A query is normalized, then offered to each configured layer in
//! priority order: safety checks first, then business templates, then
//! retrieval, then human handoff. The first layer whose score crosses its
//! threshold answers; every layer consulted along the way is recorded in a
//! sealed [`QueryTrace`](cascade_telemetry::QueryTrace).

pub mod capability;
pub mod clock;
pub mod config;
pub mod error;
pub mod layer;
pub mod normalize;
pub mod router;

pub use capability::{
    Acknowledgement, Capabilities, EmbeddingSimilarityCapability, HandoffCapability,
    HandoffRequest, PatternSet, RegexMatchCapability, Retrieval, RetrievalCapability,
    RetrievedPassage, SimilarityScores,
};
pub use clock::{Clock, FrozenClock, SystemClock};
pub use config::{LayerConfig, RouterConfig, RuleConfig};
pub use error::{ConfigError, EvaluationError, RouteError};
pub use layer::{EvalContext, Evaluation, Layer};
pub use normalize::{CanonicalNormalizer, Normalizer};
pub use router::Router;
