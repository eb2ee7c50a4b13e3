//! Error types for layer evaluation, routing and configuration

use cascade_telemetry::{LayerId, RecordError, TraceError};
use thiserror::Error;

/// Failure of a single layer evaluation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EvaluationError {
    /// External dependency unreachable, timed out or returned garbage
    #[error("capability unavailable: {0}")]
    CapabilityUnavailable(String),

    /// The capability rejected the query itself
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Failure of a routing call
#[derive(Debug, Error)]
pub enum RouteError {
    /// Malformed or empty query; rejected before any layer ran
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Caller abandoned the query; the partial trace was discarded
    #[error("routing aborted after {0:?}")]
    Aborted(std::time::Duration),

    #[error(transparent)]
    Trace(#[from] TraceError),

    #[error(transparent)]
    Record(#[from] RecordError),
}

/// Fatal construction-time configuration problems
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("router has no layers")]
    NoLayers,

    #[error("layer {0} appears more than once")]
    DuplicateLayer(LayerId),

    #[error("layer {later} is configured after {earlier}, violating priority order")]
    OutOfOrder { earlier: LayerId, later: LayerId },

    #[error("final layer {0} is not a fallback layer")]
    NonTerminalLast(LayerId),

    #[error("layer {layer}: threshold {threshold} outside [0,1]")]
    ThresholdOutOfRange { layer: LayerId, threshold: f64 },

    #[error("layer {0} has no rules")]
    NoRules(LayerId),

    #[error("layer {layer} rule {rule}: {reason}")]
    InvalidRule {
        layer: LayerId,
        rule: String,
        reason: String,
    },

    #[error("capability timeout must be greater than zero")]
    ZeroTimeout,
}
