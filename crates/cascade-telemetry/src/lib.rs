//! Routing telemetry: trace records, the trace recorder and cost accounting

mod cost;
mod io;
mod paths;
mod recorder;
mod tokens;
mod types;

pub use cost::{Charge, CostAccumulator, CostRecord, CostSnapshot, Pricing};
pub use io::{append_jsonl, atomic_write, read_jsonl, write_json};
pub use paths::{Paths, HOME_ENV};
pub use recorder::{LayerStats, RecordError, Retention, RouterStats, TraceRecorder};
pub use tokens::{estimate_tokens, estimate_tokens_all};
pub use types::{
    clamp_score, Comparison, Decision, LayerClass, LayerId, QueryTrace, Source, SourceKind,
    TokenUsage, TraceBuilder, TraceError,
};
