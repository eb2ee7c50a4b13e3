//! Append-only store of sealed query traces

use crate::io::{append_line, read_jsonl};
use crate::types::{LayerClass, LayerId, QueryTrace};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

const DEFAULT_MAX_TRACES: usize = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("trace {0} already recorded")]
    DuplicateId(String),
    #[error("trace journal error: {0}")]
    Journal(#[from] std::io::Error),
    #[error("failed to encode trace: {0}")]
    Encode(#[from] serde_json::Error),
}

/// How many sealed traces are kept in memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Retention {
    pub max_traces: usize,
}

impl Default for Retention {
    fn default() -> Self {
        Self {
            max_traces: DEFAULT_MAX_TRACES,
        }
    }
}

/// Per-layer evaluation totals
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LayerStats {
    /// Decisions produced by this layer
    pub evaluations: u64,
    /// Queries this layer terminated
    pub terminations: u64,
    /// Decisions recorded with an unavailable capability
    pub degraded: u64,
    pub total_execution_ms: f64,
}

impl LayerStats {
    pub fn avg_execution_ms(&self) -> f64 {
        if self.evaluations == 0 {
            0.0
        } else {
            self.total_execution_ms / self.evaluations as f64
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.evaluations == 0 {
            0.0
        } else {
            self.degraded as f64 / self.evaluations as f64
        }
    }
}

/// Read-only aggregates for reporting
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RouterStats {
    pub total_queries: u64,
    /// Queries with at least one degraded decision
    pub degraded_queries: u64,
    pub layers: BTreeMap<LayerId, LayerStats>,
    /// Safety refusals keyed by the rule that fired
    pub refusals: BTreeMap<String, u64>,
    /// Over retained traces only
    pub avg_response_ms: f64,
    /// Over retained traces only
    pub p95_response_ms: f64,
}

impl RouterStats {
    pub fn error_rate(&self) -> f64 {
        if self.total_queries == 0 {
            0.0
        } else {
            self.degraded_queries as f64 / self.total_queries as f64
        }
    }

    pub fn terminations(&self, layer: LayerId) -> u64 {
        self.layers.get(&layer).map(|s| s.terminations).unwrap_or(0)
    }

    fn class_share(&self, class: LayerClass) -> f64 {
        if self.total_queries == 0 {
            return 0.0;
        }
        let count: u64 = self
            .layers
            .iter()
            .filter(|(id, _)| id.class() == class)
            .map(|(_, s)| s.terminations)
            .sum();
        count as f64 / self.total_queries as f64
    }

    /// Share of queries answered by zero-cost deterministic layers
    pub fn deterministic_share(&self) -> f64 {
        self.class_share(LayerClass::Deterministic)
    }

    /// Share of queries that fell through to retrieval or handoff
    pub fn fallback_share(&self) -> f64 {
        self.class_share(LayerClass::Fallback)
    }
}

#[derive(Debug, Default)]
struct Inner {
    order: VecDeque<String>,
    by_id: HashMap<String, QueryTrace>,
    /// Ids claimed by a `record` call whose journal write is in flight
    pending: HashSet<String>,
    stats: RouterStats,
}

impl Inner {
    fn insert(&mut self, trace: QueryTrace, retention: Retention) {
        let stats = &mut self.stats;
        stats.total_queries += 1;
        if trace.decisions().iter().any(|d| d.degraded) {
            stats.degraded_queries += 1;
        }
        for decision in trace.decisions() {
            let layer = stats.layers.entry(decision.layer).or_default();
            layer.evaluations += 1;
            layer.total_execution_ms += decision.execution_ms;
            if decision.degraded {
                layer.degraded += 1;
            }
        }
        let terminal = trace.terminal_decision();
        stats.layers.entry(terminal.layer).or_default().terminations += 1;
        if terminal.layer.is_safety() {
            *stats.refusals.entry(terminal.rule.clone()).or_default() += 1;
        }

        self.order.push_back(trace.id().to_string());
        self.by_id.insert(trace.id().to_string(), trace);

        while self.order.len() > retention.max_traces {
            if let Some(evicted) = self.order.pop_front() {
                self.by_id.remove(&evicted);
            }
        }
    }
}

/// JSONL file every recorded trace is appended to
#[derive(Debug)]
struct Journal {
    path: PathBuf,
    /// Orders appends; held only for the file write, never with `inner`
    writer: Mutex<()>,
}

impl Journal {
    fn append(&self, line: &str) -> std::io::Result<()> {
        let _guard = match self.writer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        append_line(&self.path, line)
    }
}

/// Shared trace store; writers serialize on a lock, readers get copies.
///
/// The state lock is never held across journal I/O, so readers only wait
/// for in-memory bookkeeping.
#[derive(Debug, Default)]
pub struct TraceRecorder {
    retention: Retention,
    journal: Option<Journal>,
    inner: RwLock<Inner>,
}

impl TraceRecorder {
    pub fn new(retention: Retention) -> Self {
        Self {
            retention,
            journal: None,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Also append every recorded trace to a JSONL journal
    pub fn with_journal(mut self, path: impl Into<PathBuf>) -> Self {
        self.journal = Some(Journal {
            path: path.into(),
            writer: Mutex::new(()),
        });
        self
    }

    /// Rebuild a recorder from a journal, skipping malformed or invalid lines
    pub fn replay(path: &Path, retention: Retention) -> Result<Self, RecordError> {
        Ok(Self::from_traces(Self::read_journal(path)?, retention))
    }

    /// Every journaled trace that passes validation, keeping the first of
    /// any repeated id; a missing journal is empty
    pub fn read_journal(path: &Path) -> Result<Vec<QueryTrace>, RecordError> {
        let mut seen = HashSet::new();
        let traces = read_jsonl::<QueryTrace>(path)?
            .into_iter()
            .filter(|trace| {
                if let Err(e) = trace.validate() {
                    tracing::warn!(error = %e, "skipping invalid journal trace");
                    return false;
                }
                if !seen.insert(trace.id().to_string()) {
                    tracing::warn!(id = trace.id(), "skipping duplicate journal trace");
                    return false;
                }
                true
            })
            .collect();
        Ok(traces)
    }

    /// A journal-less recorder holding already-validated traces, oldest first
    pub fn from_traces(traces: impl IntoIterator<Item = QueryTrace>, retention: Retention) -> Self {
        let recorder = Self::new(retention);
        {
            let mut inner = recorder.write();
            for trace in traces {
                inner.insert(trace, retention);
            }
        }
        recorder
    }

    pub fn retention(&self) -> Retention {
        self.retention
    }

    /// Append a sealed trace.
    ///
    /// Blocks on journal I/O when a journal is attached; async callers should
    /// run it on a blocking thread.
    pub fn record(&self, trace: QueryTrace) -> Result<(), RecordError> {
        self.reserve(trace.id())?;

        if let Some(journal) = &self.journal {
            let written = serde_json::to_string(&trace)
                .map_err(RecordError::from)
                .and_then(|line| journal.append(&line).map_err(RecordError::from));
            if let Err(e) = written {
                self.write().pending.remove(trace.id());
                return Err(e);
            }
        }

        tracing::debug!(id = trace.id(), layer = %trace.routing_layer(), "trace recorded");
        let mut inner = self.write();
        inner.pending.remove(trace.id());
        inner.insert(trace, self.retention);
        Ok(())
    }

    /// Claim `id` so a concurrent record of the same id fails fast
    fn reserve(&self, id: &str) -> Result<(), RecordError> {
        let mut inner = self.write();
        if inner.by_id.contains_key(id) || !inner.pending.insert(id.to_string()) {
            return Err(RecordError::DuplicateId(id.to_string()));
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<QueryTrace> {
        self.read().by_id.get(id).cloned()
    }

    /// Up to `n` retained traces, most recent first
    pub fn recent(&self, n: usize) -> Vec<QueryTrace> {
        let inner = self.read();
        inner
            .order
            .iter()
            .rev()
            .take(n)
            .filter_map(|id| inner.by_id.get(id).cloned())
            .collect()
    }

    /// Number of traces currently retained
    pub fn len(&self) -> usize {
        self.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_queries(&self) -> u64 {
        self.read().stats.total_queries
    }

    pub fn stats(&self) -> RouterStats {
        let inner = self.read();
        let mut stats = inner.stats.clone();

        let mut latencies: Vec<f64> = inner.by_id.values().map(|t| t.response_ms()).collect();
        if !latencies.is_empty() {
            latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            stats.avg_response_ms = latencies.iter().sum::<f64>() / latencies.len() as f64;
            stats.p95_response_ms = percentile(&latencies, 0.95);
        }
        stats
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Nearest-rank percentile of an ascending slice
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Comparison, Decision, TokenUsage, TraceBuilder};
    use chrono::Utc;

    fn trace(id: &str, path: &[LayerId], rule: &str, exec_ms: f64) -> QueryTrace {
        let mut builder = TraceBuilder::new(id, Utc::now(), "q", "q");
        for (i, &layer) in path.iter().enumerate() {
            let last = i + 1 == path.len();
            builder
                .push(Decision {
                    layer,
                    rule: rule.to_string(),
                    score: if last { 0.9 } else { 0.1 },
                    threshold: 0.5,
                    comparison: Comparison::Gte,
                    triggered: last,
                    execution_ms: exec_ms,
                    decision: String::new(),
                    usage: TokenUsage::default(),
                    cost: 0.0,
                    degraded: false,
                })
                .unwrap();
        }
        builder.seal("answer", vec![], 0.0).unwrap()
    }

    #[test]
    fn test_record_get_recent() {
        let recorder = TraceRecorder::new(Retention::default());
        recorder
            .record(trace("a", &[LayerId::BusinessRegex], "returns", 1.0))
            .unwrap();
        recorder
            .record(trace("b", &[LayerId::SafetyRegex], "emergency", 1.0))
            .unwrap();

        assert_eq!(recorder.get("a").unwrap().id(), "a");
        assert!(recorder.get("missing").is_none());

        let recent: Vec<_> = recorder.recent(10).iter().map(|t| t.id().to_string()).collect();
        assert_eq!(recent, vec!["b", "a"]);
        assert_eq!(recorder.recent(1).len(), 1);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let recorder = TraceRecorder::new(Retention::default());
        recorder.record(trace("a", &[LayerId::Handoff], "h", 1.0)).unwrap();
        let err = recorder
            .record(trace("a", &[LayerId::Handoff], "h", 1.0))
            .unwrap_err();
        assert!(matches!(err, RecordError::DuplicateId(id) if id == "a"));
    }

    #[test]
    fn test_retention_evicts_oldest_but_keeps_counts() {
        let recorder = TraceRecorder::new(Retention { max_traces: 2 });
        for id in ["a", "b", "c"] {
            recorder.record(trace(id, &[LayerId::Handoff], "h", 1.0)).unwrap();
        }
        assert_eq!(recorder.len(), 2);
        assert!(recorder.get("a").is_none());
        assert_eq!(recorder.total_queries(), 3);
        assert_eq!(recorder.stats().terminations(LayerId::Handoff), 3);
    }

    #[test]
    fn test_stats_shares_and_refusals() {
        let recorder = TraceRecorder::new(Retention::default());
        recorder
            .record(trace("a", &[LayerId::SafetyRegex], "pregnancy-keywords", 10.0))
            .unwrap();
        recorder
            .record(trace(
                "b",
                &[LayerId::SafetyRegex, LayerId::BusinessRegex],
                "returns-keyword",
                10.0,
            ))
            .unwrap();
        recorder
            .record(trace(
                "c",
                &[LayerId::SafetyRegex, LayerId::RagFallback],
                "kb",
                40.0,
            ))
            .unwrap();
        recorder
            .record(trace("d", &[LayerId::BusinessRegex], "orders", 10.0))
            .unwrap();

        let stats = recorder.stats();
        assert_eq!(stats.total_queries, 4);
        assert_eq!(stats.refusals.get("pregnancy-keywords"), Some(&1));
        assert_eq!(stats.deterministic_share(), 0.75);
        assert_eq!(stats.fallback_share(), 0.25);
        assert_eq!(stats.layers[&LayerId::SafetyRegex].evaluations, 3);
        assert_eq!(stats.p95_response_ms, 50.0);
        assert_eq!(stats.avg_response_ms, 22.5);
    }

    #[test]
    fn test_journal_replay() {
        let dir = tempfile::tempdir().unwrap();
        let journal = dir.path().join("traces.jsonl");

        let recorder = TraceRecorder::new(Retention::default()).with_journal(&journal);
        recorder.record(trace("a", &[LayerId::Handoff], "h", 1.0)).unwrap();
        recorder.record(trace("b", &[LayerId::Handoff], "h", 1.0)).unwrap();
        std::fs::OpenOptions::new()
            .append(true)
            .open(&journal)
            .and_then(|mut f| std::io::Write::write_all(&mut f, b"not json\n"))
            .unwrap();

        let replayed = TraceRecorder::replay(&journal, Retention::default()).unwrap();
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed.recent(1)[0].id(), "b");
    }

    #[test]
    fn test_read_journal_drops_invalid_and_repeated_traces() {
        let dir = tempfile::tempdir().unwrap();
        let journal = dir.path().join("traces.jsonl");

        let mut broken = serde_json::to_value(trace("x", &[LayerId::Handoff], "h", 1.0)).unwrap();
        broken["decisions"][0]["triggered"] = serde_json::Value::Bool(false);
        let lines = [
            serde_json::to_value(trace("a", &[LayerId::Handoff], "h", 1.0)).unwrap(),
            broken,
            serde_json::to_value(trace("a", &[LayerId::RagFallback], "kb", 1.0)).unwrap(),
        ];
        for line in &lines {
            crate::io::append_jsonl(&journal, line).unwrap();
        }

        let traces = TraceRecorder::read_journal(&journal).unwrap();
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].routing_layer(), LayerId::Handoff);
        assert!(TraceRecorder::read_journal(&dir.path().join("absent.jsonl"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_readers_not_blocked_by_journal_write() {
        use std::sync::mpsc;
        use std::sync::Arc;
        use std::time::Duration;

        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(
            TraceRecorder::new(Retention::default()).with_journal(dir.path().join("traces.jsonl")),
        );
        recorder.record(trace("a", &[LayerId::Handoff], "h", 1.0)).unwrap();

        // Stall the journal so the next write stays in flight
        let journal = recorder.journal.as_ref().unwrap();
        let stall = journal.writer.lock().unwrap();

        let writer = {
            let recorder = Arc::clone(&recorder);
            std::thread::spawn(move || recorder.record(trace("b", &[LayerId::Handoff], "h", 1.0)))
        };
        while !recorder.read().pending.contains("b") {
            std::thread::sleep(Duration::from_millis(1));
        }

        let (tx, rx) = mpsc::channel();
        let reader = {
            let recorder = Arc::clone(&recorder);
            std::thread::spawn(move || {
                let seen = (
                    recorder.len(),
                    recorder.get("a").is_some(),
                    recorder.get("b").is_some(),
                    recorder.stats().total_queries,
                );
                tx.send(seen).unwrap();
            })
        };
        let seen = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("reads stalled behind the journal write");
        assert_eq!(seen, (1, true, false, 1));
        reader.join().unwrap();

        // Same id while its write is in flight
        let err = recorder
            .record(trace("b", &[LayerId::Handoff], "h", 1.0))
            .unwrap_err();
        assert!(matches!(err, RecordError::DuplicateId(id) if id == "b"));

        drop(stall);
        writer.join().unwrap().unwrap();
        assert_eq!(recorder.len(), 2);
        assert!(recorder.read().pending.is_empty());
    }

    #[test]
    fn test_failed_journal_write_releases_id() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("journal");
        std::fs::write(&blocker, "not a directory").unwrap();

        let recorder =
            TraceRecorder::new(Retention::default()).with_journal(blocker.join("traces.jsonl"));
        let err = recorder
            .record(trace("a", &[LayerId::Handoff], "h", 1.0))
            .unwrap_err();
        assert!(matches!(err, RecordError::Journal(_)));
        assert!(recorder.is_empty());
        assert!(recorder.read().pending.is_empty());
    }

    #[test]
    fn test_percentile() {
        assert_eq!(percentile(&[], 0.95), 0.0);
        assert_eq!(percentile(&[1.0], 0.95), 1.0);
        let values: Vec<f64> = (1..=100).map(f64::from).collect();
        assert_eq!(percentile(&values, 0.95), 95.0);
    }
}
