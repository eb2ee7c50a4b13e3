//! File-backed live agent queue

use async_trait::async_trait;
use cascade_core::{Acknowledgement, EvaluationError, HandoffCapability, HandoffRequest};
use cascade_telemetry::append_jsonl;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One queued escalation as written to the journal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedHandoff {
    pub ticket: String,
    pub queued_at: DateTime<Utc>,
    #[serde(flatten)]
    pub request: HandoffRequest,
}

/// Appends escalations to a JSONL queue that agents work from
#[derive(Debug, Clone)]
pub struct QueueHandoff {
    path: PathBuf,
}

impl QueueHandoff {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl HandoffCapability for QueueHandoff {
    async fn hand_off(&self, request: &HandoffRequest) -> Result<Acknowledgement, EvaluationError> {
        let entry = QueuedHandoff {
            ticket: format!("HO-{}", request.query_id),
            queued_at: Utc::now(),
            request: request.clone(),
        };

        let path = self.path.clone();
        let record = entry.clone();
        tokio::task::spawn_blocking(move || append_jsonl(&path, &record))
            .await
            .map_err(|e| EvaluationError::CapabilityUnavailable(e.to_string()))?
            .map_err(|e| EvaluationError::CapabilityUnavailable(e.to_string()))?;

        tracing::info!(ticket = %entry.ticket, query = %request.query_id, "handed off to live agent");
        Ok(Acknowledgement {
            ticket: entry.ticket,
        })
    }
}
