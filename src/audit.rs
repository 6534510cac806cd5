//! Audit trail of rollout operations.
//!
//! Every operation opens an entry with [`AuditSink::begin`] and closes it with
//! [`AuditSink::complete`] under the same correlation id. Sinks never fail the
//! operation they record.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Started,
    Success,
    Failed,
}

/// One audited operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub correlation_id: String,
    pub operation: String,
    pub actor: String,
    pub details: serde_json::Value,
    pub status: AuditStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AuditEntry {
    /// Host the operation targeted, when recorded in `details`
    pub fn host(&self) -> Option<&str> {
        self.details.get("host").and_then(|h| h.as_str())
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn begin(
        &self,
        correlation_id: &str,
        operation: &str,
        actor: &str,
        details: serde_json::Value,
    );

    /// `payload` is the result on success and the sanitized error otherwise
    async fn complete(&self, correlation_id: &str, status: AuditStatus, payload: serde_json::Value);
}

/// Writes audit records as structured `tracing` events
#[derive(Debug, Default, Clone)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn begin(
        &self,
        correlation_id: &str,
        operation: &str,
        actor: &str,
        details: serde_json::Value,
    ) {
        info!(
            correlation_id,
            operation,
            actor,
            details = %details,
            "operation started"
        );
    }

    async fn complete(&self, correlation_id: &str, status: AuditStatus, payload: serde_json::Value) {
        match status {
            AuditStatus::Failed => warn!(
                correlation_id,
                status = ?status,
                error = %payload,
                "operation failed"
            ),
            _ => info!(
                correlation_id,
                status = ?status,
                result = %payload,
                "operation completed"
            ),
        }
    }
}

/// Keeps a bounded history of recent entries and forwards to tracing
#[derive(Debug)]
pub struct MemoryAuditSink {
    entries: Mutex<VecDeque<AuditEntry>>,
    capacity: usize,
    tracing: TracingAuditSink,
}

impl MemoryAuditSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            tracing: TracingAuditSink,
        }
    }

    fn with_entries<R>(&self, f: impl FnOnce(&mut VecDeque<AuditEntry>) -> R) -> R {
        // A poisoned ring only loses audit history, never rollout state
        let mut guard = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Most recent entries first, optionally restricted to one host
    pub fn recent(&self, host: Option<&str>, limit: usize) -> Vec<AuditEntry> {
        self.with_entries(|entries| {
            entries
                .iter()
                .rev()
                .filter(|e| host.map_or(true, |h| e.host() == Some(h)))
                .take(limit)
                .cloned()
                .collect()
        })
    }

    pub fn find(&self, correlation_id: &str) -> Option<AuditEntry> {
        self.with_entries(|entries| {
            entries
                .iter()
                .rev()
                .find(|e| e.correlation_id == correlation_id)
                .cloned()
        })
    }

    pub fn len(&self) -> usize {
        self.with_entries(|entries| entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn begin(
        &self,
        correlation_id: &str,
        operation: &str,
        actor: &str,
        details: serde_json::Value,
    ) {
        self.tracing
            .begin(correlation_id, operation, actor, details.clone())
            .await;

        let entry = AuditEntry {
            correlation_id: correlation_id.to_string(),
            operation: operation.to_string(),
            actor: actor.to_string(),
            details,
            status: AuditStatus::Started,
            result: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        };
        let capacity = self.capacity;
        self.with_entries(|entries| {
            while entries.len() >= capacity {
                entries.pop_front();
            }
            entries.push_back(entry);
        });
    }

    async fn complete(&self, correlation_id: &str, status: AuditStatus, payload: serde_json::Value) {
        self.tracing
            .complete(correlation_id, status, payload.clone())
            .await;

        let found = self.with_entries(|entries| {
            let Some(entry) = entries
                .iter_mut()
                .rev()
                .find(|e| e.correlation_id == correlation_id)
            else {
                return false;
            };
            entry.status = status;
            entry.completed_at = Some(Utc::now());
            match status {
                AuditStatus::Failed => {
                    entry.error = Some(match payload {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    })
                }
                _ => entry.result = Some(payload),
            }
            true
        });

        if !found {
            warn!(
                "Audit completion for unknown correlation id {}",
                correlation_id
            );
        }
    }
}
