//! Audit records and sinks
//!
//! Every request that reaches a terminal gate outcome produces exactly one
//! record. Sinks are write-only; nothing in the service reads them back.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use uuid::Uuid;

/// Outcome class recorded for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditOutcome {
    Success,
    Denied,
    Failed,
}

/// One audit line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub request_id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Certificate common name, or "unknown"
    pub identity: String,
    pub operation: String,
    /// Target name, empty for List and for a Put rejected before naming
    pub target: String,
    pub outcome: AuditOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    /// Server-side error detail, never disclosed to the caller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AuditRecord {
    pub fn new(
        identity: impl Into<String>,
        operation: impl Into<String>,
        target: impl Into<String>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            identity: identity.into(),
            operation: operation.into(),
            target: target.into(),
            outcome,
            error_kind: None,
            detail: None,
        }
    }

    /// Attach the error that ended the request
    pub fn with_error(mut self, error: &crate::Error) -> Self {
        self.error_kind = Some(error.kind().to_string());
        self.detail = Some(error.to_string());
        self
    }
}

/// Append-only destination for audit records
pub trait AuditSink: Send + Sync {
    fn record(&self, record: &AuditRecord);
}

/// Emits records as structured tracing events on the `wolfvault::audit` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: &AuditRecord) {
        match record.outcome {
            AuditOutcome::Success => tracing::info!(
                target: "wolfvault::audit",
                request_id = %record.request_id,
                identity = %record.identity,
                operation = %record.operation,
                target_name = %record.target,
                outcome = ?record.outcome,
                "audit"
            ),
            AuditOutcome::Denied | AuditOutcome::Failed => tracing::warn!(
                target: "wolfvault::audit",
                request_id = %record.request_id,
                identity = %record.identity,
                operation = %record.operation,
                target_name = %record.target,
                outcome = ?record.outcome,
                error_kind = record.error_kind.as_deref().unwrap_or(""),
                detail = record.detail.as_deref().unwrap_or(""),
                "audit"
            ),
        }
    }
}

/// Records queued for the audit file before new ones are dropped
pub const AUDIT_CHANNEL_CAPACITY: usize = 10_000;

enum AuditCommand {
    Line(String),
    Flush(oneshot::Sender<()>),
}

/// Appends one JSON object per line to a file.
///
/// `record` only queues the serialized line; a writer task owns the file, so
/// requests never block on audit I/O or on each other.
pub struct JsonFileAuditSink {
    sender: mpsc::Sender<AuditCommand>,
}

impl JsonFileAuditSink {
    /// Open `path` for appending, creating it if needed, and spawn the
    /// writer task. Must be called from within a tokio runtime.
    pub async fn open(path: &Path) -> crate::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path).await?;

        let (sender, receiver) = mpsc::channel(AUDIT_CHANNEL_CAPACITY);
        tokio::spawn(Self::writer_task(file, receiver));

        Ok(Self { sender })
    }

    /// Wait until every record queued so far has reached the file
    pub async fn flush(&self) -> crate::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(AuditCommand::Flush(tx))
            .await
            .map_err(|_| crate::Error::Audit("writer task terminated".into()))?;
        rx.await
            .map_err(|_| crate::Error::Audit("flush cancelled".into()))
    }

    async fn writer_task(mut file: File, mut receiver: mpsc::Receiver<AuditCommand>) {
        while let Some(command) = receiver.recv().await {
            match command {
                AuditCommand::Line(line) => {
                    if let Err(e) = file.write_all(line.as_bytes()).await {
                        tracing::error!("Failed to append audit record: {}", e);
                    }
                }
                AuditCommand::Flush(done) => {
                    if let Err(e) = file.flush().await {
                        tracing::error!("Failed to flush audit file: {}", e);
                    }
                    let _ = done.send(());
                }
            }
        }

        if let Err(e) = file.flush().await {
            tracing::error!("Failed to flush audit file: {}", e);
        }
    }
}

impl AuditSink for JsonFileAuditSink {
    fn record(&self, record: &AuditRecord) {
        let mut line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!("Failed to serialize audit record: {}", e);
                return;
            }
        };
        line.push('\n');

        match self.sender.try_send(AuditCommand::Line(line)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::error!("Audit queue full, dropped record {}", record.request_id);
            }
            Err(TrySendError::Closed(_)) => {
                tracing::error!("Audit writer stopped, dropped record {}", record.request_id);
            }
        }
    }
}

/// Forwards every record to each inner sink
#[derive(Default)]
pub struct FanoutAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutAuditSink {
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }
}

impl AuditSink for FanoutAuditSink {
    fn record(&self, record: &AuditRecord) {
        for sink in &self.sinks {
            sink.record(record);
        }
    }
}

/// Keeps records in memory
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far
    pub fn records(&self) -> Vec<AuditRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: &AuditRecord) {
        match self.records.lock() {
            Ok(mut records) => records.push(record.clone()),
            Err(poisoned) => poisoned.into_inner().push(record.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_json_file_sink_appends_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs").join("audit.jsonl");
        let sink = JsonFileAuditSink::open(&path).await.unwrap();

        let stored = AuditRecord::new("alice", "Put", "1700000000000-a.txt", AuditOutcome::Success);
        sink.record(&stored);
        let failed = AuditRecord::new("bob", "Get", "x.txt", AuditOutcome::Failed)
            .with_error(&crate::Error::NotFound("x.txt".into()));
        sink.record(&failed);
        sink.flush().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: AuditRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed, failed);
        assert_eq!(parsed.error_kind.as_deref(), Some("NotFound"));
        assert!(!lines[0].contains("error_kind"));
    }

    #[tokio::test]
    async fn test_reopen_keeps_existing_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        let first = JsonFileAuditSink::open(&path).await.unwrap();
        first.record(&AuditRecord::new("alice", "List", "", AuditOutcome::Success));
        first.flush().await.unwrap();

        let second = JsonFileAuditSink::open(&path).await.unwrap();
        second.record(&AuditRecord::new("unknown", "List", "", AuditOutcome::Denied));
        second.flush().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_records_stay_whole_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let sink = Arc::new(JsonFileAuditSink::open(&path).await.unwrap());

        let mut tasks = Vec::new();
        for i in 0..8 {
            let sink = sink.clone();
            tasks.push(tokio::spawn(async move {
                for j in 0..50 {
                    let target = format!("{}-{}.bin", i, j);
                    sink.record(&AuditRecord::new("alice", "Put", target, AuditOutcome::Success));
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        sink.flush().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let records: Vec<AuditRecord> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(records.len(), 400);
    }

    #[test]
    fn test_fanout_reaches_every_sink() {
        let a = Arc::new(MemoryAuditSink::new());
        let b = Arc::new(MemoryAuditSink::new());
        let fanout = FanoutAuditSink::new(vec![a.clone(), b.clone(), Arc::new(TracingAuditSink)]);

        fanout.record(&AuditRecord::new("alice", "Delete", "f", AuditOutcome::Success));
        assert_eq!(a.records().len(), 1);
        assert_eq!(b.records().len(), 1);
    }
}
