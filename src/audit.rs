//! Session audit log
//!
//! Appends one JSON line per negotiation outcome, answered request and teardown.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Entry in the audit log
#[derive(Debug, Serialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub entry_type: &'static str,
    pub topic: Option<String>,
    pub proposal_id: Option<u64>,
    pub request_id: Option<u64>,
    pub peer: Option<String>,
    pub method: Option<String>,
    pub detail: Option<String>,
    pub status: &'static str,
}

impl AuditEntry {
    pub fn new(entry_type: &'static str, status: &'static str) -> Self {
        Self {
            timestamp: Utc::now(),
            entry_type,
            topic: None,
            proposal_id: None,
            request_id: None,
            peer: None,
            method: None,
            detail: None,
            status,
        }
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn proposal(mut self, id: u64) -> Self {
        self.proposal_id = Some(id);
        self
    }

    pub fn request(mut self, id: u64) -> Self {
        self.request_id = Some(id);
        self
    }

    pub fn peer(mut self, name: impl Into<String>) -> Self {
        self.peer = Some(name.into());
        self
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(truncate(detail.into()));
        self
    }
}

/// Keep details short, they may carry peer-supplied text
fn truncate(mut detail: String) -> String {
    const LIMIT: usize = 500;
    if detail.len() > LIMIT {
        let mut cut = LIMIT;
        while !detail.is_char_boundary(cut) {
            cut -= 1;
        }
        detail.truncate(cut);
        detail.push_str("... [truncated]");
    }
    detail
}

/// Writer for audit log entries
struct AuditLogWriter {
    path: PathBuf,
}

impl AuditLogWriter {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn write(&self, entry: &AuditEntry) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let json = serde_json::to_string(entry)?;
        writeln!(file, "{}", json)?;
        Ok(())
    }
}

/// Append-only JSONL audit trail; write failures are logged, never returned
#[derive(Clone)]
pub struct SessionAuditLog {
    writer: Arc<Mutex<AuditLogWriter>>,
}

impl SessionAuditLog {
    /// # Arguments
    /// * `log_path` - Path to the audit log file (JSONL format)
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            writer: Arc::new(Mutex::new(AuditLogWriter::new(log_path.into()))),
        }
    }

    pub async fn record(&self, entry: AuditEntry) {
        let writer = self.writer.lock().await;
        if let Err(e) = writer.write(&entry) {
            tracing::warn!(error = %e, "Failed to write audit log entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn appends_json_lines() {
        let temp_file = NamedTempFile::new().unwrap();
        let log = SessionAuditLog::new(temp_file.path());

        log.record(
            AuditEntry::new("proposal_approved", "success")
                .proposal(1)
                .topic("abc")
                .peer("TestDapp"),
        )
        .await;
        log.record(
            AuditEntry::new("request_responded", "error")
                .request(9)
                .method("aleo_sign")
                .detail("chain unsupported: eth:1"),
        )
        .await;

        let content = std::fs::read_to_string(temp_file.path()).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["entry_type"], "proposal_approved");
        assert_eq!(first["peer"], "TestDapp");
        assert!(lines[1].contains("chain unsupported"));
    }

    #[test]
    fn long_details_are_truncated() {
        let detail = truncate("x".repeat(2_000));
        assert!(detail.len() < 600);
        assert!(detail.ends_with("[truncated]"));
    }

    #[tokio::test]
    async fn unwritable_path_does_not_fail() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened for appending
        let log = SessionAuditLog::new(dir.path());
        log.record(AuditEntry::new("session_disconnected", "success"))
            .await;
    }
}
