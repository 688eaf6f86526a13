//! Append-only query history
//!
//! One JSON line per completed request. The log is best-effort: an append
//! failure is logged and never fails the request that produced it.

use chrono::Utc;
use nlq_core::error::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub request_id: String,
    pub timestamp: String,
    pub db_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_ms: Option<u64>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    /// "nl" for pipeline requests, "manual" for raw SQL
    pub source: String,
}

impl HistoryRecord {
    pub fn now(request_id: &str, db_name: &str, source: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            db_name: db_name.to_string(),
            sql: None,
            row_count: None,
            execution_ms: None,
            success: false,
            error_kind: None,
            source: source.to_string(),
        }
    }
}

pub struct HistoryLog {
    path: PathBuf,
    // Serializes appends so records never interleave
    write: Mutex<()>,
}

impl HistoryLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write: Mutex::new(()),
        }
    }

    pub async fn append(&self, record: &HistoryRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn appends_one_json_line_per_record() {
        let dir = std::env::temp_dir().join(format!("nlq-history-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("history.jsonl");
        let _ = tokio::fs::remove_file(&path).await;

        let log = HistoryLog::new(&path);

        let mut first = HistoryRecord::now("req-1", "blog", "nl");
        first.sql = Some("SELECT 1".to_string());
        first.success = true;
        first.row_count = Some(1);
        log.append(&first).await.unwrap();

        let mut second = HistoryRecord::now("req-2", "blog", "manual");
        second.error_kind = Some("db_error".to_string());
        log.append(&second).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: HistoryRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.request_id, "req-1");
        assert_eq!(parsed.source, "nl");
        assert!(parsed.success);

        let parsed: HistoryRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed.error_kind.as_deref(), Some("db_error"));
        assert_eq!(parsed.source, "manual");

        let _ = tokio::fs::remove_file(&path).await;
    }
}
