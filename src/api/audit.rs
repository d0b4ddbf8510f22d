//! Query audit log: FAILED and SLOW lines for operators.
//!
//! Every record is formatted to a single line and appended with one write
//! under a shared lock, so records from concurrent requests never
//! interleave mid-line.

use std::path::PathBuf;

use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Timestamp shape used throughout the audit log.
const STAMP_FORMAT: &str = "%m-%d-%Y %H:%M:%S (UTC %z)";

pub fn timestamp_now() -> String {
    Utc::now().format(STAMP_FORMAT).to_string()
}

pub struct QueryLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl QueryLog {
    pub fn new(path: PathBuf) -> Self {
        QueryLog {
            path,
            lock: Mutex::new(()),
        }
    }

    /// Marker written once at server startup.
    pub async fn launch_banner(&self) {
        self.append(format!(
            "\n\n\nANALYSIS SERVER LAUNCHED @ {}\n\n",
            timestamp_now()
        ))
        .await;
    }

    /// A query whose black-box timer expired unresolved.
    pub async fn failed(&self, query: &str, issued: &str) {
        self.append(format!(
            "FAILED: \"{query}\" issued at {issued} has failed.\n"
        ))
        .await;
    }

    /// A query that resolved, but slower than promised.
    pub async fn slow(&self, query: &str, issued: &str, minutes: f64) {
        self.append(format!(
            "SLOW:   \"{query}\" issued at {issued} took {minutes:.2} minutes to resolve.\n"
        ))
        .await;
    }

    async fn append(&self, line: String) {
        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        let result = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            file.write_all(line.as_bytes()).await
        }
        .await;
        if let Err(error) = result {
            tracing::error!(path = %self.path.display(), %error, "query log write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_are_single_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failed_queries.log");
        let log = QueryLog::new(path.clone());

        log.failed("clinton OR hillary", "02-24-2016 10:00:00 (UTC +0000)")
            .await;
        log.slow("trump", "02-24-2016 10:05:00 (UTC +0000)", 1.5).await;

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("FAILED: \"clinton OR hillary\""));
        assert!(contents.contains("SLOW:   \"trump\""));
        assert!(contents.contains("took 1.50 minutes"));
        assert_eq!(contents.lines().count(), 2);
    }
}
