//! Durable storage: the job snapshot file and the append-only execution log.
//!
//! Two independently-failing surfaces. The snapshot is the whole job
//! collection as a pretty-printed JSON array, replaced atomically on every
//! write (temp file + rename), so a reader never observes a partial file.
//! The log is newline-delimited JSON, one entry per line, opened in append
//! mode per write. Neither store knows anything about scheduling; callers
//! serialize concurrent access with their own locks.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::core::{Job, JobId, JobLogEntry};

/// Tail window size used when the caller passes a zero limit.
const DEFAULT_TAIL_LIMIT: usize = 100;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The file exists but does not parse.
    #[error("corrupt store: {0}")]
    Corrupt(String),
}

/// Whole-collection job snapshot store.
#[derive(Debug, Clone)]
pub struct JobStore {
    path: PathBuf,
}

impl JobStore {
    /// Create a store backed by the given file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the job collection.
    ///
    /// A missing or empty file yields an empty collection; a corrupt file is
    /// an error, never silently defaulted.
    pub async fn load(&self) -> Result<Vec<Job>, StorageError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if bytes.is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupt(e.to_string()))
    }

    /// Replace the snapshot with the given collection.
    ///
    /// Writes to a temp file and renames over the target, so a crash
    /// mid-write leaves the previous snapshot intact.
    pub async fn save(&self, jobs: &[Job]) -> Result<(), StorageError> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let body = serde_json::to_vec_pretty(jobs)
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// Append-only execution log store.
#[derive(Debug, Clone)]
pub struct LogStore {
    path: PathBuf,
}

impl LogStore {
    /// Create a store backed by the given file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry as a single JSON line.
    pub async fn append(&self, entry: &JobLogEntry) -> Result<(), StorageError> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let mut line = serde_json::to_vec(entry).map_err(|e| StorageError::Corrupt(e.to_string()))?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    /// Return the most recent `limit` valid entries, in original order,
    /// optionally filtered by job id.
    ///
    /// Scans sequentially with a sliding window, so malformed lines are
    /// skipped (and do not count toward the limit). A missing file yields
    /// an empty result.
    pub async fn tail(
        &self,
        job_id: Option<&JobId>,
        limit: usize,
    ) -> Result<Vec<JobLogEntry>, StorageError> {
        let limit = if limit == 0 { DEFAULT_TAIL_LIMIT } else { limit };

        let file = match tokio::fs::File::open(&self.path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut window: std::collections::VecDeque<JobLogEntry> =
            std::collections::VecDeque::with_capacity(limit);
        let mut lines = BufReader::new(file).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let entry: JobLogEntry = match serde_json::from_str(&line) {
                Ok(e) => e,
                Err(_) => continue,
            };
            if let Some(id) = job_id {
                if &entry.job_id != id {
                    continue;
                }
            }
            if window.len() == limit {
                window.pop_front();
            }
            window.push_back(entry);
        }
        Ok(window.into_iter().collect())
    }

    /// Truncate the log to empty.
    pub async fn clear(&self) -> Result<(), StorageError> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(&self.path, b"").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_job(id: &str) -> Job {
        Job {
            id: JobId::new(id),
            name: format!("job {id}"),
            cron: "* * * * *".into(),
            command: "true".into(),
            enabled: true,
            max_consecutive_failures: 3,
            ..Default::default()
        }
    }

    fn sample_entry(job_id: &str) -> JobLogEntry {
        let mut entry = JobLogEntry::new(JobId::new(job_id), format!("job {job_id}"));
        entry.command_line = "true".into();
        entry
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let dir = tempdir().unwrap();
        let store = JobStore::new(dir.path().join("jobs.json"));

        let jobs = vec![sample_job("a"), sample_job("b"), sample_job("c")];
        store.save(&jobs).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.len(), 3);
        for job in &jobs {
            let found = loaded.iter().find(|j| j.id == job.id).unwrap();
            assert_eq!(found.name, job.name);
            assert_eq!(found.cron, job.cron);
            assert_eq!(found.command, job.command);
            assert_eq!(found.enabled, job.enabled);
        }
    }

    #[tokio::test]
    async fn test_snapshot_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = JobStore::new(dir.path().join("absent.json"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let store = JobStore::new(&path);
        assert!(matches!(
            store.load().await,
            Err(StorageError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn test_snapshot_is_pretty_printed() {
        let dir = tempdir().unwrap();
        let store = JobStore::new(dir.path().join("jobs.json"));
        store.save(&[sample_job("a")]).await.unwrap();

        let text = tokio::fs::read_to_string(store.path()).await.unwrap();
        assert!(text.contains('\n'));
        assert!(text.trim_start().starts_with('['));
    }

    #[tokio::test]
    async fn test_snapshot_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let store = JobStore::new(dir.path().join("jobs.json"));
        store.save(&[sample_job("a")]).await.unwrap();

        assert!(!dir.path().join("jobs.tmp").exists());
    }

    #[tokio::test]
    async fn test_log_append_and_tail() {
        let dir = tempdir().unwrap();
        let store = LogStore::new(dir.path().join("logs.jsonl"));

        for _ in 0..5 {
            store.append(&sample_entry("j1")).await.unwrap();
        }

        let entries = store.tail(None, 10).await.unwrap();
        assert_eq!(entries.len(), 5);
    }

    #[tokio::test]
    async fn test_tail_keeps_only_last_k_in_order() {
        let dir = tempdir().unwrap();
        let store = LogStore::new(dir.path().join("logs.jsonl"));

        let mut ids = Vec::new();
        for _ in 0..8 {
            let entry = sample_entry("j1");
            ids.push(entry.id.clone());
            store.append(&entry).await.unwrap();
        }

        let entries = store.tail(None, 3).await.unwrap();
        assert_eq!(entries.len(), 3);
        let got: Vec<_> = entries.iter().map(|e| e.id.clone()).collect();
        assert_eq!(got, ids[5..].to_vec());
    }

    #[tokio::test]
    async fn test_tail_skips_corrupt_lines() {
        let dir = tempdir().unwrap();
        let store = LogStore::new(dir.path().join("logs.jsonl"));

        let mut ids = Vec::new();
        for i in 0..6 {
            let entry = sample_entry("j1");
            ids.push(entry.id.clone());
            store.append(&entry).await.unwrap();
            if i == 2 {
                // Simulate a torn write between valid records.
                let mut file = tokio::fs::OpenOptions::new()
                    .append(true)
                    .open(store.path())
                    .await
                    .unwrap();
                file.write_all(b"{\"jobId\": garbage\n").await.unwrap();
                file.flush().await.unwrap();
            }
        }

        // Corrupt lines are skipped and do not count toward the limit.
        let entries = store.tail(None, 4).await.unwrap();
        assert_eq!(entries.len(), 4);
        let got: Vec<_> = entries.iter().map(|e| e.id.clone()).collect();
        assert_eq!(got, ids[2..].to_vec());
    }

    #[tokio::test]
    async fn test_tail_filters_by_job_id() {
        let dir = tempdir().unwrap();
        let store = LogStore::new(dir.path().join("logs.jsonl"));

        store.append(&sample_entry("a")).await.unwrap();
        store.append(&sample_entry("b")).await.unwrap();
        store.append(&sample_entry("a")).await.unwrap();

        let only_a = store.tail(Some(&JobId::new("a")), 10).await.unwrap();
        assert_eq!(only_a.len(), 2);
        assert!(only_a.iter().all(|e| e.job_id == JobId::new("a")));
    }

    #[tokio::test]
    async fn test_tail_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = LogStore::new(dir.path().join("absent.jsonl"));
        assert!(store.tail(None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_truncates() {
        let dir = tempdir().unwrap();
        let store = LogStore::new(dir.path().join("logs.jsonl"));

        store.append(&sample_entry("j1")).await.unwrap();
        store.clear().await.unwrap();

        assert!(store.tail(None, 10).await.unwrap().is_empty());
        assert_eq!(
            tokio::fs::read(store.path()).await.unwrap().len(),
            0
        );
    }
}
