//! Immutable record of one completed execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::JobId;

/// Byte cap applied to captured stdout/stderr; excess is dropped silently.
pub const OUTPUT_CAPTURE_CAP: usize = 16 * 1024;

/// One completed execution: appended to the log once, never mutated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JobLogEntry {
    /// Generated record id.
    pub id: String,
    /// Id of the job that ran (a generated placeholder for previews).
    pub job_id: JobId,
    /// Display name of the job at execution time.
    pub job_name: String,
    /// Rendered command line.
    pub command_line: String,
    /// When the execution started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the execution finished (including forced kills).
    pub finished_at: Option<DateTime<Utc>>,
    /// 0 on success; the process's own exit code on normal failure;
    /// -1 for spawn failure or timeout.
    pub exit_code: i32,
    /// Captured stdout, truncated to [`OUTPUT_CAPTURE_CAP`].
    pub stdout: String,
    /// Captured stderr, truncated to [`OUTPUT_CAPTURE_CAP`].
    pub stderr: String,
    /// Empty, or a human-readable failure/timeout description.
    pub error: String,
}

impl JobLogEntry {
    /// Create an entry shell with a fresh record id.
    pub fn new(job_id: JobId, job_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            job_id,
            job_name: job_name.into(),
            ..Default::default()
        }
    }

    /// Whether the execution succeeded.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}
