//! Job definition and field normalization.
//!
//! A [`Job`] binds a cron expression to an external command plus the runtime
//! counters the circuit breaker maintains. Field normalization mirrors what
//! the registry enforces at every write: unknown concurrency policies fall
//! back to `skip`, unknown process-creation modes fall back to inherit, and
//! a non-positive failure threshold is coerced to the default.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use super::types::JobId;

/// Failure threshold applied when a job carries none.
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Per-job rule for a trigger arriving while a previous execution is still
/// running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConcurrencyPolicy {
    /// Drop the new trigger.
    #[default]
    Skip,
    /// Kill the running instances, then start the new one.
    KillOld,
    /// Run concurrently.
    Allow,
}

impl ConcurrencyPolicy {
    /// Normalize a raw policy string; anything unrecognized maps to `Skip`.
    pub fn normalize(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "kill_old" => Self::KillOld,
            "allow" => Self::Allow,
            _ => Self::Skip,
        }
    }

    /// Canonical wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::KillOld => "kill_old",
            Self::Allow => "allow",
        }
    }
}

impl fmt::Display for ConcurrencyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ConcurrencyPolicy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ConcurrencyPolicy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::normalize(&raw))
    }
}

/// Serde shim for the optional policy field: an absent or blank value means
/// "unset" (the registry then carries the previous value forward), anything
/// else normalizes like [`ConcurrencyPolicy::normalize`].
mod policy_field {
    use super::ConcurrencyPolicy;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<ConcurrencyPolicy>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(policy) => serializer.serialize_str(policy.as_str()),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<ConcurrencyPolicy>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(match raw {
            None => None,
            Some(s) if s.trim().is_empty() => None,
            Some(s) => Some(ConcurrencyPolicy::normalize(&s)),
        })
    }
}

/// Platform process-visibility hint, interpreted by the process-launch
/// adapter; non-supporting platforms treat every variant as a no-op.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProcessCreationMode {
    /// No hint; the child inherits the parent's console, if any.
    #[default]
    Inherit,
    /// CREATE_NEW_CONSOLE
    NewConsole,
    /// DETACHED_PROCESS
    Detached,
    /// CREATE_NO_WINDOW
    NoWindow,
}

impl ProcessCreationMode {
    /// Normalize a raw mode string; anything unrecognized maps to `Inherit`.
    pub fn normalize(value: &str) -> Self {
        match value.trim().to_uppercase().as_str() {
            "CREATE_NEW_CONSOLE" => Self::NewConsole,
            "DETACHED_PROCESS" => Self::Detached,
            "CREATE_NO_WINDOW" => Self::NoWindow,
            _ => Self::Inherit,
        }
    }

    /// Canonical wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inherit => "",
            Self::NewConsole => "CREATE_NEW_CONSOLE",
            Self::Detached => "DETACHED_PROCESS",
            Self::NoWindow => "CREATE_NO_WINDOW",
        }
    }
}

impl Serialize for ProcessCreationMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ProcessCreationMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::normalize(&raw))
    }
}

/// A named, schedulable unit: one external command bound to a cron
/// expression, plus the runtime counters maintained across executions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Job {
    /// Opaque unique identifier; assigned by the registry if absent.
    pub id: JobId,
    /// Display name; defaults to the command when left blank.
    pub name: String,
    /// Display grouping, not behavioral.
    pub folder: String,
    /// 5-field cron expression or named descriptor.
    pub cron: String,
    /// Program to execute.
    pub command: String,
    /// Command arguments, in order.
    pub args: Vec<String>,
    /// Working directory for the child process; empty = inherit.
    pub work_dir: String,
    /// Platform process-visibility hint.
    pub process_creation_mode: ProcessCreationMode,
    /// Execution timeout in seconds; 0 = unbounded.
    pub timeout_seconds: u64,
    /// What to do when a trigger overlaps a running execution; `None` means
    /// the caller left it unset.
    #[serde(with = "policy_field")]
    pub concurrency_policy: Option<ConcurrencyPolicy>,
    /// Whether scheduled triggering is active for this job.
    pub enabled: bool,
    /// Consecutive failures after which the job is auto-disabled.
    pub max_consecutive_failures: u32,
    /// Current consecutive-failure count.
    pub consecutive_failures: u32,
    /// Total completed executions, monotonic.
    pub executed_count: u64,
    /// When the job last finished executing.
    pub last_executed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Apply the write-time field normalization the registry guarantees:
    /// blank name falls back to the command, an unset policy becomes `skip`,
    /// and a zero failure threshold is coerced to the default.
    pub fn normalize(&mut self) {
        if self.name.trim().is_empty() {
            self.name = self.command.clone();
        }
        if self.concurrency_policy.is_none() {
            self.concurrency_policy = Some(ConcurrencyPolicy::Skip);
        }
        if self.max_consecutive_failures == 0 {
            self.max_consecutive_failures = DEFAULT_MAX_CONSECUTIVE_FAILURES;
        }
    }

    /// Effective concurrency policy (`skip` when unset).
    pub fn policy(&self) -> ConcurrencyPolicy {
        self.concurrency_policy.unwrap_or_default()
    }

    /// Render the command line as it will appear in log entries.
    pub fn command_line(&self) -> String {
        render_command_line(&self.command, &self.args)
    }
}

/// Join a command and its arguments into a single display string.
pub fn render_command_line(command: &str, args: &[String]) -> String {
    let mut line = String::from(command);
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

/// An ad-hoc command to dry-run without touching the registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PreviewRequest {
    /// Program to execute.
    pub command: String,
    /// Command arguments, in order.
    pub args: Vec<String>,
    /// Working directory; empty = inherit.
    pub work_dir: String,
    /// Platform process-visibility hint.
    pub process_creation_mode: ProcessCreationMode,
    /// Execution timeout in seconds; 0 = unbounded.
    pub timeout_seconds: u64,
    /// Optional job id to stamp on the resulting log entry.
    pub job_id: Option<JobId>,
    /// Optional display name; defaults to the command.
    pub job_name: Option<String>,
}
