//! Core identifier types for the engine.
//!
//! These types provide type-safe identifiers for jobs and in-flight
//! execution instances.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a job.
///
/// Stored as a string so ids survive round-trips through the snapshot file
/// and import payloads unchanged; the registry assigns a fresh UUID string
/// when a job arrives without one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

/// Unique identifier for one in-flight execution of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(Uuid);

impl JobId {
    /// Create a JobId from an existing string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random JobId.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the underlying string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is the empty placeholder (no id assigned yet).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl InstanceId {
    /// Generate a new random InstanceId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_creation() {
        let id = JobId::new("nightly-backup");
        assert_eq!(id.as_str(), "nightly-backup");
        assert!(!id.is_empty());
    }

    #[test]
    fn test_job_id_default_is_empty() {
        let id = JobId::default();
        assert!(id.is_empty());
    }

    #[test]
    fn test_generated_job_ids_are_unique() {
        assert_ne!(JobId::generate(), JobId::generate());
    }

    #[test]
    fn test_instance_id_is_unique() {
        assert_ne!(InstanceId::new(), InstanceId::new());
    }

    #[test]
    fn test_ids_are_hashable() {
        use std::collections::HashSet;

        let mut ids: HashSet<JobId> = HashSet::new();
        ids.insert(JobId::new("a"));
        ids.insert(JobId::new("b"));
        ids.insert(JobId::new("a"));
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn test_job_id_from_str() {
        let id: JobId = "cleanup".into();
        assert_eq!(id, JobId::new("cleanup"));
    }
}
