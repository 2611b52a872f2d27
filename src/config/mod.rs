//! Bulk YAML import/export of the job collection.
//!
//! A thin layer over the engine's registry operations. The payload is either
//! a bare array of jobs or a versioned envelope carrying the engine-wide
//! enabled flag alongside them. Import resolves name collisions either by
//! renaming the incoming job (`coexist`) or by replacing the existing job's
//! id (`overwrite`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

use crate::core::Job;
use crate::scheduler::{CronEngine, EngineError};

/// Errors from import/export operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The payload did not parse as either accepted shape.
    #[error("invalid payload: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Unrecognized conflict strategy name.
    #[error("invalid conflict strategy: {0}")]
    InvalidStrategy(String),

    /// A registry operation failed mid-import.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// How to resolve an incoming job whose name already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictStrategy {
    /// Keep both: rename the incoming job with a disambiguating suffix.
    #[default]
    Coexist,
    /// Replace the existing job (the incoming one takes over its id).
    Overwrite,
}

impl FromStr for ConflictStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "coexist" => Ok(Self::Coexist),
            "overwrite" => Ok(Self::Overwrite),
            other => Err(ConfigError::InvalidStrategy(other.to_string())),
        }
    }
}

/// Engine-wide flags carried inside the envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExportedCronConfig {
    /// Engine-wide pause switch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_enabled: Option<bool>,
}

/// The versioned export envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExportedConfig {
    /// Payload format version.
    pub version: u32,
    /// When the export was produced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exported_at: Option<DateTime<Utc>>,
    /// Engine-wide flags; absent when the export excludes engine state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron: Option<ExportedCronConfig>,
    /// The job collection.
    pub jobs: Vec<Job>,
}

/// Render the current job collection as a YAML envelope.
///
/// `include_engine_state` adds the engine-wide enabled flag; `only_enabled`
/// filters the exported jobs to enabled ones.
pub async fn export_yaml(
    engine: &CronEngine,
    include_engine_state: bool,
    only_enabled: bool,
) -> Result<String, ConfigError> {
    let mut jobs: Vec<Job> = engine
        .list_jobs()
        .await
        .into_iter()
        .map(|overview| overview.job)
        .filter(|job| !only_enabled || job.enabled)
        .collect();
    jobs.sort_by(|a, b| {
        let na = a.name.trim().to_lowercase();
        let nb = b.name.trim().to_lowercase();
        na.cmp(&nb).then_with(|| a.id.as_str().cmp(b.id.as_str()))
    });

    let mut cfg = ExportedConfig {
        version: 1,
        exported_at: Some(Utc::now()),
        cron: None,
        jobs,
    };
    if include_engine_state {
        cfg.cron = Some(ExportedCronConfig {
            global_enabled: Some(engine.global_enabled().await),
        });
    }

    Ok(serde_yaml::to_string(&cfg)?)
}

/// List names in the payload that collide with existing jobs, sorted.
pub async fn check_import_conflicts(
    engine: &CronEngine,
    yaml_text: &str,
) -> Result<Vec<String>, ConfigError> {
    let (jobs, _) = parse_payload(yaml_text)?;

    let existing = existing_names(engine).await;
    let mut conflicts: Vec<String> = jobs
        .iter()
        .filter_map(|job| {
            let name = effective_name(job);
            (!name.is_empty() && existing.contains_key(&name)).then_some(name)
        })
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    conflicts.sort();
    Ok(conflicts)
}

/// Import a payload, applying the collision strategy, and return how many
/// jobs were upserted.
pub async fn import_yaml(
    engine: &Arc<CronEngine>,
    yaml_text: &str,
    strategy: ConflictStrategy,
) -> Result<usize, ConfigError> {
    let (jobs, global_enabled) = parse_payload(yaml_text)?;

    let existing = existing_names(engine).await;
    let mut reserved: HashSet<String> = existing.keys().cloned().collect();

    let mut imported = 0;
    for mut job in jobs {
        // Import reset: incoming jobs start with fresh runtime counters and
        // a registry-assigned id unless they overwrite an existing job.
        job.id = Default::default();
        job.consecutive_failures = 0;
        job.executed_count = 0;
        job.last_executed_at = None;

        let name = effective_name(&job);
        if job.name.trim().is_empty() {
            job.name = name.clone();
        }

        if !name.is_empty() {
            if let Some(existing_job) = existing.get(&name) {
                match strategy {
                    ConflictStrategy::Overwrite => {
                        job.id = existing_job.id.clone();
                    }
                    ConflictStrategy::Coexist => {
                        job.name = unique_import_name(&name, &reserved);
                    }
                }
            }
        }

        let upserted = engine.upsert_job(job).await?;
        let final_name = upserted.name.trim().to_string();
        if !final_name.is_empty() {
            reserved.insert(final_name);
        }
        imported += 1;
    }

    if let Some(enabled) = global_enabled {
        engine.set_global_enabled(enabled).await;
    }
    Ok(imported)
}

fn effective_name(job: &Job) -> String {
    let name = job.name.trim();
    if name.is_empty() {
        job.command.trim().to_string()
    } else {
        name.to_string()
    }
}

async fn existing_names(engine: &CronEngine) -> HashMap<String, Job> {
    engine
        .list_jobs()
        .await
        .into_iter()
        .map(|overview| overview.job)
        .filter_map(|job| {
            let name = effective_name(&job);
            (!name.is_empty()).then(|| (name, job))
        })
        .collect()
}

fn unique_import_name(base: &str, reserved: &HashSet<String>) -> String {
    let candidate = format!("{base} (imported)");
    if !reserved.contains(&candidate) {
        return candidate;
    }
    for i in 2..10_000 {
        let candidate = format!("{base} (imported {i})");
        if !reserved.contains(&candidate) {
            return candidate;
        }
    }
    format!("{base} (imported {})", Utc::now().timestamp())
}

/// Accept either a bare job array or the versioned envelope.
fn parse_payload(text: &str) -> Result<(Vec<Job>, Option<bool>), ConfigError> {
    if let Ok(jobs) = serde_yaml::from_str::<Vec<Job>>(text) {
        return Ok((jobs, None));
    }
    let cfg: ExportedConfig = serde_yaml::from_str(text)?;
    let global_enabled = cfg.cron.and_then(|c| c.global_enabled);
    Ok((cfg.jobs, global_enabled))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{JobStore, LogStore};
    use tempfile::{tempdir, TempDir};

    fn test_engine() -> (Arc<CronEngine>, TempDir) {
        let dir = tempdir().unwrap();
        let engine = CronEngine::new(
            JobStore::new(dir.path().join("jobs.json")),
            LogStore::new(dir.path().join("logs.jsonl")),
        );
        (engine, dir)
    }

    fn named_job(name: &str) -> Job {
        Job {
            name: name.into(),
            cron: "0 3 * * *".into(),
            command: "true".into(),
            enabled: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_export_import_round_trip() {
        let (source, _dir) = test_engine();
        source.upsert_job(named_job("alpha")).await.unwrap();
        source.upsert_job(named_job("beta")).await.unwrap();
        source.set_global_enabled(false).await;

        let yaml = export_yaml(&source, true, false).await.unwrap();

        let (target, _dir2) = test_engine();
        let imported = import_yaml(&target, &yaml, ConflictStrategy::Coexist)
            .await
            .unwrap();
        assert_eq!(imported, 2);
        assert!(!target.global_enabled().await);

        let names: Vec<String> = target
            .list_jobs()
            .await
            .into_iter()
            .map(|o| o.job.name)
            .collect();
        assert!(names.contains(&"alpha".to_string()));
        assert!(names.contains(&"beta".to_string()));
    }

    #[tokio::test]
    async fn test_import_bare_array() {
        let (engine, _dir) = test_engine();

        let yaml = r#"
- name: one
  cron: "* * * * *"
  command: "true"
  enabled: true
- name: two
  cron: "@daily"
  command: "echo"
  args: ["hi"]
"#;
        let imported = import_yaml(&engine, yaml, ConflictStrategy::Coexist)
            .await
            .unwrap();
        assert_eq!(imported, 2);
        assert_eq!(engine.list_jobs().await.len(), 2);
    }

    #[tokio::test]
    async fn test_import_coexist_renames_collision() {
        let (engine, _dir) = test_engine();
        engine.upsert_job(named_job("report")).await.unwrap();

        let yaml = export_yaml(&engine, false, false).await.unwrap();
        import_yaml(&engine, &yaml, ConflictStrategy::Coexist)
            .await
            .unwrap();

        let names: Vec<String> = engine
            .list_jobs()
            .await
            .into_iter()
            .map(|o| o.job.name)
            .collect();
        assert!(names.contains(&"report".to_string()));
        assert!(names.contains(&"report (imported)".to_string()));
    }

    #[tokio::test]
    async fn test_import_overwrite_reuses_existing_id() {
        let (engine, _dir) = test_engine();
        let original = engine.upsert_job(named_job("report")).await.unwrap();

        let yaml = r#"
- name: report
  cron: "30 6 * * *"
  command: "generate-report"
"#;
        import_yaml(&engine, yaml, ConflictStrategy::Overwrite)
            .await
            .unwrap();

        let listed = engine.list_jobs().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].job.id, original.id);
        assert_eq!(listed[0].job.command, "generate-report");
        assert_eq!(listed[0].job.cron, "30 6 * * *");
    }

    #[tokio::test]
    async fn test_import_resets_runtime_counters() {
        let (engine, _dir) = test_engine();

        let yaml = r#"
- name: tainted
  cron: "* * * * *"
  command: "true"
  consecutiveFailures: 7
"#;
        import_yaml(&engine, yaml, ConflictStrategy::Coexist)
            .await
            .unwrap();

        let listed = engine.list_jobs().await;
        assert_eq!(listed[0].job.consecutive_failures, 0);
        assert_eq!(listed[0].job.executed_count, 0);
    }

    #[tokio::test]
    async fn test_check_conflicts_lists_colliding_names() {
        let (engine, _dir) = test_engine();
        engine.upsert_job(named_job("b-job")).await.unwrap();
        engine.upsert_job(named_job("a-job")).await.unwrap();

        let yaml = r#"
- name: a-job
  cron: "* * * * *"
  command: "true"
- name: b-job
  cron: "* * * * *"
  command: "true"
- name: fresh
  cron: "* * * * *"
  command: "true"
"#;
        let conflicts = check_import_conflicts(&engine, yaml).await.unwrap();
        assert_eq!(conflicts, vec!["a-job".to_string(), "b-job".to_string()]);
    }

    #[tokio::test]
    async fn test_only_enabled_export_filter() {
        let (engine, _dir) = test_engine();
        engine.upsert_job(named_job("on")).await.unwrap();
        let mut off = named_job("off");
        off.enabled = false;
        engine.upsert_job(off).await.unwrap();

        let yaml = export_yaml(&engine, false, true).await.unwrap();
        let cfg: ExportedConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(cfg.jobs.len(), 1);
        assert_eq!(cfg.jobs[0].name, "on");
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!(
            "coexist".parse::<ConflictStrategy>().unwrap(),
            ConflictStrategy::Coexist
        );
        assert_eq!(
            " OVERWRITE ".parse::<ConflictStrategy>().unwrap(),
            ConflictStrategy::Overwrite
        );
        assert_eq!(
            "".parse::<ConflictStrategy>().unwrap(),
            ConflictStrategy::Coexist
        );
        assert!(matches!(
            "merge".parse::<ConflictStrategy>(),
            Err(ConfigError::InvalidStrategy(_))
        ));
    }

    #[test]
    fn test_unique_import_name_sequence() {
        let mut reserved = HashSet::new();
        reserved.insert("job".to_string());
        assert_eq!(unique_import_name("job", &reserved), "job (imported)");

        reserved.insert("job (imported)".to_string());
        assert_eq!(unique_import_name("job", &reserved), "job (imported 2)");
    }
}
