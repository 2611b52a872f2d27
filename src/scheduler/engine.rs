//! The scheduling engine: job registry, live timer entries, execution
//! reservations, and the global pause switch.
//!
//! One exclusive lock guards the job map, the timer-entry map, and the
//! running-instance table, so "is this job already running" is atomic with
//! "mark it as running". The execution log has its own lock; log I/O never
//! blocks registry mutations. Process spawn and wait happen outside any
//! lock, one task per execution.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::breaker;
use crate::core::{
    ConcurrencyPolicy, InstanceId, Job, JobId, JobLogEntry, PreviewRequest, Schedule,
    DEFAULT_MAX_CONSECUTIVE_FAILURES,
};
use crate::events::ExecutedNotifier;
use crate::execution::run_process;
use crate::storage::{JobStore, LogStore, StorageError};

/// Errors surfaced by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The job was rejected before any state mutation.
    #[error("invalid job: {0}")]
    Validation(String),

    /// Operation on an unknown job id.
    #[error("job not found: {0}")]
    NotFound(JobId),

    /// Manual trigger rejected by a `skip` concurrency policy.
    #[error("job is already running: {0}")]
    AlreadyRunning(JobId),

    /// Snapshot or log persistence failure. In-memory state is not rolled
    /// back; memory stays ahead of disk until the next successful write.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A job annotated with its computed next fire time.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOverview {
    #[serde(flatten)]
    pub job: Job,
    /// Upcoming fire instant: the live timer entry's when one exists, else
    /// re-derived from the cron expression against now.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
}

/// Where a trigger came from; decides whether a `skip` rejection surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Manual,
    Scheduled,
}

/// A live timer entry for one enabled job. Dropping the entry aborts the
/// timer task, so removal from the entry map is teardown.
struct TimerEntry {
    next_at: Arc<std::sync::Mutex<Option<DateTime<Utc>>>>,
    task: JoinHandle<()>,
}

impl Drop for TimerEntry {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// One in-flight execution, registered before spawn so concurrency checks
/// can never race past a reservation.
struct RunningInstance {
    kill: CancellationToken,
}

#[derive(Default)]
struct EngineState {
    jobs: HashMap<JobId, Job>,
    entries: HashMap<JobId, TimerEntry>,
    running: HashMap<JobId, HashMap<InstanceId, RunningInstance>>,
    global_enabled: bool,
}

/// The scheduling-and-execution engine.
pub struct CronEngine {
    state: Mutex<EngineState>,
    job_store: JobStore,
    logs: Mutex<LogStore>,
    notifier: ExecutedNotifier,
}

impl CronEngine {
    /// Create an engine over the given stores. Starts globally enabled with
    /// an empty registry; call [`CronEngine::load`] to restore the snapshot.
    pub fn new(job_store: JobStore, log_store: LogStore) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(EngineState {
                global_enabled: true,
                ..Default::default()
            }),
            job_store,
            logs: Mutex::new(log_store),
            notifier: ExecutedNotifier::new(),
        })
    }

    /// Restore the job collection from the snapshot file and re-derive timer
    /// entries for enabled jobs.
    pub async fn load(self: &Arc<Self>) -> Result<(), EngineError> {
        let jobs = self.job_store.load().await?;
        let mut state = self.state.lock().await;
        for mut job in jobs {
            job.normalize();
            let id = job.id.clone();
            state.jobs.insert(id.clone(), job);
            self.reschedule_locked(&mut state, &id);
        }
        Ok(())
    }

    /// Attach a subscriber for execution-completion notifications.
    pub fn subscribe_executed(
        &self,
        buffer: usize,
    ) -> tokio::sync::mpsc::Receiver<JobLogEntry> {
        self.notifier.subscribe(buffer)
    }

    /// Whether scheduled triggering is globally active.
    pub async fn global_enabled(&self) -> bool {
        self.state.lock().await.global_enabled
    }

    /// Flip the engine-wide pause switch. A no-op when unchanged.
    ///
    /// Disabling tears down every live timer entry but leaves each job's own
    /// `enabled` flag and counters untouched; enabling re-derives an entry
    /// for every currently-enabled job.
    pub async fn set_global_enabled(self: &Arc<Self>, enabled: bool) {
        let mut state = self.state.lock().await;
        if state.global_enabled == enabled {
            return;
        }
        state.global_enabled = enabled;

        if !enabled {
            state.entries.clear();
            tracing::info!("scheduling globally disabled");
            return;
        }

        let ids: Vec<JobId> = state.jobs.keys().cloned().collect();
        for id in ids {
            self.reschedule_locked(&mut state, &id);
        }
        tracing::info!("scheduling globally enabled");
    }

    /// Insert or update a job.
    ///
    /// Rejects a blank cron expression or command, and an unparsable cron
    /// expression, before any state mutation. On update the runtime counters
    /// are carried forward, as are the concurrency policy and failure
    /// threshold when the caller left them unset. Persists the full snapshot
    /// and re-derives the job's timer entry.
    pub async fn upsert_job(self: &Arc<Self>, mut job: Job) -> Result<Job, EngineError> {
        if job.cron.trim().is_empty() {
            return Err(EngineError::Validation("cron is required".into()));
        }
        if job.command.trim().is_empty() {
            return Err(EngineError::Validation("command is required".into()));
        }
        Schedule::parse(&job.cron)
            .map_err(|e| EngineError::Validation(format!("invalid cron: {e}")))?;

        let mut state = self.state.lock().await;

        if job.id.is_empty() {
            job.id = JobId::generate();
        }
        if let Some(prev) = state.jobs.get(&job.id) {
            job.consecutive_failures = prev.consecutive_failures;
            job.executed_count = prev.executed_count;
            job.last_executed_at = prev.last_executed_at;
            if job.concurrency_policy.is_none() {
                job.concurrency_policy = prev.concurrency_policy;
            }
            if job.max_consecutive_failures == 0 {
                job.max_consecutive_failures = prev.max_consecutive_failures;
            }
        }
        job.normalize();

        let id = job.id.clone();
        state.jobs.insert(id.clone(), job.clone());
        self.persist_locked(&state).await?;
        self.reschedule_locked(&mut state, &id);
        Ok(job)
    }

    /// Remove a job and its timer entry. Idempotent: unknown ids are not an
    /// error.
    pub async fn delete_job(&self, id: &JobId) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        state.jobs.remove(id);
        state.entries.remove(id);
        self.persist_locked(&state).await
    }

    /// Enable or disable one job.
    ///
    /// Enabling resets the consecutive-failure count and restores the
    /// default failure threshold if unset. The timer entry is re-derived
    /// either way.
    pub async fn set_job_enabled(
        self: &Arc<Self>,
        id: &JobId,
        enabled: bool,
    ) -> Result<Job, EngineError> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(id.clone()))?;

        job.enabled = enabled;
        if enabled {
            job.consecutive_failures = 0;
            if job.max_consecutive_failures == 0 {
                job.max_consecutive_failures = DEFAULT_MAX_CONSECUTIVE_FAILURES;
            }
        }
        let job = job.clone();

        self.persist_locked(&state).await?;
        self.reschedule_locked(&mut state, id);
        Ok(job)
    }

    /// Update a job's display folder. Persists; no timer change.
    pub async fn set_job_folder(
        &self,
        id: &JobId,
        folder: &str,
    ) -> Result<Job, EngineError> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(id.clone()))?;
        job.folder = folder.trim().to_string();
        let job = job.clone();

        self.persist_locked(&state).await?;
        Ok(job)
    }

    /// Snapshot all jobs, each annotated with its computed next fire time.
    pub async fn list_jobs(&self) -> Vec<JobOverview> {
        let state = self.state.lock().await;
        let now = Utc::now();
        let mut jobs: Vec<JobOverview> = state
            .jobs
            .values()
            .map(|job| JobOverview {
                job: job.clone(),
                next_run_at: Self::next_run_at_locked(&state, job, now),
            })
            .collect();
        jobs.sort_by(|a, b| a.job.name.cmp(&b.job.name));
        jobs
    }

    /// Compute the next fire time for one job: the live timer entry's
    /// recorded instant is authoritative; re-parsing the expression against
    /// `now` is the fallback when no entry exists (job or engine disabled).
    fn next_run_at_locked(
        state: &EngineState,
        job: &Job,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if let Some(entry) = state.entries.get(&job.id) {
            if let Some(next) = entry.next_at.lock().ok().and_then(|slot| *slot) {
                return Some(next);
            }
        }
        Schedule::parse(&job.cron)
            .ok()
            .and_then(|s| s.next_after(now).ok())
    }

    /// Compute the next fire instant of a candidate expression. Pure; no
    /// side effects on the registry.
    pub fn preview_next_run(expression: &str) -> Result<DateTime<Utc>, EngineError> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(EngineError::Validation("cron is required".into()));
        }
        let schedule = Schedule::parse(trimmed)
            .map_err(|e| EngineError::Validation(format!("invalid cron: {e}")))?;
        schedule
            .next()
            .map_err(|_| EngineError::Validation("failed to compute next run".into()))
    }

    /// Run a job immediately on behalf of a caller.
    ///
    /// Unlike the scheduled path, a `skip`-policy rejection surfaces as
    /// [`EngineError::AlreadyRunning`]. The outcome feeds the circuit
    /// breaker, is appended to the log, and is published to subscribers.
    pub async fn run_now(self: &Arc<Self>, id: &JobId) -> Result<JobLogEntry, EngineError> {
        let job = {
            let state = self.state.lock().await;
            state
                .jobs
                .get(id)
                .cloned()
                .ok_or_else(|| EngineError::NotFound(id.clone()))?
        };

        let entry = self
            .run_with_policy(job, Trigger::Manual)
            .await?
            .ok_or_else(|| EngineError::AlreadyRunning(id.clone()))?;

        if let Err(e) = self
            .apply_execution_result(id, entry.success(), entry.finished_at)
            .await
        {
            tracing::warn!(job_id = %id, error = %e, "failed to record execution result");
        }
        self.logs.lock().await.append(&entry).await?;
        self.notifier.publish(entry.clone());
        Ok(entry)
    }

    /// Execute an ad-hoc command without touching the registry, the running
    /// table, or the failure counters. The outcome is still logged and
    /// published.
    pub async fn run_preview(&self, req: PreviewRequest) -> Result<JobLogEntry, EngineError> {
        if req.command.trim().is_empty() {
            return Err(EngineError::Validation("command is required".into()));
        }

        let mut job = Job {
            id: req
                .job_id
                .unwrap_or_else(|| JobId::new(format!("preview-{}", Uuid::new_v4()))),
            name: req.job_name.unwrap_or_default(),
            command: req.command,
            args: req.args,
            work_dir: req.work_dir,
            process_creation_mode: req.process_creation_mode,
            timeout_seconds: req.timeout_seconds,
            enabled: true,
            ..Default::default()
        };
        job.normalize();

        let entry = run_process(&job, CancellationToken::new()).await;
        self.logs.lock().await.append(&entry).await?;
        self.notifier.publish(entry.clone());
        Ok(entry)
    }

    /// Scheduled-path trigger: failures are recorded, never escalated, and a
    /// `skip` rejection is silent since no caller is waiting.
    pub async fn run_scheduled(self: &Arc<Self>, id: &JobId) {
        let job = {
            let state = self.state.lock().await;
            if !state.global_enabled {
                return;
            }
            match state.jobs.get(id) {
                Some(job) if job.enabled => job.clone(),
                _ => return,
            }
        };

        let entry = match self.run_with_policy(job, Trigger::Scheduled).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                tracing::debug!(job_id = %id, "scheduled trigger skipped, already running");
                return;
            }
            Err(e) => {
                tracing::warn!(job_id = %id, error = %e, "scheduled trigger failed");
                return;
            }
        };

        if let Err(e) = self
            .apply_execution_result(id, entry.success(), entry.finished_at)
            .await
        {
            tracing::warn!(job_id = %id, error = %e, "failed to record execution result");
        }
        match self.logs.lock().await.append(&entry).await {
            Ok(()) => self.notifier.publish(entry),
            Err(e) => tracing::warn!(job_id = %id, error = %e, "failed to append log entry"),
        }
    }

    /// Reserve an execution slot per the job's concurrency policy, run the
    /// process, and release the slot. Returns `None` when a `skip` policy
    /// dropped the trigger.
    async fn run_with_policy(
        self: &Arc<Self>,
        job: Job,
        trigger: Trigger,
    ) -> Result<Option<JobLogEntry>, EngineError> {
        let policy = job.policy();

        if policy == ConcurrencyPolicy::KillOld {
            let stale: Vec<CancellationToken> = {
                let state = self.state.lock().await;
                state
                    .running
                    .get(&job.id)
                    .map(|instances| instances.values().map(|i| i.kill.clone()).collect())
                    .unwrap_or_default()
            };
            for token in stale {
                token.cancel();
            }
        }

        // Check-and-register under one critical section: no concurrent
        // trigger can pass the skip check while this one is still spawning.
        let kill = CancellationToken::new();
        let instance_id = {
            let mut state = self.state.lock().await;
            if policy == ConcurrencyPolicy::Skip
                && state.running.get(&job.id).is_some_and(|m| !m.is_empty())
            {
                return Ok(None);
            }
            let instance_id = InstanceId::new();
            state
                .running
                .entry(job.id.clone())
                .or_default()
                .insert(instance_id, RunningInstance { kill: kill.clone() });
            instance_id
        };

        if trigger == Trigger::Scheduled {
            tracing::debug!(job_id = %job.id, %instance_id, "scheduled execution starting");
        }

        let entry = run_process(&job, kill).await;

        // Release the reservation on every path, including timeouts and
        // forced kills.
        {
            let mut state = self.state.lock().await;
            if let Some(instances) = state.running.get_mut(&job.id) {
                instances.remove(&instance_id);
                if instances.is_empty() {
                    state.running.remove(&job.id);
                }
            }
        }

        Ok(Some(entry))
    }

    /// Circuit-breaker hook: fold one outcome into the job's counters,
    /// persist when something observable changed, and tear down the timer
    /// entry if the job just auto-disabled.
    async fn apply_execution_result(
        self: &Arc<Self>,
        id: &JobId,
        success: bool,
        executed_at: Option<DateTime<Utc>>,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        let Some(job) = state.jobs.get_mut(id) else {
            return Ok(());
        };

        let effect = breaker::apply_outcome(job, success, executed_at);
        if !effect.changed {
            return Ok(());
        }
        if effect.enabled_changed {
            tracing::warn!(job_id = %id, "circuit breaker tripped, job disabled");
        }

        self.persist_locked(&state).await?;
        if effect.enabled_changed {
            self.reschedule_locked(&mut state, id);
        }
        Ok(())
    }

    /// Tail the execution log, optionally filtered by job id.
    pub async fn list_logs(
        &self,
        job_id: Option<&JobId>,
        limit: usize,
    ) -> Result<Vec<JobLogEntry>, EngineError> {
        Ok(self.logs.lock().await.tail(job_id, limit).await?)
    }

    /// Truncate the execution log.
    pub async fn clear_logs(&self) -> Result<(), EngineError> {
        Ok(self.logs.lock().await.clear().await?)
    }

    /// Remove every job, every timer entry, the snapshot, and the log.
    pub async fn reset_all(&self) -> Result<(), EngineError> {
        {
            let mut state = self.state.lock().await;
            state.entries.clear();
            state.jobs.clear();
            self.persist_locked(&state).await?;
        }
        self.clear_logs().await
    }

    /// Tear down all timer entries; in-flight executions are not cancelled.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        state.entries.clear();
    }

    async fn persist_locked(&self, state: &EngineState) -> Result<(), EngineError> {
        let jobs: Vec<Job> = state.jobs.values().cloned().collect();
        Ok(self.job_store.save(&jobs).await?)
    }

    /// Remove-then-recreate the live timer entry for one job. The entry is
    /// only recreated when the job is enabled and the engine is globally
    /// enabled.
    fn reschedule_locked(self: &Arc<Self>, state: &mut EngineState, id: &JobId) {
        state.entries.remove(id);

        if !state.global_enabled {
            return;
        }
        let Some(job) = state.jobs.get(id) else {
            return;
        };
        if !job.enabled {
            return;
        }

        let schedule = match Schedule::parse(&job.cron) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(job_id = %id, error = %e, "cannot schedule job with invalid cron");
                return;
            }
        };

        let next_at = Arc::new(std::sync::Mutex::new(None));
        let task = self.spawn_timer(id.clone(), schedule, Arc::clone(&next_at));
        state.entries.insert(id.clone(), TimerEntry { next_at, task });
    }

    /// One timer task per enabled job: record the upcoming fire instant,
    /// sleep until it, trigger the scheduled path in its own task, repeat.
    /// Holds only a weak engine reference so teardown is never cyclic.
    fn spawn_timer(
        self: &Arc<Self>,
        job_id: JobId,
        schedule: Schedule,
        next_at: Arc<std::sync::Mutex<Option<DateTime<Utc>>>>,
    ) -> JoinHandle<()> {
        let weak: Weak<CronEngine> = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let now = Utc::now();
                let next = match schedule.next_after(now) {
                    Ok(next) => next,
                    Err(e) => {
                        tracing::warn!(job_id = %job_id, error = %e, "schedule has no upcoming occurrence");
                        break;
                    }
                };
                if let Ok(mut slot) = next_at.lock() {
                    *slot = Some(next);
                }

                let delay = (next - now)
                    .to_std()
                    .unwrap_or(std::time::Duration::ZERO);
                tokio::time::sleep(delay).await;

                let Some(engine) = weak.upgrade() else {
                    break;
                };
                let id = job_id.clone();
                // Execution gets its own task so a long-running job never
                // blocks this timer (or its own removal).
                tokio::spawn(async move {
                    engine.run_scheduled(&id).await;
                });
            }
        })
    }
}
