//! Consecutive-failure circuit breaker.
//!
//! Invoked once per completed manual or scheduled execution (never for
//! previews). The transition itself is a pure function over the job's
//! counters; the engine persists and re-derives the timer entry based on
//! the reported effect.
//!
//! Per-job state machine along the failure dimension:
//! `Enabled/Healthy` -> (failure) -> `Enabled/Degraded(n)` -> (n reaches the
//! threshold) -> `Disabled`, which is terminal until a manual re-enable.
//! A single success anywhere in `Degraded` returns the job to `Healthy`.

use chrono::{DateTime, Utc};

use crate::core::{Job, DEFAULT_MAX_CONSECUTIVE_FAILURES};

/// What [`apply_outcome`] changed, so the caller knows whether to persist
/// and whether the timer entry must be re-derived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeEffect {
    /// Any observable field changed.
    pub changed: bool,
    /// The `enabled` flag flipped (a breaker trip).
    pub enabled_changed: bool,
}

/// Fold one execution outcome into the job's counters.
///
/// Always increments `executed_count` and records `executed_at` when given.
/// Success resets the consecutive-failure count; a failure increments it and
/// trips the breaker (disables the job) exactly when the count reaches the
/// threshold while the job is enabled.
pub fn apply_outcome(
    job: &mut Job,
    success: bool,
    executed_at: Option<DateTime<Utc>>,
) -> OutcomeEffect {
    if job.max_consecutive_failures == 0 {
        job.max_consecutive_failures = DEFAULT_MAX_CONSECUTIVE_FAILURES;
    }

    let prev_enabled = job.enabled;
    let prev_failures = job.consecutive_failures;
    let prev_max = job.max_consecutive_failures;
    let prev_count = job.executed_count;
    let prev_executed_at = job.last_executed_at;

    job.executed_count += 1;
    if executed_at.is_some() {
        job.last_executed_at = executed_at;
    }

    if success {
        job.consecutive_failures = 0;
    } else {
        job.consecutive_failures += 1;
        if job.enabled && job.consecutive_failures >= job.max_consecutive_failures {
            job.enabled = false;
        }
    }

    let changed = job.enabled != prev_enabled
        || job.consecutive_failures != prev_failures
        || job.max_consecutive_failures != prev_max
        || job.executed_count != prev_count
        || job.last_executed_at != prev_executed_at;

    OutcomeEffect {
        changed,
        enabled_changed: job.enabled != prev_enabled,
    }
}
