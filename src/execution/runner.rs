//! Single-process execution: spawn, bounded output capture, timeout race,
//! forced kill.
//!
//! The runner knows nothing about the registry or concurrency policies; it
//! takes a fully-normalized [`Job`] (or an ad-hoc preview rendered as one)
//! and produces the [`JobLogEntry`] describing what happened. Reservation
//! and deregistration are the engine's responsibility.

use chrono::Utc;
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::process::build_command;
use crate::core::{Job, JobLogEntry, OUTPUT_CAPTURE_CAP};

/// Execute the job's command once and describe the outcome.
///
/// The `kill` token is the external termination handle (`kill_old`); a
/// timeout is raced internally when `timeout_seconds > 0`. In every forced
/// termination path the kill is awaited before returning, so the caller can
/// rely on the process being gone.
pub async fn run_process(job: &Job, kill: CancellationToken) -> JobLogEntry {
    let mut entry = JobLogEntry::new(job.id.clone(), &job.name);
    entry.command_line = job.command_line();
    entry.started_at = Some(Utc::now());

    let mut cmd = build_command(
        &job.command,
        &job.args,
        &job.work_dir,
        job.process_creation_mode,
    );

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            entry.exit_code = -1;
            entry.error = format!("failed to start: {e}");
            entry.finished_at = Some(Utc::now());
            return entry;
        }
    };

    let stdout_task = child.stdout.take().map(capture_capped);
    let stderr_task = child.stderr.take().map(capture_capped);

    enum WaitOutcome {
        Exited(std::io::Result<std::process::ExitStatus>),
        TimedOut,
        Killed,
    }

    // Race exit against the timeout and the external kill signal. The wait
    // future is pinned in its own scope so the child can be re-borrowed for
    // the forced-kill path afterwards.
    let outcome = {
        let wait = child.wait();
        tokio::pin!(wait);
        if job.timeout_seconds > 0 {
            let limit = std::time::Duration::from_secs(job.timeout_seconds);
            tokio::select! {
                res = &mut wait => WaitOutcome::Exited(res),
                _ = tokio::time::sleep(limit) => WaitOutcome::TimedOut,
                _ = kill.cancelled() => WaitOutcome::Killed,
            }
        } else {
            tokio::select! {
                res = &mut wait => WaitOutcome::Exited(res),
                _ = kill.cancelled() => WaitOutcome::Killed,
            }
        }
    };

    let mut timed_out = false;
    let mut killed = false;
    let wait_result = match outcome {
        WaitOutcome::Exited(res) => res,
        WaitOutcome::TimedOut => {
            timed_out = true;
            let _ = child.start_kill();
            child.wait().await
        }
        WaitOutcome::Killed => {
            killed = true;
            let _ = child.start_kill();
            child.wait().await
        }
    };

    if timed_out {
        entry.exit_code = -1;
        entry.error = format!("timeout after {}s", job.timeout_seconds);
    } else if killed {
        entry.exit_code = -1;
        entry.error = "process killed".into();
    } else {
        match wait_result {
            Ok(status) if status.success() => {}
            Ok(status) => {
                entry.exit_code = status.code().unwrap_or(-1);
                entry.error = format!("exit status {}", entry.exit_code);
            }
            Err(e) => {
                entry.exit_code = -1;
                entry.error = e.to_string();
            }
        }
    }

    entry.finished_at = Some(Utc::now());

    if let Some(task) = stdout_task {
        entry.stdout = collect_output(task).await;
    }
    if let Some(task) = stderr_task {
        entry.stderr = collect_output(task).await;
    }

    entry
}

/// Read a child output stream into a capped buffer.
///
/// The first [`OUTPUT_CAPTURE_CAP`] bytes are kept; the rest of the stream
/// is still drained so the child never blocks on a full pipe.
fn capture_capped<R>(mut reader: R) -> JoinHandle<Vec<u8>>
where
    R: AsyncReadExt + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut captured = Vec::new();
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if captured.len() < OUTPUT_CAPTURE_CAP {
                        let take = n.min(OUTPUT_CAPTURE_CAP - captured.len());
                        captured.extend_from_slice(&buf[..take]);
                    }
                }
            }
        }
        captured
    })
}

async fn collect_output(task: JoinHandle<Vec<u8>>) -> String {
    match task.await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(_) => String::new(),
    }
}
