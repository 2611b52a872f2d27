//! Process construction and the platform visibility-flag adapter.
//!
//! The [`ProcessCreationMode`] hint maps to Windows creation flags; on every
//! other platform it is a no-op.

use std::process::Stdio;
use tokio::process::Command;

use crate::core::ProcessCreationMode;

/// Build the child-process command for an execution: arguments, working
/// directory, piped output, and the platform visibility hint.
pub fn build_command(
    program: &str,
    args: &[String],
    work_dir: &str,
    mode: ProcessCreationMode,
) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args);
    if !work_dir.trim().is_empty() {
        cmd.current_dir(work_dir);
    }
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    // The child must not outlive a cancelled execution future.
    cmd.kill_on_drop(true);
    apply_creation_mode(&mut cmd, mode);
    cmd
}

#[cfg(windows)]
fn apply_creation_mode(cmd: &mut Command, mode: ProcessCreationMode) {
    const CREATE_NEW_CONSOLE: u32 = 0x0000_0010;
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;

    match mode {
        ProcessCreationMode::Inherit => {}
        ProcessCreationMode::NewConsole => {
            cmd.creation_flags(CREATE_NEW_CONSOLE);
        }
        ProcessCreationMode::Detached => {
            cmd.creation_flags(DETACHED_PROCESS);
        }
        ProcessCreationMode::NoWindow => {
            cmd.creation_flags(CREATE_NO_WINDOW);
        }
    }
}

#[cfg(not(windows))]
fn apply_creation_mode(_cmd: &mut Command, _mode: ProcessCreationMode) {}
