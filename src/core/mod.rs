//! Core domain types: jobs, schedules, identifiers, and log records.

pub mod job;
pub mod log_entry;
pub mod schedule;
pub mod types;

pub use job::{
    ConcurrencyPolicy, Job, PreviewRequest, ProcessCreationMode, render_command_line,
    DEFAULT_MAX_CONSECUTIVE_FAILURES,
};
pub use log_entry::{JobLogEntry, OUTPUT_CAPTURE_CAP};
pub use schedule::{Schedule, ScheduleError};
pub use types::{InstanceId, JobId};
