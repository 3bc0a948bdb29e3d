// Execution Events
// Progress reporting and event types for job plan execution

use crate::execution::executor::{JobStatus, RunCounts, StepStatus};
use crate::parser::models::Phase;

use std::time::Duration;
use tokio::sync::mpsc;

/// Sender for execution progress events
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiver for execution progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Events emitted while a job plan runs.
///
/// Events of different jobs interleave when jobs run concurrently; `number`
/// identifies the job within the plan.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// Run started
    RunStarted { total_jobs: usize, max_parallel: usize },

    /// Run completed
    RunCompleted {
        success: bool,
        counts: RunCounts,
        duration: Duration,
    },

    /// Job execution started
    JobStarted {
        number: usize,
        identity: String,
        total_steps: usize,
    },

    /// Job execution completed (or was cancelled before starting)
    JobCompleted {
        number: usize,
        identity: String,
        status: JobStatus,
        duration: Duration,
    },

    /// Step execution started
    StepStarted {
        number: usize,
        phase: Phase,
        step_index: usize,
        command: String,
    },

    /// Step output line (stdout/stderr)
    StepOutput {
        number: usize,
        phase: Phase,
        step_index: usize,
        line: String,
        is_error: bool,
    },

    /// Step execution completed
    StepCompleted {
        number: usize,
        phase: Phase,
        step_index: usize,
        status: StepStatus,
        duration: Duration,
        exit_code: Option<i32>,
    },
}

impl ExecutionEvent {
    pub fn run_started(total_jobs: usize, max_parallel: usize) -> Self {
        Self::RunStarted {
            total_jobs,
            max_parallel,
        }
    }

    pub fn run_completed(success: bool, counts: RunCounts, duration: Duration) -> Self {
        Self::RunCompleted {
            success,
            counts,
            duration,
        }
    }

    pub fn job_started(number: usize, identity: impl Into<String>, total_steps: usize) -> Self {
        Self::JobStarted {
            number,
            identity: identity.into(),
            total_steps,
        }
    }

    pub fn job_completed(
        number: usize,
        identity: impl Into<String>,
        status: JobStatus,
        duration: Duration,
    ) -> Self {
        Self::JobCompleted {
            number,
            identity: identity.into(),
            status,
            duration,
        }
    }

    pub fn step_started(
        number: usize,
        phase: Phase,
        step_index: usize,
        command: impl Into<String>,
    ) -> Self {
        Self::StepStarted {
            number,
            phase,
            step_index,
            command: command.into(),
        }
    }

    pub fn step_output(
        number: usize,
        phase: Phase,
        step_index: usize,
        line: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::StepOutput {
            number,
            phase,
            step_index,
            line: line.into(),
            is_error,
        }
    }

    pub fn step_completed(
        number: usize,
        phase: Phase,
        step_index: usize,
        status: StepStatus,
        duration: Duration,
        exit_code: Option<i32>,
    ) -> Self {
        Self::StepCompleted {
            number,
            phase,
            step_index,
            status,
            duration,
            exit_code,
        }
    }

    /// Plan number of the job this event belongs to, if any
    pub fn job_number(&self) -> Option<usize> {
        match self {
            Self::RunStarted { .. } | Self::RunCompleted { .. } => None,
            Self::JobStarted { number, .. }
            | Self::JobCompleted { number, .. }
            | Self::StepStarted { number, .. }
            | Self::StepOutput { number, .. }
            | Self::StepCompleted { number, .. } => Some(*number),
        }
    }
}
