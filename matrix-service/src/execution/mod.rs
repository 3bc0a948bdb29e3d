// Execution Module
// Matrix expansion, job materialization, planning, and the reference job executor

pub mod events;
pub mod executor;
pub mod materializer;
pub mod matrix;
pub mod plan;

// Re-export key types
pub use events::{progress_channel, ExecutionEvent, ProgressReceiver, ProgressSender};
pub use executor::{
    ExecutorConfig, JobExecutor, JobResult, JobStatus, RunCounts, RunResult, StepResult,
    StepStatus,
};
pub use materializer::{Job, JobMaterializer, JobOrigin, PhaseSteps};
pub use matrix::{ExpansionSummary, JobDescriptor, MatrixExpander};
pub use plan::{JobPlan, PlannedJob};
