// Matrix Service Library
// Build-matrix expansion and job materialization for CI configuration documents

pub mod error;
pub mod execution;
pub mod parser;
pub mod runners;

// Re-export commonly used types
pub use error::{ServiceError, ServiceResult};

// Re-export parser types
pub use parser::{
    Axis, ConfigurationError, ConfigurationErrorKind, DocumentParser, ExcludeRule, IncludeJob,
    Lifecycle, Matrix, MatrixDocument, ParseError, ParseErrorKind, Phase, Value,
};

// Re-export execution types
pub use execution::{
    ExecutionEvent, ExecutorConfig, ExpansionSummary, Job, JobDescriptor, JobExecutor,
    JobMaterializer, JobPlan, JobStatus, MatrixExpander, PlannedJob, RunResult,
};

// Re-export runner types
pub use runners::{Shell, ShellRunner};
