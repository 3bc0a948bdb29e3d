pub mod expand;
pub mod run;
pub mod validate;

use crate::output;

use std::path::Path;

use color_eyre::Result;

use matrix_service::{DocumentParser, JobPlan, MatrixDocument, ServiceError};

/// Read a matrix document, exiting with a located report on parse errors
pub fn load_document(path: &Path) -> Result<MatrixDocument> {
    if !path.exists() {
        color_eyre::eyre::bail!("Matrix document not found: {}", path.display());
    }

    match DocumentParser::from_file(path) {
        Ok(document) => Ok(document),
        Err(ServiceError::Io(e)) => {
            color_eyre::eyre::bail!("Failed to read {}: {}", path.display(), e)
        }
        Err(e) => exit_with(&e),
    }
}

/// Build the job plan for a document, exiting with a report on configuration errors
pub fn build_plan(document: &MatrixDocument) -> JobPlan {
    JobPlan::build(document).unwrap_or_else(|e| exit_with(&e))
}

/// Print a service error the way the other commands format problems
pub fn report(err: &ServiceError) {
    match err {
        ServiceError::Parse(e) => {
            output::error(&format!("{} (line {}:{})", e.message, e.line, e.column));
            if !e.context.is_empty() {
                output::detail(&e.context);
            }
            if let Some(suggestion) = &e.suggestion {
                output::info(&format!("help: {}", suggestion));
            }
        }
        ServiceError::Configuration(e) => {
            output::error(&format!("[{}] {}", e.subject, e.message));
            if let Some(suggestion) = &e.suggestion {
                output::info(&format!("help: {}", suggestion));
            }
        }
        other => output::error(&other.to_string()),
    }
}

fn exit_with(err: &ServiceError) -> ! {
    report(err);
    std::process::exit(1);
}
