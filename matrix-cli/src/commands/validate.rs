use crate::commands::report;
use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

use matrix_service::{JobPlan, MatrixExpander, Phase};

/// Validate a matrix document
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the matrix YAML document
    pub document: PathBuf,
}

pub fn execute(args: ValidateArgs) -> Result<()> {
    let document_path = &args.document;

    // Step 1: Parse YAML and document structure
    output::status("Validating", &format!("{}", document_path.display()));
    let document = super::load_document(document_path)?;
    output::check("YAML syntax and structure valid");

    // Step 2: Expand the matrix
    let matrix = &document.matrix;
    let axes: Vec<String> = matrix
        .axes
        .iter()
        .map(|axis| format!("{} ({})", axis.name, axis.values.len()))
        .collect();
    output::check(&format!(
        "Axes: {}",
        if axes.is_empty() {
            "none".to_string()
        } else {
            axes.join(" x ")
        }
    ));

    let (_, summary) = MatrixExpander::expand_with_summary(matrix);
    output::check(&format!(
        "Expansion: {} combinations, {} excluded, {} included",
        summary.total, summary.excluded, summary.included
    ));

    for (idx, rule) in matrix.exclude.iter().enumerate() {
        let inert = rule.constraints.iter().any(|(axis, value)| {
            matrix
                .axis(axis)
                .map_or(true, |a| !a.values.iter().any(|v| v.matches(value)))
        });
        if inert {
            output::warning(&format!(
                "exclude[{}] references an axis or value that is not declared and matches nothing",
                idx
            ));
        }
    }

    // Step 3: Materialize every job
    let plan = match JobPlan::build(&document) {
        Ok(plan) => plan,
        Err(e) => {
            report(&e);
            std::process::exit(1);
        }
    };

    let steps: usize = plan.iter().map(|p| p.job.step_count()).sum();
    output::check(&format!(
        "Materialization: {} jobs, {} steps",
        plan.len(),
        steps
    ));

    if document.defaults.phase(Phase::Script).is_none() {
        output::info("no top-level 'script' default; every job declares its own");
    }

    println!();
    if plan.is_empty() {
        output::warning("Document is valid but produces no jobs");
    } else {
        output::success("Matrix document is valid");
    }

    Ok(())
}
