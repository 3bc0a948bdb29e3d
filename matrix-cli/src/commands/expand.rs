use crate::output;

use std::path::PathBuf;

use clap::{Args, ValueEnum};
use color_eyre::Result;

use matrix_service::{JobPlan, PlannedJob};

/// Print the expanded job list
#[derive(Args, Debug)]
pub struct ExpandArgs {
    /// Path to the matrix YAML document
    pub document: PathBuf,

    /// Output format
    #[arg(long, short = 'f', value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Yaml,
}

pub fn execute(args: ExpandArgs) -> Result<()> {
    let document = super::load_document(&args.document)?;
    let plan = super::build_plan(&document);

    match args.format {
        OutputFormat::Json => println!("{}", plan.to_json()?),
        OutputFormat::Yaml => print!("{}", plan.to_yaml()?),
        OutputFormat::Text => print_text(&plan),
    }

    Ok(())
}

fn print_text(plan: &JobPlan) {
    if plan.is_empty() {
        output::warning("Matrix produces no jobs");
        return;
    }

    for planned in plan.iter() {
        print_job(planned);
    }

    output::info(&format!(
        "{} jobs ({} from matrix, {} excluded, {} included)",
        plan.len(),
        plan.summary.surviving(),
        plan.summary.excluded,
        plan.summary.included
    ));
}

fn print_job(planned: &PlannedJob) {
    let job = &planned.job;
    let origin = if job.is_include() { " (include)" } else { "" };
    println!("#{:<3} {}{}", planned.number, job.identity, origin);

    for (name, value) in &job.env {
        println!("      env {}={}", name, value);
    }
    for phase in &job.phases {
        for step in &phase.steps {
            println!("      {:<14} {}", phase.phase.as_str(), step);
        }
    }
}
