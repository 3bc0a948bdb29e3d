use crate::output;

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use color_eyre::Result;
use tracing::debug;

use matrix_service::execution::events::progress_channel;
use matrix_service::execution::{RunCounts, StepStatus};
use matrix_service::{ExecutionEvent, ExecutorConfig, JobExecutor, JobStatus, Shell};

/// Run the expanded jobs locally
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the matrix YAML document
    pub document: PathBuf,

    /// Maximum number of jobs running at once (defaults to available CPUs)
    #[arg(long, short = 'j', value_name = "N")]
    pub jobs: Option<usize>,

    /// Run only the given job, by number or identity (can be repeated)
    #[arg(long = "job", value_name = "JOB")]
    pub selectors: Vec<String>,

    /// Stop starting new jobs after the first failure
    #[arg(long)]
    pub fail_fast: bool,

    /// Working directory for execution
    #[arg(long, short = 'w', value_name = "DIR")]
    pub working_dir: Option<PathBuf>,

    /// Kill any step running longer than this many seconds
    #[arg(long, value_name = "SECONDS")]
    pub step_timeout: Option<u64>,

    /// Shell used for step commands (sh, bash, pwsh)
    #[arg(long, default_value = "sh")]
    pub shell: String,
}

pub async fn execute(args: RunArgs) -> Result<()> {
    let Some(shell) = Shell::from_name(&args.shell) else {
        color_eyre::eyre::bail!(
            "Unknown shell '{}'. Expected one of: sh, bash, pwsh",
            args.shell
        );
    };

    // Resolve working directory
    let working_dir = match &args.working_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };

    // Parse and plan the document
    output::status("Parsing", &format!("{}", args.document.display()));
    let document = super::load_document(&args.document)?;
    let mut plan = super::build_plan(&document);

    if !args.selectors.is_empty() {
        plan = plan.select(&args.selectors);
        if plan.is_empty() {
            color_eyre::eyre::bail!(
                "No job matches {}",
                args.selectors
                    .iter()
                    .map(|s| format!("'{}'", s))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
    }

    if plan.is_empty() {
        output::warning("Matrix produces no jobs, nothing to run");
        return Ok(());
    }

    let mut config = ExecutorConfig {
        fail_fast: args.fail_fast,
        working_dir,
        step_timeout: args.step_timeout.map(Duration::from_secs),
        shell,
        ..ExecutorConfig::default()
    };
    if let Some(jobs) = args.jobs {
        config.max_parallel = jobs.max(1);
    }
    debug!(
        jobs = plan.len(),
        max_parallel = config.max_parallel,
        fail_fast = config.fail_fast,
        working_dir = %config.working_dir.display(),
        "executor configured"
    );

    // Create progress channel and executor
    let (tx, mut rx) = progress_channel();
    let executor = JobExecutor::new(config).with_progress(tx);

    // Spawn execution in background
    let exec_handle = tokio::spawn(async move { executor.execute(&plan).await });

    // Process events in the foreground
    let mut overall_success = true;
    while let Some(event) = rx.recv().await {
        match &event {
            ExecutionEvent::RunStarted {
                total_jobs,
                max_parallel,
            } => {
                println!();
                output::header(&format!(
                    "Running {} jobs ({} at a time)",
                    total_jobs, max_parallel
                ));
            }

            ExecutionEvent::RunCompleted {
                success,
                counts,
                duration,
            } => {
                println!();
                overall_success = *success;
                let summary = summarize(counts);
                if *success {
                    output::success(&format!(
                        "All jobs passed in {:.2}s ({})",
                        duration.as_secs_f64(),
                        summary
                    ));
                } else {
                    output::failure(&format!(
                        "Run failed after {:.2}s ({})",
                        duration.as_secs_f64(),
                        summary
                    ));
                }
            }

            ExecutionEvent::JobStarted {
                number,
                identity,
                total_steps,
            } => {
                output::job_header(*number, &format!("{} ({} steps)", identity, total_steps));
            }

            ExecutionEvent::JobCompleted {
                number,
                identity,
                status,
                duration,
            } => {
                let line = format!(
                    "  Job #{} {} {} ({:.2}s)",
                    number,
                    identity,
                    status.to_string().to_uppercase(),
                    duration.as_secs_f64()
                );
                match status {
                    JobStatus::Passed => output::dim_success(&line),
                    JobStatus::Cancelled => output::warning(&line),
                    JobStatus::Failed | JobStatus::Errored => output::dim_failure(&line),
                }
            }

            ExecutionEvent::StepStarted {
                number,
                phase,
                command,
                ..
            } => {
                output::dim(&format!("   #{:<3}[{}] $ {}", number, phase, command));
            }

            ExecutionEvent::StepOutput {
                number,
                line,
                is_error,
                ..
            } => {
                if *is_error {
                    output::step_error(*number, line);
                } else {
                    output::step_output(*number, line);
                }
            }

            ExecutionEvent::StepCompleted {
                number,
                phase,
                status,
                duration,
                exit_code,
                ..
            } => {
                let exit_info = match exit_code {
                    Some(code) if *code != 0 => format!(" (exit code: {})", code),
                    _ => String::new(),
                };
                match status {
                    StepStatus::Succeeded => {}
                    StepStatus::Failed => output::dim_failure(&format!(
                        "   #{:<3}[{}] FAIL ({:.2}s){}",
                        number,
                        phase,
                        duration.as_secs_f64(),
                        exit_info
                    )),
                    StepStatus::TimedOut => output::dim_failure(&format!(
                        "   #{:<3}[{}] TIMEOUT ({:.2}s)",
                        number,
                        phase,
                        duration.as_secs_f64()
                    )),
                }
            }
        }
    }

    // Wait for executor to finish
    let result = exec_handle.await?;
    for job in result.jobs.iter().filter(|j| !j.status.is_success()) {
        output::failure(&format!("#{} {}: {}", job.number, job.identity, job.status));
    }

    if !overall_success {
        std::process::exit(1);
    }

    Ok(())
}

fn summarize(counts: &RunCounts) -> String {
    format!(
        "{} passed, {} failed, {} errored, {} cancelled",
        counts.passed, counts.failed, counts.errored, counts.cancelled
    )
}
