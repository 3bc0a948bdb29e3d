// Job Executor
// Runs a job plan with bounded concurrency, following lifecycle phase semantics

use crate::execution::events::{ExecutionEvent, ProgressSender};
use crate::execution::materializer::Job;
use crate::execution::plan::{JobPlan, PlannedJob};
use crate::parser::models::{EnvBindings, Phase};
use crate::runners::shell::{OutputCallback, Shell, ShellRunner};

use serde::Serialize;
use std::fmt;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Final state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Every required phase succeeded
    Passed,
    /// A `script` step failed
    Failed,
    /// A step before `script` failed
    Errored,
    /// Not started because an earlier job failed under fail-fast
    Cancelled,
}

impl JobStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Passed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobStatus::Passed => "passed",
            JobStatus::Failed => "failed",
            JobStatus::Errored => "errored",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
    TimedOut,
}

/// Result of a single step command
#[derive(Debug, Clone)]
pub struct StepResult {
    pub phase: Phase,
    pub command: String,
    pub status: StepStatus,
    pub exit_code: Option<i32>,
    pub duration: Duration,
    pub output: String,
    pub error: Option<String>,
}

/// Result of one job
#[derive(Debug, Clone)]
pub struct JobResult {
    pub number: usize,
    pub identity: String,
    pub status: JobStatus,
    pub steps: Vec<StepResult>,
    pub duration: Duration,
}

impl JobResult {
    fn without_steps(planned: &PlannedJob, status: JobStatus) -> Self {
        Self {
            number: planned.number,
            identity: planned.job.identity.clone(),
            status,
            steps: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    /// Phases that ran at least one step, in the order they ran
    pub fn phases_run(&self) -> Vec<Phase> {
        let mut phases: Vec<Phase> = Vec::new();
        for step in &self.steps {
            if phases.last() != Some(&step.phase) {
                phases.push(step.phase);
            }
        }
        phases
    }
}

/// Number of jobs per final status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub cancelled: usize,
}

impl RunCounts {
    fn record(&mut self, status: JobStatus) {
        match status {
            JobStatus::Passed => self.passed += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::Errored => self.errored += 1,
            JobStatus::Cancelled => self.cancelled += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.errored + self.cancelled
    }
}

/// Result of running a whole plan, jobs in plan order
#[derive(Debug, Clone)]
pub struct RunResult {
    pub jobs: Vec<JobResult>,
    pub duration: Duration,
}

impl RunResult {
    /// True when every job passed. An empty run is successful.
    pub fn success(&self) -> bool {
        self.jobs.iter().all(|job| job.status.is_success())
    }

    pub fn counts(&self) -> RunCounts {
        let mut counts = RunCounts::default();
        for job in &self.jobs {
            counts.record(job.status);
        }
        counts
    }
}

/// Configuration for plan execution
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum number of jobs running at once
    pub max_parallel: usize,
    /// Stop starting new jobs after the first failure
    pub fail_fast: bool,
    /// Working directory for every step
    pub working_dir: PathBuf,
    /// Per-step timeout (None = no timeout)
    pub step_timeout: Option<Duration>,
    /// Shell used to run step commands
    pub shell: Shell,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_parallel: std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            fail_fast: false,
            working_dir: PathBuf::from("."),
            step_timeout: None,
            shell: Shell::Default,
        }
    }
}

/// Executes a job plan. Jobs run concurrently; steps within a job run in order.
pub struct JobExecutor {
    config: Arc<ExecutorConfig>,
    runner: ShellRunner,
    progress: Option<ProgressSender>,
}

impl JobExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        let runner = ShellRunner::with_shell(config.shell);
        Self {
            config: Arc::new(config),
            runner,
            progress: None,
        }
    }

    /// Report progress events on the given channel
    pub fn with_progress(mut self, progress: ProgressSender) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Run every job of the plan and collect results in plan order
    pub async fn execute(&self, plan: &JobPlan) -> RunResult {
        let start = Instant::now();
        let max_parallel = self.config.max_parallel.max(1);

        info!(jobs = plan.len(), max_parallel, "starting job plan");
        self.emit(ExecutionEvent::run_started(plan.len(), max_parallel));

        let semaphore = Arc::new(Semaphore::new(max_parallel));
        let halted = Arc::new(AtomicBool::new(false));

        let handles: Vec<_> = plan
            .iter()
            .map(|planned| {
                let planned = Arc::clone(planned);
                let semaphore = Arc::clone(&semaphore);
                let halted = Arc::clone(&halted);
                let context = JobContext {
                    config: Arc::clone(&self.config),
                    runner: self.runner.clone(),
                    progress: self.progress.clone(),
                };

                tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();

                    if halted.load(Ordering::SeqCst) {
                        return context.cancel(&planned);
                    }

                    let result = context.run_job(&planned).await;
                    if context.config.fail_fast && !result.status.is_success() {
                        halted.store(true, Ordering::SeqCst);
                    }
                    result
                })
            })
            .collect();

        let mut jobs = Vec::with_capacity(handles.len());
        for (handle, planned) in handles.into_iter().zip(plan.iter()) {
            match handle.await {
                Ok(result) => jobs.push(result),
                Err(e) => {
                    warn!(number = planned.number, error = %e, "job task aborted");
                    jobs.push(JobResult::without_steps(planned, JobStatus::Errored));
                }
            }
        }

        let result = RunResult {
            jobs,
            duration: start.elapsed(),
        };
        let counts = result.counts();

        info!(
            passed = counts.passed,
            failed = counts.failed,
            errored = counts.errored,
            cancelled = counts.cancelled,
            "job plan finished"
        );
        self.emit(ExecutionEvent::run_completed(
            result.success(),
            counts,
            result.duration,
        ));

        result
    }

    fn emit(&self, event: ExecutionEvent) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(event);
        }
    }
}

/// Everything a spawned job task needs
struct JobContext {
    config: Arc<ExecutorConfig>,
    runner: ShellRunner,
    progress: Option<ProgressSender>,
}

impl JobContext {
    async fn run_job(&self, planned: &PlannedJob) -> JobResult {
        let job = &planned.job;
        let number = planned.number;
        let start = Instant::now();

        debug!(number, job = %job.identity, "job started");
        self.emit(ExecutionEvent::job_started(
            number,
            job.identity.clone(),
            job.runnable_step_count(),
        ));

        let env = job_environment(job);
        let mut steps = Vec::new();
        let mut status = JobStatus::Passed;

        'required: for phase in Phase::REQUIRED {
            for (idx, command) in job.steps(phase).iter().enumerate() {
                let step = self.run_step(number, phase, idx, command, &env).await;
                let succeeded = step.status == StepStatus::Succeeded;
                steps.push(step);

                if !succeeded {
                    status = if phase == Phase::Script {
                        JobStatus::Failed
                    } else {
                        JobStatus::Errored
                    };
                    break 'required;
                }
            }
        }

        // Outcome hooks never change the job status
        let mut hooks = Vec::with_capacity(2);
        match status {
            JobStatus::Passed => hooks.push(Phase::AfterSuccess),
            JobStatus::Failed => hooks.push(Phase::AfterFailure),
            JobStatus::Errored | JobStatus::Cancelled => {}
        }
        hooks.push(Phase::AfterScript);

        for phase in hooks {
            for (idx, command) in job.steps(phase).iter().enumerate() {
                steps.push(self.run_step(number, phase, idx, command, &env).await);
            }
        }

        let duration = start.elapsed();
        debug!(number, job = %job.identity, %status, "job finished");
        self.emit(ExecutionEvent::job_completed(
            number,
            job.identity.clone(),
            status,
            duration,
        ));

        JobResult {
            number,
            identity: job.identity.clone(),
            status,
            steps,
            duration,
        }
    }

    async fn run_step(
        &self,
        number: usize,
        phase: Phase,
        step_index: usize,
        command: &str,
        env: &EnvBindings,
    ) -> StepResult {
        self.emit(ExecutionEvent::step_started(number, phase, step_index, command));

        let on_output = self.progress.clone().map(|tx| {
            let callback: OutputCallback = Arc::new(move |line: &str, is_error: bool| {
                let _ = tx.send(ExecutionEvent::step_output(
                    number, phase, step_index, line, is_error,
                ));
            });
            callback
        });

        let start = Instant::now();
        let output = self
            .runner
            .run(
                command,
                env,
                &self.config.working_dir,
                self.config.step_timeout,
                on_output,
            )
            .await;
        let duration = start.elapsed();

        let status = if output.timed_out {
            StepStatus::TimedOut
        } else if output.success() {
            StepStatus::Succeeded
        } else {
            StepStatus::Failed
        };

        debug!(number, %phase, step_index, ?status, exit_code = ?output.exit_code, "step finished");
        self.emit(ExecutionEvent::step_completed(
            number,
            phase,
            step_index,
            status,
            duration,
            output.exit_code,
        ));

        StepResult {
            phase,
            command: command.to_string(),
            status,
            exit_code: output.exit_code,
            duration,
            output: output.stdout,
            error: (!output.stderr.is_empty()).then_some(output.stderr),
        }
    }

    fn cancel(&self, planned: &PlannedJob) -> JobResult {
        debug!(number = planned.number, job = %planned.job.identity, "job cancelled");
        self.emit(ExecutionEvent::job_completed(
            planned.number,
            planned.job.identity.clone(),
            JobStatus::Cancelled,
            Duration::ZERO,
        ));
        JobResult::without_steps(planned, JobStatus::Cancelled)
    }

    fn emit(&self, event: ExecutionEvent) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(event);
        }
    }
}

/// Job environment: `MATRIX_<NAME>` for each scalar attribute, then the
/// resolved env bindings, which win on conflict
pub fn job_environment(job: &Job) -> EnvBindings {
    let mut env: EnvBindings = job
        .attributes()
        .iter()
        .filter(|(_, value)| value.is_scalar())
        .map(|(name, value)| (matrix_var_name(name), value.as_string()))
        .collect();

    env.extend(job.env.iter().map(|(k, v)| (k.clone(), v.clone())));
    env
}

/// `python-version` becomes `MATRIX_PYTHON_VERSION`
pub fn matrix_var_name(axis: &str) -> String {
    let name: String = axis
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("MATRIX_{}", name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::events::progress_channel;
    use crate::parser::DocumentParser;

    fn plan(yaml: &str) -> JobPlan {
        JobPlan::build(&DocumentParser::parse(yaml).unwrap()).unwrap()
    }

    #[test]
    fn test_matrix_var_name() {
        assert_eq!(matrix_var_name("os"), "MATRIX_OS");
        assert_eq!(matrix_var_name("python-version"), "MATRIX_PYTHON_VERSION");
        assert_eq!(matrix_var_name("jdk.vendor"), "MATRIX_JDK_VENDOR");
    }

    #[test]
    fn test_job_environment_prefers_declared_env() {
        let plan = plan(
            "axes:\n  os: [linux]\nenv:\n  MATRIX_OS: custom\n  CI: 'true'\nscript: make\n",
        );
        let env = job_environment(&plan.jobs[0].job);
        assert_eq!(env.get("MATRIX_OS"), Some(&"custom".to_string()));
        assert_eq!(env.get("CI"), Some(&"true".to_string()));
    }

    #[test]
    fn test_default_config() {
        let config = ExecutorConfig::default();
        assert!(config.max_parallel >= 1);
        assert!(!config.fail_fast);
        assert_eq!(config.step_timeout, None);
    }

    #[test]
    fn test_run_counts() {
        let mut counts = RunCounts::default();
        counts.record(JobStatus::Passed);
        counts.record(JobStatus::Failed);
        counts.record(JobStatus::Passed);
        assert_eq!(counts.passed, 2);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.total(), 3);
    }

    #[cfg(unix)]
    mod shell {
        use super::*;

        fn executor() -> JobExecutor {
            JobExecutor::new(ExecutorConfig {
                max_parallel: 2,
                ..ExecutorConfig::default()
            })
        }

        #[tokio::test]
        async fn test_passing_job_runs_after_success() {
            let plan = plan(
                r#"
axes:
  os: [linux]
install: "true"
script: test "$MATRIX_OS" = linux
after_success: echo success
after_failure: echo failure
after_script: echo done
"#,
            );

            let result = executor().execute(&plan).await;
            let job = &result.jobs[0];

            assert!(result.success());
            assert_eq!(job.status, JobStatus::Passed);
            assert_eq!(
                job.phases_run(),
                vec![
                    Phase::Install,
                    Phase::Script,
                    Phase::AfterSuccess,
                    Phase::AfterScript
                ]
            );
        }

        #[tokio::test]
        async fn test_failing_install_errors_and_skips_script() {
            let plan = plan(
                r#"
axes:
  os: [linux]
install:
  - exit 1
  - echo never
script: echo never
after_success: echo never
after_script: echo done
"#,
            );

            let result = executor().execute(&plan).await;
            let job = &result.jobs[0];

            assert_eq!(job.status, JobStatus::Errored);
            assert_eq!(job.phases_run(), vec![Phase::Install, Phase::AfterScript]);
            assert_eq!(job.steps.len(), 2);
            assert_eq!(job.steps[0].exit_code, Some(1));
            assert!(!result.success());
        }

        #[tokio::test]
        async fn test_failing_script_runs_after_failure() {
            let plan = plan(
                r#"
axes:
  os: [linux]
script:
  - "false"
  - echo never
after_success: echo never
after_failure: echo failure
"#,
            );

            let result = executor().execute(&plan).await;
            let job = &result.jobs[0];

            assert_eq!(job.status, JobStatus::Failed);
            assert_eq!(job.phases_run(), vec![Phase::Script, Phase::AfterFailure]);
            assert_eq!(job.steps[1].output, "failure");
        }

        #[tokio::test]
        async fn test_failing_after_success_keeps_job_passed() {
            let plan = plan("axes:\n  os: [linux]\nscript: 'true'\nafter_success: exit 7\n");

            let result = executor().execute(&plan).await;
            assert_eq!(result.jobs[0].status, JobStatus::Passed);
            assert_eq!(result.jobs[0].steps[1].exit_code, Some(7));
        }

        #[tokio::test]
        async fn test_results_follow_plan_order() {
            let plan = plan(
                r#"
axes:
  n: [1, 2, 3, 4]
script: sleep 0.$((5 - MATRIX_N))
include:
  - name: last
    script: echo include
"#,
            );

            let result = executor().execute(&plan).await;
            let numbers: Vec<_> = result.jobs.iter().map(|j| j.number).collect();
            assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
            assert_eq!(result.jobs[4].identity, "last");
            assert_eq!(result.counts().passed, 5);
        }

        #[tokio::test]
        async fn test_fail_fast_cancels_pending_jobs() {
            let plan = plan("axes:\n  os: [linux, osx]\nscript: exit 1\n");
            let executor = JobExecutor::new(ExecutorConfig {
                max_parallel: 1,
                fail_fast: true,
                ..ExecutorConfig::default()
            });

            let counts = executor.execute(&plan).await.counts();
            assert_eq!(counts.failed, 1);
            assert_eq!(counts.cancelled, 1);
        }

        #[tokio::test]
        async fn test_step_timeout() {
            let plan = plan("axes:\n  os: [linux]\nscript: sleep 2\n");
            let executor = JobExecutor::new(ExecutorConfig {
                step_timeout: Some(Duration::from_millis(100)),
                ..ExecutorConfig::default()
            });

            let result = executor.execute(&plan).await;
            assert_eq!(result.jobs[0].status, JobStatus::Failed);
            assert_eq!(result.jobs[0].steps[0].status, StepStatus::TimedOut);
        }

        #[tokio::test]
        async fn test_progress_events() {
            let plan = plan(
                "axes:\n  os: [linux]\nscript: echo hello\nafter_success: 'true'\nafter_failure: 'false'\n",
            );
            let (tx, mut rx) = progress_channel();

            let result = executor().with_progress(tx).execute(&plan).await;
            assert!(result.success());

            let mut events = Vec::new();
            while let Ok(event) = rx.try_recv() {
                events.push(event);
            }

            assert!(matches!(
                events.first(),
                Some(ExecutionEvent::RunStarted { total_jobs: 1, .. })
            ));
            assert!(events.iter().any(|e| matches!(
                e,
                ExecutionEvent::JobStarted { number: 1, total_steps: 2, .. }
            )));
            assert!(matches!(
                events.last(),
                Some(ExecutionEvent::RunCompleted { success: true, .. })
            ));
            assert!(events.iter().any(|e| matches!(
                e,
                ExecutionEvent::StepOutput { line, is_error: false, .. } if line == "hello"
            )));
            assert!(events.iter().any(|e| matches!(
                e,
                ExecutionEvent::JobCompleted { number: 1, status: JobStatus::Passed, .. }
            )));
        }

        #[tokio::test]
        async fn test_empty_plan_succeeds() {
            let plan = plan("axes:\n  os: []\nscript: make\n");
            let result = executor().execute(&plan).await;
            assert!(result.jobs.is_empty());
            assert!(result.success());
        }
    }
}
