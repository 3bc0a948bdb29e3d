// Job Materialization
// Resolves lifecycle steps for expanded jobs, with job-local phases overriding defaults

use crate::execution::matrix::JobDescriptor;
use crate::parser::error::ConfigurationError;
use crate::parser::models::{AxisValues, EnvBindings, Lifecycle, Phase, Value};

use indexmap::IndexMap;
use serde::Serialize;

/// Where a materialized job came from
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "origin", rename_all = "snake_case")]
pub enum JobOrigin {
    /// Element of the axis cross-product
    Matrix { axes: AxisValues },
    /// Explicit include, with its non-lifecycle fields
    Include {
        index: usize,
        #[serde(skip_serializing_if = "IndexMap::is_empty")]
        fields: IndexMap<String, Value>,
    },
}

/// Steps for a single lifecycle phase
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseSteps {
    pub phase: Phase,
    pub steps: Vec<String>,
}

/// A fully resolved job, ready to hand to an executor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub identity: String,
    #[serde(flatten)]
    pub origin: JobOrigin,
    pub env: EnvBindings,
    /// Non-empty phases in execution order. `script` is always present.
    pub phases: Vec<PhaseSteps>,
}

impl Job {
    /// Steps for a phase; empty when the phase resolved to nothing
    pub fn steps(&self, phase: Phase) -> &[String] {
        self.phases
            .iter()
            .find(|p| p.phase == phase)
            .map(|p| p.steps.as_slice())
            .unwrap_or(&[])
    }

    pub fn script(&self) -> &[String] {
        self.steps(Phase::Script)
    }

    /// Axis values for matrix jobs, declared fields for includes
    pub fn attributes(&self) -> &IndexMap<String, Value> {
        match &self.origin {
            JobOrigin::Matrix { axes } => axes,
            JobOrigin::Include { fields, .. } => fields,
        }
    }

    pub fn is_include(&self) -> bool {
        matches!(self.origin, JobOrigin::Include { .. })
    }

    pub fn step_count(&self) -> usize {
        self.phases.iter().map(|p| p.steps.len()).sum()
    }

    /// Most steps a single run can execute: `after_success` and
    /// `after_failure` are mutually exclusive
    pub fn runnable_step_count(&self) -> usize {
        let hooks = self
            .steps(Phase::AfterSuccess)
            .len()
            .max(self.steps(Phase::AfterFailure).len());
        let always: usize = Phase::REQUIRED
            .into_iter()
            .chain([Phase::AfterScript])
            .map(|phase| self.steps(phase).len())
            .sum();
        always + hooks
    }
}

/// Attaches resolved lifecycle steps to job descriptors
pub struct JobMaterializer;

impl JobMaterializer {
    /// Resolve a descriptor against the global defaults.
    ///
    /// Each phase (and `env`) is an atomic override unit: a phase declared on
    /// the job replaces the default outright, an absent phase falls back to
    /// the default or to nothing. A job whose `script` resolves empty is a
    /// configuration error naming the job.
    pub fn materialize(
        descriptor: &JobDescriptor,
        defaults: &Lifecycle,
    ) -> Result<Job, ConfigurationError> {
        let identity = descriptor.identity();
        let local = descriptor.lifecycle();

        let env = local
            .and_then(Lifecycle::env)
            .or_else(|| defaults.env())
            .cloned()
            .unwrap_or_default();

        let phases: Vec<PhaseSteps> = Phase::ALL
            .into_iter()
            .filter_map(|phase| {
                let steps = local
                    .and_then(|l| l.phase(phase))
                    .or_else(|| defaults.phase(phase))
                    .unwrap_or(&[]);
                (!steps.is_empty()).then(|| PhaseSteps {
                    phase,
                    steps: steps.to_vec(),
                })
            })
            .collect();

        if !phases.iter().any(|p| p.phase == Phase::Script) {
            return Err(ConfigurationError::missing_script(identity));
        }

        let origin = match descriptor {
            JobDescriptor::Base { axes } => JobOrigin::Matrix { axes: axes.clone() },
            JobDescriptor::Include { index, job } => JobOrigin::Include {
                index: *index,
                fields: job.fields.clone(),
            },
        };

        Ok(Job {
            identity,
            origin,
            env,
            phases,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::error::ConfigurationErrorKind;
    use crate::parser::models::IncludeJob;

    fn base(os: &str, python: &str) -> JobDescriptor {
        let mut axes = AxisValues::new();
        axes.insert("os".to_string(), Value::from(os));
        axes.insert("python".to_string(), Value::from(python));
        JobDescriptor::Base { axes }
    }

    fn include(job: IncludeJob) -> JobDescriptor {
        JobDescriptor::Include { index: 1, job }
    }

    fn defaults() -> Lifecycle {
        let mut env = EnvBindings::new();
        env.insert("CI".to_string(), "true".to_string());

        Lifecycle::new()
            .with_env(env)
            .with_phase(Phase::Install, ["pip install -r requirements.txt"])
            .with_phase(Phase::Script, ["pytest"])
            .with_phase(Phase::AfterSuccess, ["codecov"])
    }

    #[test]
    fn test_base_job_takes_defaults() {
        let job = JobMaterializer::materialize(&base("linux", "3.6"), &defaults()).unwrap();

        assert_eq!(job.identity, "os=linux, python=3.6");
        assert_eq!(job.env.get("CI"), Some(&"true".to_string()));
        assert_eq!(job.steps(Phase::Install), ["pip install -r requirements.txt"]);
        assert_eq!(job.script(), ["pytest"]);
        assert_eq!(job.steps(Phase::AfterSuccess), ["codecov"]);
        assert!(job.steps(Phase::BeforeInstall).is_empty());

        let order: Vec<_> = job.phases.iter().map(|p| p.phase).collect();
        assert_eq!(order, vec![Phase::Install, Phase::Script, Phase::AfterSuccess]);
        assert_eq!(job.attributes().get("os"), Some(&Value::from("linux")));
        assert!(!job.is_include());
    }

    #[test]
    fn test_local_script_overrides_without_touching_install() {
        let descriptor = include(
            IncludeJob::named("windows-36")
                .with_field("os", "windows")
                .with_phase(Phase::Script, ["python -m pytest", "python setup.py check"]),
        );

        let job = JobMaterializer::materialize(&descriptor, &defaults()).unwrap();

        assert_eq!(job.identity, "windows-36");
        assert_eq!(job.steps(Phase::Install), ["pip install -r requirements.txt"]);
        assert_eq!(job.script(), ["python -m pytest", "python setup.py check"]);
        assert_eq!(job.attributes().get("os"), Some(&Value::from("windows")));
        assert!(job.is_include());
    }

    #[test]
    fn test_phase_override_replaces_rather_than_merges() {
        let descriptor = include(
            IncludeJob::named("custom-install")
                .with_phase(Phase::Install, ["brew install python"]),
        );

        let job = JobMaterializer::materialize(&descriptor, &defaults()).unwrap();
        assert_eq!(job.steps(Phase::Install), ["brew install python"]);
    }

    #[test]
    fn test_explicit_empty_phase_clears_default() {
        let descriptor = include(
            IncludeJob::named("no-coverage").with_phase(Phase::AfterSuccess, Vec::<String>::new()),
        );

        let job = JobMaterializer::materialize(&descriptor, &defaults()).unwrap();
        assert!(job.steps(Phase::AfterSuccess).is_empty());
        assert_eq!(job.step_count(), 2);
    }

    #[test]
    fn test_local_env_replaces_default_env() {
        let mut env = EnvBindings::new();
        env.insert("TOXENV".to_string(), "lint".to_string());

        let descriptor = include(IncludeJob::named("lint").with_env(env));
        let job = JobMaterializer::materialize(&descriptor, &defaults()).unwrap();

        assert_eq!(job.env.get("TOXENV"), Some(&"lint".to_string()));
        assert_eq!(job.env.get("CI"), None);
    }

    #[test]
    fn test_runnable_step_count_counts_one_outcome_hook() {
        let defaults = defaults()
            .with_phase(Phase::AfterFailure, ["notify", "cleanup"])
            .with_phase(Phase::AfterScript, ["echo done"]);

        let job = JobMaterializer::materialize(&base("linux", "3.6"), &defaults).unwrap();
        assert_eq!(job.step_count(), 6);
        // install + script + after_failure (longer hook) + after_script
        assert_eq!(job.runnable_step_count(), 5);
    }

    #[test]
    fn test_missing_script_names_the_job() {
        let no_script = Lifecycle::new().with_phase(Phase::Install, ["make deps"]);

        let err = JobMaterializer::materialize(&base("osx", "3.7"), &no_script).unwrap_err();
        assert_eq!(err.kind, ConfigurationErrorKind::MissingScript);
        assert_eq!(err.subject, "os=osx, python=3.7");
    }

    #[test]
    fn test_empty_local_script_is_an_error() {
        let descriptor = include(
            IncludeJob::named("broken").with_phase(Phase::Script, Vec::<String>::new()),
        );

        let err = JobMaterializer::materialize(&descriptor, &defaults()).unwrap_err();
        assert_eq!(err.subject, "broken");
    }

    #[test]
    fn test_local_script_satisfies_missing_default() {
        let descriptor = include(IncludeJob::named("shell").with_phase(Phase::Script, ["./ci.sh"]));

        let job = JobMaterializer::materialize(&descriptor, &Lifecycle::new()).unwrap();
        assert_eq!(job.script(), ["./ci.sh"]);
        assert!(job.env.is_empty());
    }

    #[test]
    fn test_job_serializes_with_origin_tag() {
        let job = JobMaterializer::materialize(&base("linux", "3.6"), &defaults()).unwrap();
        let json = serde_json::to_value(&job).unwrap();

        assert_eq!(json["origin"], "matrix");
        assert_eq!(json["axes"]["python"], "3.6");
        assert_eq!(json["phases"][1]["phase"], "script");
        assert_eq!(json["phases"][1]["steps"][0], "pytest");
    }
}
