// Job Plan
// Expansion followed by materialization, as one all-or-nothing step

use crate::execution::materializer::{Job, JobMaterializer};
use crate::execution::matrix::{ExpansionSummary, MatrixExpander};
use crate::parser::models::MatrixDocument;
use crate::ServiceResult;

use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// A materialized job with its 1-based position in the plan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedJob {
    pub number: usize,
    #[serde(flatten)]
    pub job: Job,
}

/// Ordered, numbered list of jobs for one document.
///
/// Jobs are shared behind `Arc` and never mutated, so a plan can be handed to
/// any number of concurrent executors.
#[derive(Debug, Clone, Serialize)]
pub struct JobPlan {
    pub summary: ExpansionSummary,
    pub jobs: Vec<Arc<PlannedJob>>,
}

impl JobPlan {
    /// Expand and materialize a document.
    ///
    /// The first configuration error aborts the whole plan. A matrix that
    /// expands to nothing yields an empty plan, not an error.
    pub fn build(document: &MatrixDocument) -> ServiceResult<JobPlan> {
        let (descriptors, summary) = MatrixExpander::expand_with_summary(&document.matrix);

        let jobs = descriptors
            .iter()
            .enumerate()
            .map(|(i, descriptor)| {
                JobMaterializer::materialize(descriptor, &document.defaults).map(|job| {
                    Arc::new(PlannedJob {
                        number: i + 1,
                        job,
                    })
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            jobs = jobs.len(),
            excluded = summary.excluded,
            included = summary.included,
            "built job plan"
        );

        Ok(JobPlan { summary, jobs })
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<PlannedJob>> {
        self.jobs.iter()
    }

    /// Look up a job by its plan number
    pub fn get(&self, number: usize) -> Option<&Arc<PlannedJob>> {
        number.checked_sub(1).and_then(|idx| self.jobs.get(idx))
    }

    /// Keep only jobs whose number or identity matches one of `selectors`.
    ///
    /// Job numbers are preserved so output stays comparable with the full plan.
    pub fn select<S: AsRef<str>>(&self, selectors: &[S]) -> JobPlan {
        let jobs = self
            .jobs
            .iter()
            .filter(|planned| {
                selectors.iter().any(|selector| {
                    let selector = selector.as_ref();
                    selector == planned.job.identity
                        || selector.parse::<usize>().ok() == Some(planned.number)
                })
            })
            .cloned()
            .collect();

        JobPlan {
            summary: self.summary,
            jobs,
        }
    }

    pub fn to_json(&self) -> ServiceResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_yaml(&self) -> ServiceResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::DocumentParser;
    use crate::ServiceError;

    const DOCUMENT: &str = r#"
axes:
  os: [linux, osx]
  py: [3.6, 3.7]
exclude:
  - { os: osx, py: 3.6 }
include:
  - name: windows-36
    os: windows
    script: python -m pytest
install: pip install .
script: pytest
"#;

    fn identities(plan: &JobPlan) -> Vec<String> {
        plan.iter().map(|p| p.job.identity.clone()).collect()
    }

    #[test]
    fn test_build_plan() {
        let doc = DocumentParser::parse(DOCUMENT).unwrap();
        let plan = JobPlan::build(&doc).unwrap();

        assert_eq!(
            identities(&plan),
            vec![
                "os=linux, py=3.6",
                "os=linux, py=3.7",
                "os=osx, py=3.7",
                "windows-36",
            ]
        );
        let numbers: Vec<_> = plan.iter().map(|p| p.number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);

        let windows = &plan.get(4).unwrap().job;
        assert_eq!(windows.script(), ["python -m pytest"]);
        assert_eq!(windows.steps(crate::parser::Phase::Install), ["pip install ."]);
        assert!(plan.get(0).is_none());
        assert!(plan.get(5).is_none());
    }

    #[test]
    fn test_fully_excluded_matrix_is_an_empty_plan() {
        let yaml = "axes:\n  os: [linux]\nexclude:\n  - os: linux\nscript: make\n";
        let plan = JobPlan::build(&DocumentParser::parse(yaml).unwrap()).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.summary.excluded, 1);
    }

    #[test]
    fn test_missing_script_fails_whole_plan() {
        let yaml = r#"
axes:
  os: [linux]
include:
  - name: ok
    script: make
  - name: broken
    install: make deps
"#;
        let doc = DocumentParser::parse(yaml).unwrap();
        match JobPlan::build(&doc) {
            Err(ServiceError::Configuration(err)) => {
                // the base job comes first and has no script either
                assert_eq!(err.subject, "os=linux");
            }
            other => panic!("expected configuration error, got {:?}", other),
        }
    }

    #[test]
    fn test_select_by_number_and_identity() {
        let plan = JobPlan::build(&DocumentParser::parse(DOCUMENT).unwrap()).unwrap();

        let selected = plan.select(&["windows-36", "2", "nope"]);
        assert_eq!(identities(&selected), vec!["os=linux, py=3.7", "windows-36"]);
        let numbers: Vec<_> = selected.iter().map(|p| p.number).collect();
        assert_eq!(numbers, vec![2, 4]);
    }

    #[test]
    fn test_plan_is_idempotent_and_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<JobPlan>();

        let doc = DocumentParser::parse(DOCUMENT).unwrap();
        let first = JobPlan::build(&doc).unwrap();
        let second = JobPlan::build(&doc).unwrap();
        assert_eq!(first.jobs, second.jobs);
    }

    #[test]
    fn test_plan_serializes() {
        let plan = JobPlan::build(&DocumentParser::parse(DOCUMENT).unwrap()).unwrap();

        let json: serde_json::Value = serde_json::from_str(&plan.to_json().unwrap()).unwrap();
        assert_eq!(json["summary"]["total"], 4);
        assert_eq!(json["jobs"][3]["number"], 4);
        assert_eq!(json["jobs"][3]["identity"], "windows-36");
        assert_eq!(json["jobs"][3]["origin"], "include");
        assert_eq!(json["jobs"][3]["fields"]["os"], "windows");

        let yaml = plan.to_yaml().unwrap();
        assert!(yaml.contains("identity: windows-36"));
    }
}
