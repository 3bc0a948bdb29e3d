// Matrix Expansion
// Expands axes, exclude rules and include jobs into an ordered list of job descriptors

use crate::parser::models::{
    format_tuple, Axis, AxisValues, ExcludeRule, IncludeJob, Lifecycle, Matrix,
};

use serde::Serialize;
use tracing::debug;

/// A job produced by expansion, before lifecycle resolution
#[derive(Debug, Clone, PartialEq)]
pub enum JobDescriptor {
    /// A surviving element of the axis cross-product
    Base { axes: AxisValues },
    /// An explicitly declared job. `index` is its 1-based declaration position.
    Include { index: usize, job: IncludeJob },
}

impl JobDescriptor {
    /// Identity used in logs and error messages.
    ///
    /// Base jobs are named by their axis tuple, includes by their declared
    /// name, then by their fields, then by position.
    pub fn identity(&self) -> String {
        match self {
            JobDescriptor::Base { axes } => format_tuple(axes),
            JobDescriptor::Include { index, job } => {
                if let Some(name) = &job.name {
                    name.clone()
                } else if !job.fields.is_empty() {
                    format_tuple(&job.fields)
                } else {
                    format!("include #{}", index)
                }
            }
        }
    }

    /// Job-local lifecycle overrides. Base jobs have none.
    pub fn lifecycle(&self) -> Option<&Lifecycle> {
        match self {
            JobDescriptor::Base { .. } => None,
            JobDescriptor::Include { job, .. } => Some(&job.lifecycle),
        }
    }

    pub fn is_include(&self) -> bool {
        matches!(self, JobDescriptor::Include { .. })
    }
}

/// Counts gathered during one expansion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExpansionSummary {
    /// Size of the axis cross-product
    pub total: usize,
    /// Base jobs removed by exclude rules
    pub excluded: usize,
    /// Include jobs appended
    pub included: usize,
}

impl ExpansionSummary {
    pub fn surviving(&self) -> usize {
        self.total - self.excluded
    }

    pub fn job_count(&self) -> usize {
        self.surviving() + self.included
    }
}

/// Matrix expander for build-matrix documents
pub struct MatrixExpander;

impl MatrixExpander {
    /// Expand a matrix into job descriptors.
    ///
    /// Surviving base jobs come first in cross-product order, followed by
    /// include jobs in declaration order. Identical input always yields
    /// identical output.
    pub fn expand(matrix: &Matrix) -> Vec<JobDescriptor> {
        Self::expand_with_summary(matrix).0
    }

    /// Expand a matrix and report how many jobs were produced, excluded and included
    pub fn expand_with_summary(matrix: &Matrix) -> (Vec<JobDescriptor>, ExpansionSummary) {
        let base = Self::cross_product(&matrix.axes);
        let total = base.len();

        let mut descriptors: Vec<JobDescriptor> = base
            .into_iter()
            .filter(|tuple| !Self::is_excluded(tuple, &matrix.exclude))
            .map(|axes| JobDescriptor::Base { axes })
            .collect();
        let excluded = total - descriptors.len();

        // Includes bypass exclusion entirely
        descriptors.extend(
            matrix
                .include
                .iter()
                .enumerate()
                .map(|(i, job)| JobDescriptor::Include {
                    index: i + 1,
                    job: job.clone(),
                }),
        );

        let summary = ExpansionSummary {
            total,
            excluded,
            included: matrix.include.len(),
        };

        debug!(
            total = summary.total,
            excluded = summary.excluded,
            included = summary.included,
            "expanded build matrix"
        );

        (descriptors, summary)
    }

    /// Cross-product of all axes. The first axis varies slowest.
    ///
    /// No axes, or any axis without values, yields no tuples. Repeated values
    /// within an axis contribute a single tuple, at their first position.
    pub fn cross_product(axes: &[Axis]) -> Vec<AxisValues> {
        if axes.is_empty() {
            return Vec::new();
        }

        axes.iter().fold(vec![AxisValues::new()], |partials, axis| {
            let values = axis.distinct_values();
            partials
                .iter()
                .flat_map(|partial| {
                    values.iter().map(move |&value| {
                        let mut tuple = partial.clone();
                        tuple.insert(axis.name.clone(), value.clone());
                        tuple
                    })
                })
                .collect()
        })
    }

    /// A tuple is excluded when it matches at least one rule
    pub fn is_excluded(tuple: &AxisValues, rules: &[ExcludeRule]) -> bool {
        rules.iter().any(|rule| rule.matches(tuple))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::models::Value;

    fn tuple_strings(descriptors: &[JobDescriptor]) -> Vec<String> {
        descriptors.iter().map(JobDescriptor::identity).collect()
    }

    fn os_python_matrix() -> Matrix {
        Matrix::new()
            .with_axis("os", ["linux", "osx"])
            .with_axis("py", [3.6, 3.7])
    }

    #[test]
    fn test_cross_product_order() {
        let matrix = Matrix::new()
            .with_axis("os", ["linux", "osx"])
            .with_axis("py", ["3.6", "3.7", "3.8"]);

        let tuples = MatrixExpander::cross_product(&matrix.axes);
        assert_eq!(tuples.len(), 6);

        let rendered: Vec<_> = tuples.iter().map(format_tuple).collect();
        assert_eq!(
            rendered,
            vec![
                "os=linux, py=3.6",
                "os=linux, py=3.7",
                "os=linux, py=3.8",
                "os=osx, py=3.6",
                "os=osx, py=3.7",
                "os=osx, py=3.8",
            ]
        );
    }

    #[test]
    fn test_cross_product_size_is_product_of_axis_sizes() {
        let matrix = Matrix::new()
            .with_axis("a", [1_i64, 2, 3])
            .with_axis("b", ["x", "y"])
            .with_axis("c", [true, false])
            .with_axis("d", ["only"]);

        let tuples = MatrixExpander::cross_product(&matrix.axes);
        assert_eq!(tuples.len(), 3 * 2 * 2);
        assert_eq!(tuples.len(), matrix.cross_product_size());
        for tuple in &tuples {
            let keys: Vec<_> = tuple.keys().map(String::as_str).collect();
            assert_eq!(keys, vec!["a", "b", "c", "d"]);
        }
    }

    #[test]
    fn test_repeated_axis_values_yield_one_tuple() {
        let matrix = Matrix::new()
            .with_axis("os", ["linux", "linux"])
            .with_axis("py", vec![Value::Number(3.6), Value::from("3.6")]);

        let descriptors = MatrixExpander::expand(&matrix);
        assert_eq!(tuple_strings(&descriptors), vec!["os=linux, py=3.6"]);
        assert_eq!(matrix.cross_product_size(), 1);
    }

    #[test]
    fn test_empty_axis_collapses_matrix() {
        let matrix = os_python_matrix().with_axis("arch", Vec::<Value>::new());
        let (descriptors, summary) = MatrixExpander::expand_with_summary(&matrix);
        assert!(descriptors.is_empty());
        assert_eq!(summary.total, 0);
    }

    #[test]
    fn test_no_axes_yields_only_includes() {
        let matrix = Matrix::new().with_include(IncludeJob::named("docs"));
        let descriptors = MatrixExpander::expand(&matrix);
        assert_eq!(tuple_strings(&descriptors), vec!["docs"]);
    }

    #[test]
    fn test_exclude_then_include() {
        let matrix = os_python_matrix()
            .with_exclude(ExcludeRule::new().with("os", "osx").with("py", 3.6))
            .with_include(IncludeJob::named("windows-36"));

        let (descriptors, summary) = MatrixExpander::expand_with_summary(&matrix);

        assert_eq!(
            tuple_strings(&descriptors),
            vec![
                "os=linux, py=3.6",
                "os=linux, py=3.7",
                "os=osx, py=3.7",
                "windows-36",
            ]
        );
        assert_eq!(
            summary,
            ExpansionSummary {
                total: 4,
                excluded: 1,
                included: 1
            }
        );
        assert_eq!(summary.job_count(), 4);
        assert!(descriptors[3].is_include());
    }

    #[test]
    fn test_exclude_with_unknown_value_is_inert() {
        let matrix = os_python_matrix().with_exclude(ExcludeRule::new().with("os", "solaris"));
        let descriptors = MatrixExpander::expand(&matrix);
        assert_eq!(descriptors.len(), 4);
    }

    #[test]
    fn test_exclude_rules_are_or_combined() {
        let matrix = os_python_matrix()
            .with_exclude(ExcludeRule::new().with("os", "osx"))
            .with_exclude(ExcludeRule::new().with("py", 3.6));

        let descriptors = MatrixExpander::expand(&matrix);
        assert_eq!(tuple_strings(&descriptors), vec!["os=linux, py=3.7"]);
    }

    #[test]
    fn test_rules_covering_whole_matrix_leave_no_base_jobs() {
        let matrix = os_python_matrix()
            .with_exclude(ExcludeRule::new().with("os", "linux"))
            .with_exclude(ExcludeRule::new().with("os", "osx"));

        let (descriptors, summary) = MatrixExpander::expand_with_summary(&matrix);
        assert!(descriptors.is_empty());
        assert_eq!(summary.excluded, 4);
        assert_eq!(summary.job_count(), 0);
    }

    #[test]
    fn test_includes_are_never_excluded_or_deduplicated() {
        let duplicate = IncludeJob::new().with_field("os", "osx").with_field("py", 3.6);
        let matrix = os_python_matrix()
            .with_exclude(ExcludeRule::new().with("os", "osx").with("py", 3.6))
            .with_include(duplicate.clone())
            .with_include(duplicate)
            .with_include(IncludeJob::new().with_field("os", "linux").with_field("py", 3.6));

        let descriptors = MatrixExpander::expand(&matrix);
        assert_eq!(descriptors.len(), 3 + 3);
        assert_eq!(
            tuple_strings(&descriptors[3..]),
            vec!["os=osx, py=3.6", "os=osx, py=3.6", "os=linux, py=3.6"]
        );
    }

    #[test]
    fn test_include_identity_fallbacks() {
        let matrix = Matrix::new()
            .with_include(IncludeJob::named("named").with_field("os", "windows"))
            .with_include(IncludeJob::new().with_field("os", "freebsd"))
            .with_include(IncludeJob::new());

        let descriptors = MatrixExpander::expand(&matrix);
        assert_eq!(
            tuple_strings(&descriptors),
            vec!["named", "os=freebsd", "include #3"]
        );
    }

    #[test]
    fn test_expansion_is_deterministic() {
        let matrix = os_python_matrix()
            .with_exclude(ExcludeRule::new().with("py", 3.7))
            .with_include(IncludeJob::named("extra"));

        assert_eq!(MatrixExpander::expand(&matrix), MatrixExpander::expand(&matrix));
    }
}
