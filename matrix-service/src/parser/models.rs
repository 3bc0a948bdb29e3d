// Matrix Document Models
// Typed representation of a build-matrix document: axes, rules, includes and defaults

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use std::fmt;

/// Axis name to value, in axis declaration order
pub type AxisValues = IndexMap<String, Value>;

/// Environment variable bindings, in declaration order
pub type EnvBindings = IndexMap<String, String>;

// =============================================================================
// Root document
// =============================================================================

/// A parsed matrix document. Immutable once loaded.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatrixDocument {
    pub matrix: Matrix,
    pub defaults: Lifecycle,
}

impl MatrixDocument {
    pub fn new(matrix: Matrix, defaults: Lifecycle) -> Self {
        Self { matrix, defaults }
    }
}

/// The matrix declaration: base axes plus exclude and include rules
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Matrix {
    pub axes: Vec<Axis>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<ExcludeRule>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<IncludeJob>,
}

impl Matrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an axis with the given values
    pub fn with_axis<V: Into<Value>>(
        mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.axes.push(Axis::new(name, values));
        self
    }

    pub fn with_exclude(mut self, rule: ExcludeRule) -> Self {
        self.exclude.push(rule);
        self
    }

    pub fn with_include(mut self, job: IncludeJob) -> Self {
        self.include.push(job);
        self
    }

    pub fn axis(&self, name: &str) -> Option<&Axis> {
        self.axes.iter().find(|axis| axis.name == name)
    }

    /// Number of base jobs before exclusion
    pub fn cross_product_size(&self) -> usize {
        if self.axes.is_empty() {
            return 0;
        }
        self.axes
            .iter()
            .map(|axis| axis.distinct_values().len())
            .product()
    }
}

/// A named dimension of variation with an ordered list of values
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Axis {
    pub name: String,
    pub values: Vec<Value>,
}

impl Axis {
    pub fn new<V: Into<Value>>(
        name: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Values in declaration order, keeping only the first of any that match
    pub fn distinct_values(&self) -> Vec<&Value> {
        let mut distinct: Vec<&Value> = Vec::with_capacity(self.values.len());
        for value in &self.values {
            if !distinct.iter().any(|seen| seen.matches(value)) {
                distinct.push(value);
            }
        }
        distinct
    }
}

/// A partial axis tuple. Unconstrained axes act as wildcards.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ExcludeRule {
    pub constraints: AxisValues,
}

impl ExcludeRule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, axis: impl Into<String>, value: impl Into<Value>) -> Self {
        self.constraints.insert(axis.into(), value.into());
        self
    }

    /// True when every constrained axis is present in `tuple` with a matching value
    pub fn matches(&self, tuple: &AxisValues) -> bool {
        self.constraints.iter().all(|(axis, expected)| {
            tuple
                .get(axis)
                .is_some_and(|actual| actual.matches(expected))
        })
    }
}

/// An explicitly declared job, appended after exclusion.
///
/// `name`, `env` and the lifecycle phases are recognised; every other key of
/// the declaration is kept verbatim in `fields`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IncludeJob {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub fields: IndexMap<String, Value>,
    #[serde(flatten)]
    pub lifecycle: Lifecycle,
}

impl IncludeJob {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_phase<S: Into<String>>(
        mut self,
        phase: Phase,
        steps: impl IntoIterator<Item = S>,
    ) -> Self {
        self.lifecycle = self.lifecycle.with_phase(phase, steps);
        self
    }

    pub fn with_env(mut self, env: EnvBindings) -> Self {
        self.lifecycle.env = Some(env);
        self
    }
}

// =============================================================================
// Lifecycle
// =============================================================================

/// A named stage of job execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    BeforeInstall,
    Install,
    BeforeScript,
    Script,
    AfterSuccess,
    AfterFailure,
    AfterScript,
}

impl Phase {
    /// All phases in execution order
    pub const ALL: [Phase; 7] = [
        Phase::BeforeInstall,
        Phase::Install,
        Phase::BeforeScript,
        Phase::Script,
        Phase::AfterSuccess,
        Phase::AfterFailure,
        Phase::AfterScript,
    ];

    /// Phases whose first failing step aborts the job
    pub const REQUIRED: [Phase; 4] = [
        Phase::BeforeInstall,
        Phase::Install,
        Phase::BeforeScript,
        Phase::Script,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::BeforeInstall => "before_install",
            Phase::Install => "install",
            Phase::BeforeScript => "before_script",
            Phase::Script => "script",
            Phase::AfterSuccess => "after_success",
            Phase::AfterFailure => "after_failure",
            Phase::AfterScript => "after_script",
        }
    }

    pub fn from_key(key: &str) -> Option<Phase> {
        Phase::ALL.into_iter().find(|phase| phase.as_str() == key)
    }

    pub fn is_required(&self) -> bool {
        Phase::REQUIRED.contains(self)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Environment bindings and per-phase step lists.
///
/// Used both for the global defaults and for the local overrides of an include
/// job. A phase that is present (even with an empty list) overrides the
/// default as a whole.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Lifecycle {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<EnvBindings>,
    #[serde(flatten)]
    pub phases: IndexMap<Phase, Vec<String>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_phase<S: Into<String>>(
        mut self,
        phase: Phase,
        steps: impl IntoIterator<Item = S>,
    ) -> Self {
        self.phases
            .insert(phase, steps.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_env(mut self, env: EnvBindings) -> Self {
        self.env = Some(env);
        self
    }

    pub fn phase(&self, phase: Phase) -> Option<&[String]> {
        self.phases.get(&phase).map(Vec::as_slice)
    }

    pub fn env(&self) -> Option<&EnvBindings> {
        self.env.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.env.is_none() && self.phases.is_empty()
    }
}

// =============================================================================
// Value type for axis values and open fields
// =============================================================================

/// Dynamically typed value as found in the document
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    /// Integers above `i64::MAX`
    Unsigned(u64),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(IndexMap<String, Value>),
}

impl Value {
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Value::Array(_) | Value::Object(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Canonical string rendering. Integral numbers render without a fraction.
    pub fn as_string(&self) -> String {
        match self {
            Value::Null => "".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Unsigned(u) => u.to_string(),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < MAX_EXACT_FLOAT_INT {
                    (*n as i64).to_string()
                } else {
                    n.to_string()
                }
            }
            Value::String(s) => s.clone(),
            Value::Array(_) | Value::Object(_) => self.to_json(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "null".to_string())
    }

    /// Equality used by exclude rules: scalars compare by their canonical
    /// rendering, collections compare structurally.
    pub fn matches(&self, other: &Value) -> bool {
        if self.is_scalar() && other.is_scalar() {
            self.as_string() == other.as_string()
        } else {
            self == other
        }
    }

    /// Convert a raw YAML node
    pub fn from_yaml(yaml: &serde_yaml::Value) -> Value {
        match yaml {
            serde_yaml::Value::Null => Value::Null,
            serde_yaml::Value::Bool(b) => Value::Bool(*b),
            serde_yaml::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else if let Some(u) = n.as_u64() {
                    Value::Unsigned(u)
                } else {
                    Value::Number(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_yaml::Value::String(s) => Value::String(s.clone()),
            serde_yaml::Value::Sequence(seq) => {
                Value::Array(seq.iter().map(Value::from_yaml).collect())
            }
            serde_yaml::Value::Mapping(map) => Value::Object(
                map.iter()
                    .filter_map(|(k, v)| {
                        scalar_key(k).map(|key| (key, Value::from_yaml(v)))
                    })
                    .collect(),
            ),
            serde_yaml::Value::Tagged(tagged) => Value::from_yaml(&tagged.value),
        }
    }
}

/// Floats at or above 2^53 no longer hold every integer exactly
const MAX_EXACT_FLOAT_INT: f64 = 9_007_199_254_740_992.0;

/// Render a scalar mapping key as a string (`3.6: x` keys are allowed)
pub(crate) fn scalar_key(key: &serde_yaml::Value) -> Option<String> {
    match key {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Bool(_) | serde_yaml::Value::Number(_) => {
            Some(Value::from_yaml(key).as_string())
        }
        _ => None,
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        i64::try_from(n).map_or(Value::Unsigned(n), Value::Integer)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

/// Render `key=value` pairs as `os=linux, python=3.6`
pub fn format_tuple(values: &IndexMap<String, Value>) -> String {
    values
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(", ")
}
