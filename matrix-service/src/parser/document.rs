// Matrix Document Parser
// Reads a YAML build-matrix document into a typed MatrixDocument

use crate::parser::error::{ConfigurationError, ConfigurationErrorKind, ParseError};
use crate::parser::models::{
    scalar_key, Axis, EnvBindings, ExcludeRule, IncludeJob, Lifecycle, Matrix, MatrixDocument,
    Phase, Value,
};
use crate::ServiceResult;

use serde_yaml::{Mapping, Value as Yaml};
use std::fs;
use std::path::Path;
use tracing::debug;

const AXES_KEY: &str = "axes";
const EXCLUDE_KEY: &str = "exclude";
const INCLUDE_KEY: &str = "include";
const ENV_KEY: &str = "env";
const NAME_KEY: &str = "name";

/// Parser for build-matrix documents
pub struct DocumentParser;

impl DocumentParser {
    /// Parse a document from a file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ServiceResult<MatrixDocument> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        debug!(path = %path.display(), bytes = content.len(), "read matrix document");
        Self::parse(&content)
    }

    /// Parse a document from a YAML string.
    ///
    /// An empty document is valid and yields an empty matrix with no defaults.
    pub fn parse(content: &str) -> ServiceResult<MatrixDocument> {
        let root: Yaml =
            serde_yaml::from_str(content).map_err(|e| ParseError::from_yaml_error(&e, content))?;

        let mapping = match root {
            Yaml::Mapping(mapping) => mapping,
            Yaml::Null => Mapping::new(),
            _ => {
                return Err(ParseError::new("document root must be a mapping", 1, 1)
                    .with_source_context(content, 0)
                    .with_suggestion("start the document with keys such as 'axes:' and 'script:'")
                    .into())
            }
        };

        let mut matrix = Matrix::new();
        let mut defaults = Lifecycle::new();

        for (key, value) in &mapping {
            let Some(key) = key.as_str() else {
                return Err(ParseError::new(
                    format!("top-level keys must be strings, found {}", describe(key)),
                    1,
                    1,
                )
                .into());
            };

            match key {
                AXES_KEY => matrix.axes = parse_axes(value)?,
                EXCLUDE_KEY => matrix.exclude = parse_exclude(value)?,
                INCLUDE_KEY => matrix.include = parse_include(value)?,
                ENV_KEY => defaults.env = Some(parse_env(value, ENV_KEY)?),
                _ => match Phase::from_key(key) {
                    Some(phase) => {
                        defaults.phases.insert(phase, parse_steps(value, key)?);
                    }
                    None => return Err(ParseError::unknown_key(key, &known_keys(), content).into()),
                },
            }
        }

        debug!(
            axes = matrix.axes.len(),
            exclude = matrix.exclude.len(),
            include = matrix.include.len(),
            "parsed matrix document"
        );

        Ok(MatrixDocument::new(matrix, defaults))
    }
}

fn known_keys() -> Vec<&'static str> {
    let mut keys = vec![AXES_KEY, EXCLUDE_KEY, INCLUDE_KEY, ENV_KEY];
    keys.extend(Phase::ALL.iter().map(Phase::as_str));
    keys
}

fn parse_axes(value: &Yaml) -> Result<Vec<Axis>, ConfigurationError> {
    let mapping = match value {
        Yaml::Null => return Ok(Vec::new()),
        Yaml::Mapping(mapping) => mapping,
        other => {
            return Err(ConfigurationError::new(
                ConfigurationErrorKind::MalformedAxis,
                AXES_KEY,
                format!("expected a mapping of axis name to values, found {}", describe(other)),
            ))
        }
    };

    mapping
        .iter()
        .map(|(key, values)| {
            let name = scalar_key(key).ok_or_else(|| {
                ConfigurationError::new(
                    ConfigurationErrorKind::MalformedAxis,
                    AXES_KEY,
                    format!("axis names must be scalars, found {}", describe(key)),
                )
            })?;

            match values {
                Yaml::Sequence(seq) => {
                    let values: Vec<Value> = seq.iter().map(Value::from_yaml).collect();
                    if let Some((idx, first)) = first_repeat(&values) {
                        return Err(ConfigurationError::new(
                            ConfigurationErrorKind::MalformedAxis,
                            format!("{}.{}[{}]", AXES_KEY, name, idx),
                            format!(
                                "value '{}' repeats {}[{}] and would duplicate jobs",
                                values[idx], name, first
                            ),
                        ));
                    }
                    Ok(Axis { name, values })
                }
                other => Err(ConfigurationError::new(
                    ConfigurationErrorKind::MalformedAxis,
                    format!("{}.{}", AXES_KEY, name),
                    format!("expected a list of values, found {}", describe(other)),
                )
                .with_suggestion(format!("write a single value as '{}: [value]'", name))),
            }
        })
        .collect()
}

/// Index of the first value matching an earlier one, with that earlier index
fn first_repeat(values: &[Value]) -> Option<(usize, usize)> {
    values.iter().enumerate().find_map(|(idx, value)| {
        values[..idx]
            .iter()
            .position(|earlier| earlier.matches(value))
            .map(|first| (idx, first))
    })
}

fn parse_exclude(value: &Yaml) -> Result<Vec<ExcludeRule>, ConfigurationError> {
    sequence_entries(value, EXCLUDE_KEY, ConfigurationErrorKind::MalformedExclude)?
        .iter()
        .enumerate()
        .map(|(idx, entry)| {
            let path = format!("{}[{}]", EXCLUDE_KEY, idx);
            let mapping = entry_mapping(entry, &path, ConfigurationErrorKind::MalformedExclude)?;

            if mapping.is_empty() {
                return Err(ConfigurationError::new(
                    ConfigurationErrorKind::MalformedExclude,
                    path,
                    "exclude rule has no constraints and would remove every job",
                ));
            }

            let mut rule = ExcludeRule::new();
            for (key, value) in mapping {
                let axis = scalar_key(key).ok_or_else(|| {
                    ConfigurationError::new(
                        ConfigurationErrorKind::MalformedExclude,
                        path.clone(),
                        format!("axis names must be scalars, found {}", describe(key)),
                    )
                })?;
                rule.constraints.insert(axis, Value::from_yaml(value));
            }
            Ok(rule)
        })
        .collect()
}

fn parse_include(value: &Yaml) -> Result<Vec<IncludeJob>, ConfigurationError> {
    sequence_entries(value, INCLUDE_KEY, ConfigurationErrorKind::MalformedInclude)?
        .iter()
        .enumerate()
        .map(|(idx, entry)| {
            let path = format!("{}[{}]", INCLUDE_KEY, idx);
            let mapping = entry_mapping(entry, &path, ConfigurationErrorKind::MalformedInclude)?;

            let mut job = IncludeJob::new();
            for (key, value) in mapping {
                let key = scalar_key(key).ok_or_else(|| {
                    ConfigurationError::new(
                        ConfigurationErrorKind::MalformedInclude,
                        path.clone(),
                        format!("keys must be scalars, found {}", describe(key)),
                    )
                })?;
                let key_path = format!("{}.{}", path, key);

                if key == NAME_KEY {
                    let Yaml::String(name) = value else {
                        return Err(ConfigurationError::new(
                            ConfigurationErrorKind::MalformedInclude,
                            key_path,
                            format!("expected a string, found {}", describe(value)),
                        ));
                    };
                    job.name = Some(name.clone());
                } else if key == ENV_KEY {
                    job.lifecycle.env = Some(parse_env(value, &key_path)?);
                } else if let Some(phase) = Phase::from_key(&key) {
                    job.lifecycle
                        .phases
                        .insert(phase, parse_steps(value, &key_path)?);
                } else {
                    job.fields.insert(key, Value::from_yaml(value));
                }
            }
            Ok(job)
        })
        .collect()
}

/// A phase accepts a single command or a list of commands
fn parse_steps(value: &Yaml, path: &str) -> Result<Vec<String>, ConfigurationError> {
    match value {
        Yaml::Null => Ok(Vec::new()),
        Yaml::Sequence(seq) => seq
            .iter()
            .enumerate()
            .map(|(idx, step)| {
                step_command(step).ok_or_else(|| {
                    ConfigurationError::new(
                        ConfigurationErrorKind::MalformedLifecycle,
                        format!("{}[{}]", path, idx),
                        format!("expected a command string, found {}", describe(step)),
                    )
                })
            })
            .collect(),
        other => step_command(other).map(|cmd| vec![cmd]).ok_or_else(|| {
            ConfigurationError::new(
                ConfigurationErrorKind::MalformedLifecycle,
                path,
                format!(
                    "expected a command or a list of commands, found {}",
                    describe(other)
                ),
            )
        }),
    }
}

fn step_command(step: &Yaml) -> Option<String> {
    match step {
        Yaml::String(s) => Some(s.clone()),
        Yaml::Bool(_) | Yaml::Number(_) => Some(Value::from_yaml(step).as_string()),
        _ => None,
    }
}

/// `env` accepts a mapping of scalars or a list of `KEY=VALUE` strings
fn parse_env(value: &Yaml, path: &str) -> Result<EnvBindings, ConfigurationError> {
    let malformed = |subject: String, message: String| {
        ConfigurationError::new(ConfigurationErrorKind::MalformedLifecycle, subject, message)
    };

    match value {
        Yaml::Null => Ok(EnvBindings::new()),
        Yaml::Mapping(mapping) => mapping
            .iter()
            .map(|(key, val)| {
                let name = scalar_key(key)
                    .filter(|name| !name.trim().is_empty())
                    .ok_or_else(|| {
                        malformed(
                            path.to_string(),
                            format!(
                                "variable names must be non-empty scalars, found {}",
                                describe(key)
                            ),
                        )
                    })?;
                if !Value::from_yaml(val).is_scalar() {
                    return Err(malformed(
                        format!("{}.{}", path, name),
                        format!("expected a scalar value, found {}", describe(val)),
                    ));
                }
                Ok((name, Value::from_yaml(val).as_string()))
            })
            .collect(),
        Yaml::Sequence(seq) => seq
            .iter()
            .enumerate()
            .map(|(idx, entry)| {
                entry
                    .as_str()
                    .and_then(|s| s.split_once('='))
                    .filter(|(name, _)| !name.trim().is_empty())
                    .map(|(name, val)| (name.trim().to_string(), val.to_string()))
                    .ok_or_else(|| {
                        malformed(
                            format!("{}[{}]", path, idx),
                            "expected a 'NAME=value' string".to_string(),
                        )
                    })
            })
            .collect(),
        other => Err(malformed(
            path.to_string(),
            format!("expected a mapping of variables, found {}", describe(other)),
        )),
    }
}

fn sequence_entries<'a>(
    value: &'a Yaml,
    path: &str,
    kind: ConfigurationErrorKind,
) -> Result<&'a [Yaml], ConfigurationError> {
    match value {
        Yaml::Null => Ok(&[]),
        Yaml::Sequence(seq) => Ok(seq.as_slice()),
        other => Err(ConfigurationError::new(
            kind,
            path,
            format!("expected a list, found {}", describe(other)),
        )),
    }
}

fn entry_mapping<'a>(
    entry: &'a Yaml,
    path: &str,
    kind: ConfigurationErrorKind,
) -> Result<&'a Mapping, ConfigurationError> {
    entry.as_mapping().ok_or_else(|| {
        ConfigurationError::new(
            kind,
            path,
            format!("expected a mapping, found {}", describe(entry)),
        )
    })
}

fn describe(value: &Yaml) -> &'static str {
    match value {
        Yaml::Null => "null",
        Yaml::Bool(_) => "a boolean",
        Yaml::Number(_) => "a number",
        Yaml::String(_) => "a string",
        Yaml::Sequence(_) => "a list",
        Yaml::Mapping(_) => "a mapping",
        Yaml::Tagged(_) => "a tagged value",
    }
}
