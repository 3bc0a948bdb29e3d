// Parser error types with helpful error messages
// Provides context, line/column info, and suggestions for common mistakes

use std::fmt;

/// Detailed parse error with location and context
#[derive(Debug, Clone)]
pub struct ParseError {
    /// Error message
    pub message: String,
    /// Line number (1-indexed)
    pub line: usize,
    /// Column number (1-indexed)
    pub column: usize,
    /// Surrounding context (a few lines around the error)
    pub context: String,
    /// Optional suggestion for fixing the error
    pub suggestion: Option<String>,
    /// The kind of error
    pub kind: ParseErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// YAML syntax error
    YamlSyntax,
    /// Document shape is not a mapping
    InvalidSchema,
    /// Unknown top-level key
    UnknownField,
}

impl ParseError {
    pub fn new(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            line,
            column,
            context: String::new(),
            suggestion: None,
            kind: ParseErrorKind::InvalidSchema,
        }
    }

    pub fn yaml_error(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self::new(message, line, column).with_kind(ParseErrorKind::YamlSyntax)
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_kind(mut self, kind: ParseErrorKind) -> Self {
        self.kind = kind;
        self
    }

    fn with_suggestion_opt(mut self, suggestion: Option<String>) -> Self {
        self.suggestion = suggestion;
        self
    }

    /// Create context from source content
    pub fn with_source_context(mut self, source: &str, context_lines: usize) -> Self {
        let lines: Vec<&str> = source.lines().collect();
        let start = self.line.saturating_sub(context_lines + 1);
        let end = (self.line + context_lines).min(lines.len());

        let mut context = String::new();
        for (i, line) in lines.iter().enumerate().take(end).skip(start) {
            let line_num = i + 1;
            let prefix = if line_num == self.line { ">" } else { " " };
            context.push_str(&format!("{} {:4} | {}\n", prefix, line_num, line));

            if line_num == self.line && self.column > 0 {
                let indicator = " ".repeat(self.column - 1) + "^";
                context.push_str(&format!("       | {}\n", indicator));
            }
        }

        self.context = context;
        self
    }

    /// Create from serde_yaml error
    pub fn from_yaml_error(err: &serde_yaml::Error, source: &str) -> Self {
        let (line, column) = err
            .location()
            .map(|loc| (loc.line(), loc.column()))
            .unwrap_or((1, 1));

        let suggestion = suggest_yaml_fix(source, line);

        ParseError::yaml_error(err.to_string(), line, column)
            .with_source_context(source, 2)
            .with_suggestion_opt(suggestion)
    }

    /// Error for a top-level key the document format does not define
    pub fn unknown_key(key: &str, known: &[&str], source: &str) -> Self {
        let line = find_key_line(source, key).unwrap_or(1);
        let suggestion = closest_key(key, known)
            .map(|candidate| format!("did you mean '{}'?", candidate))
            .unwrap_or_else(|| format!("expected one of: {}", known.join(", ")));

        ParseError::new(format!("unknown top-level key '{}'", key), line, 1)
            .with_kind(ParseErrorKind::UnknownField)
            .with_source_context(source, 1)
            .with_suggestion(suggestion)
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "error: {}", self.message)?;
        writeln!(f, "  --> line {}:{}", self.line, self.column)?;

        if !self.context.is_empty() {
            writeln!(f)?;
            write!(f, "{}", self.context)?;
        }

        if let Some(suggestion) = &self.suggestion {
            writeln!(f)?;
            writeln!(f, "help: {}", suggestion)?;
        }

        Ok(())
    }
}

impl std::error::Error for ParseError {}

/// Suggest fixes for common YAML errors
fn suggest_yaml_fix(source: &str, line: usize) -> Option<String> {
    let lines: Vec<&str> = source.lines().collect();
    let error_line = lines.get(line.saturating_sub(1)).unwrap_or(&"");

    if error_line.starts_with('\t') {
        return Some(
            "YAML prefers spaces over tabs for indentation. Replace tabs with spaces.".to_string(),
        );
    }

    if error_line.trim_start().starts_with("- ") && error_line.contains(": ") {
        return Some("check the indentation of this list entry and its keys".to_string());
    }

    None
}

/// Line (1-indexed) where `key:` first appears unindented
fn find_key_line(source: &str, key: &str) -> Option<usize> {
    source
        .lines()
        .position(|line| {
            line.strip_prefix(key)
                .is_some_and(|rest| rest.trim_start().starts_with(':'))
        })
        .map(|idx| idx + 1)
}

/// Closest known key within a small edit distance, or one that differs only by
/// case or `-`/`_`
fn closest_key<'a>(key: &str, known: &[&'a str]) -> Option<&'a str> {
    let normalized = key.to_lowercase().replace('-', "_");
    if let Some(exact) = known.iter().copied().find(|k| *k == normalized) {
        return Some(exact);
    }

    known
        .iter()
        .map(|candidate| (*candidate, edit_distance(&normalized, candidate)))
        .filter(|(_, distance)| *distance <= 2)
        .min_by_key(|(_, distance)| *distance)
        .map(|(candidate, _)| candidate)
}

fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();

    for (i, ca) in a.chars().enumerate() {
        let mut current = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            current[j + 1] = (prev[j] + cost)
                .min(prev[j + 1] + 1)
                .min(current[j] + 1);
        }
        prev = current;
    }

    prev[b.len()]
}

/// What part of the document a configuration error concerns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigurationErrorKind {
    /// `axes` is not a mapping of name to value list
    MalformedAxis,
    /// An `exclude` entry is not a non-empty mapping
    MalformedExclude,
    /// An `include` entry is not a mapping or has a bad `name`
    MalformedInclude,
    /// A phase or `env` entry has the wrong shape
    MalformedLifecycle,
    /// A job resolves to an empty `script` phase
    MissingScript,
}

/// Semantic configuration error, reported with the offending job or rule
#[derive(Debug, Clone)]
pub struct ConfigurationError {
    pub kind: ConfigurationErrorKind,
    /// Job identity or document path the error refers to
    pub subject: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl ConfigurationError {
    pub fn new(
        kind: ConfigurationErrorKind,
        subject: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            subject: subject.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn missing_script(identity: impl Into<String>) -> Self {
        Self::new(
            ConfigurationErrorKind::MissingScript,
            identity,
            "job has no script steps",
        )
        .with_suggestion("add a top-level 'script' default or a 'script' key on this job")
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "configuration error at '{}': {}", self.subject, self.message)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " ({})", suggestion)?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigurationError {}
