// Parser module for build-matrix documents
// Provides YAML parsing, structural validation, and the document model

pub mod document;
pub mod error;
pub mod models;

pub use document::DocumentParser;
pub use error::{ConfigurationError, ConfigurationErrorKind, ParseError, ParseErrorKind};
pub use models::*;
