//! Judge templates: how to build a judgment prompt and how to read the reply.
//!
//! Templates are persisted to a JSON (or YAML) file and held in memory as a
//! copy-on-write snapshot, so lookups never wait on disk writes.

mod store;
mod types;

pub use store::{SharedTemplateStore, TemplateStore};
pub use types::{
    referenced_placeholders, score_range, slugify, FieldDecl, FieldType, OutputParserRules, PromptStructure,
    Template, TemplateSummary, PLACEHOLDERS,
};

pub(crate) use types::placeholder_regex;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Template '{0}' not found")]
    NotFound(String),

    #[error("Template '{0}' already exists")]
    Conflict(String),

    #[error("Invalid template: {0}")]
    Invalid(String),

    #[error("Failed to persist templates: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read template file {path}: {message}")]
    Format { path: String, message: String },
}
