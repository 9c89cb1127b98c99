use std::path::PathBuf;

use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;

/// A single raw record that could not be normalized.
///
/// Parse failures are isolated to their record: the pipeline drops the
/// record, reports it and keeps going.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error(
    "record {} ({}) rejected: {reason}",
    .nid.as_deref().unwrap_or("?"),
    .title.as_deref().unwrap_or("untitled")
)]
pub struct ParseError {
    pub nid: Option<String>,
    pub title: Option<String>,
    pub reason: String,
}

impl ParseError {
    pub fn new(nid: Option<&str>, title: Option<&str>, reason: impl Into<String>) -> Self {
        Self {
            nid: nid.map(str::to_string),
            title: title.map(str::to_string),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum RecallError {
    #[error("recall source request failed on page {page}: {message}")]
    FetchHttp { page: u32, message: String },

    #[error("recall source returned status {status} on page {page}: {message}")]
    FetchStatus {
        page: u32,
        status: u16,
        message: String,
    },

    #[error("failed to decode recall source payload: {0}")]
    SourceDecode(String),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("load transaction failed: {0}")]
    Load(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to read file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON rules: {0}")]
    RulesParse(String),

    #[error("invalid classification rule {pattern:?}: {message}")]
    InvalidRule { pattern: String, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl RecallError {
    /// Systemic failures abort the run; per-record parse failures do not.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, RecallError::Parse(_))
    }
}
