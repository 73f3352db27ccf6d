//! Error handling for the query-rewriting core.
//!
//! One flat error enum covers the whole crate. The only recoverable kind is
//! [`Error::Warning`]: the expansion engine records it on the
//! [`QueryResult`](crate::QueryResult) sink and keeps going with the block's
//! raw content; everything else surfaces to the caller.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Structural mistake in a query template.
    #[error("parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    /// Extension name (or alias) that cannot be resolved.
    #[error("unknown extension '{name}'")]
    Resolution { name: String },

    /// Raised by an extension listener while evaluating a block.
    #[error("extension '{extension}' failed: {message}")]
    Extension { extension: String, message: String },

    /// Recoverable diagnostic from an extension listener. Evaluation
    /// continues with the block's raw content as the substitution.
    #[error("{0}")]
    Warning(String),

    /// Backend driver or statement failure, carrying the expanded queries
    /// that were in flight when it happened.
    #[error("backend error: {message}{}", render_queries(.queries))]
    Backend {
        message: String,
        queries: Vec<String>,
    },

    /// Unusable configuration, or a broken internal invariant.
    #[error("configuration error: {0}")]
    Config(String),

    /// Failure while releasing a child resource.
    #[error("resource error: {0}")]
    Resource(String),
}

fn render_queries(queries: &[String]) -> String {
    if queries.is_empty() {
        String::new()
    } else {
        format!(" (queries: {queries:?})")
    }
}

impl Error {
    pub fn parse(offset: usize, message: impl Into<String>) -> Self {
        Error::Parse {
            offset,
            message: message.into(),
        }
    }

    pub fn resolution(name: impl Into<String>) -> Self {
        Error::Resolution { name: name.into() }
    }

    pub fn extension(extension: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Extension {
            extension: extension.into(),
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Error::Warning(message.into())
    }

    pub fn backend(message: impl Into<String>, queries: Vec<String>) -> Self {
        Error::Backend {
            message: message.into(),
            queries,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    pub fn resource(message: impl Into<String>) -> Self {
        Error::Resource(message.into())
    }

    /// True iff this error is the recoverable [`Error::Warning`] kind.
    pub fn is_warning(&self) -> bool {
        matches!(self, Error::Warning(_))
    }
}
