//! Error types for recipe parsing and variable handling.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading or mutating a recipe.
#[derive(Debug, Error)]
pub enum Error {
    /// Recipe file not found at the specified path
    #[error("recipe not found: {0}")]
    NotFound(PathBuf),

    /// Invalid recipe syntax
    #[error("invalid recipe syntax at line {line}: {message}")]
    Parse {
        /// Line number where the parse error occurred (1-indexed)
        line: usize,
        /// Description of the syntax error
        message: String,
    },

    /// Attempt to overwrite a variable declared with `var`
    #[error("variable {0} is read-only")]
    ReadOnlyVariable(String),

    /// Variable name contains characters outside `[A-Za-z0-9_-]`
    #[error("invalid variable name: {0:?}")]
    InvalidVariableName(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }

    /// Line number for syntax errors.
    pub fn line(&self) -> Option<usize> {
        match self {
            Self::Parse { line, .. } => Some(*line),
            _ => None,
        }
    }
}

/// Result type for recipe operations.
pub type Result<T> = std::result::Result<T, Error>;
