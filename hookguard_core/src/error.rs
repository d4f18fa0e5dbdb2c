//! Error types for the evaluation engine.

use thiserror::Error;

/// Errors raised while parsing a permission pattern string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    /// The pattern string was empty or only whitespace.
    #[error("empty permission pattern")]
    Empty,

    /// Nothing precedes the opening parenthesis.
    #[error("missing tool name in pattern: {0}")]
    MissingTool(String),

    /// Parentheses are missing, misplaced or unbalanced.
    #[error("malformed permission pattern: {0}")]
    Malformed(String),

    /// The glob could not be compiled into a matcher.
    #[error("invalid glob '{glob}': {reason}")]
    InvalidGlob { glob: String, reason: String },
}

/// Result type alias for pattern operations.
pub type Result<T> = std::result::Result<T, PatternError>;
