//! Error taxonomy for script execution.
//!
//! Every failure a user script can produce ends up as one [`ExecutionError`]
//! variant. The coordinator is the only layer that turns these into a terminal
//! [`ExecutionResult`](crate::types::ExecutionResult); the rewriter and the
//! inspector never fail outward.

use std::time::Duration;
use thiserror::Error;

use crate::error_map;

/// Message fragments that mark a parse failure as one the subprocess backend
/// should be given a chance at.
const RETRYABLE_PARSE_PATTERNS: &[&str] = &["unexpected token", "missing ) after argument list"];

#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Pre-execution parse failure, already mapped to the user's source.
    #[error("{display}")]
    Syntax {
        message: String,
        line: usize,
        column: usize,
        display: String,
    },

    /// Uncaught exception or rejection, formatted as `Kind: message`.
    #[error("{message}")]
    Runtime { message: String, line: Option<usize> },

    #[error("Execution timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Execution cancelled")]
    Cancelled,

    #[error("No JavaScript runtime available: {0}")]
    BackendUnavailable(String),

    #[error("Failed to stage execution: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed runner output: {0}")]
    Protocol(String),
}

impl ExecutionError {
    /// Build a syntax error against `source`, clamping the location into the
    /// source and rendering the caret display.
    pub fn syntax(source: &str, message: impl Into<String>, line: usize, column: usize) -> Self {
        let message = message.into();
        let location = error_map::clamp_location(source, line, column);
        let display = error_map::render_caret(source, &message, location);
        ExecutionError::Syntax {
            message,
            line: location.line,
            column: location.column,
            display,
        }
    }

    pub fn runtime(message: impl Into<String>, line: Option<usize>) -> Self {
        ExecutionError::Runtime {
            message: message.into(),
            line,
        }
    }

    /// 1-based line in the user's source, when one is known.
    pub fn line(&self) -> Option<usize> {
        match self {
            ExecutionError::Syntax { line, .. } => Some(*line),
            ExecutionError::Runtime { line, .. } => *line,
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExecutionError::Cancelled)
    }

    /// Parse errors the isolated engine is known to raise on text the
    /// subprocess runtime accepts.
    pub fn is_retryable_parse_error(&self) -> bool {
        let ExecutionError::Syntax { message, .. } = self else {
            return false;
        };
        let lowered = message.to_lowercase();
        RETRYABLE_PARSE_PATTERNS
            .iter()
            .any(|pattern| lowered.contains(pattern))
    }
}
