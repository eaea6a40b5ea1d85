//! # Error/Line Mapper
//!
//! Maps raw engine errors back onto the user's source: 1-based line and
//! column, offset by the wrapper lines added ahead of user code, and a
//! caret display for syntax errors.
//!
//! Stack traces from both engines name the user script either
//! [`SCRIPT_FILENAME`] (subprocess runner) or `eval_script` (QuickJS), so
//! one frame pattern serves both.

use regex::Regex;
use std::sync::OnceLock;

use crate::error::ExecutionError;
use crate::rewriter::SCRIPT_FILENAME;

/// A 1-based position in the user's source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

impl SourceLocation {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

fn frame_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let file = regex::escape(SCRIPT_FILENAME);
        Regex::new(&format!(r"(?:{file}|eval_script):(\d+)(?::(\d+))?"))
            .unwrap_or_else(|e| panic!("invalid frame pattern: {e}"))
    })
}

fn error_line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?m)^(?:Uncaught )?([A-Z]\w*Error): (.*)$")
            .unwrap_or_else(|e| panic!("invalid error pattern: {e}"))
    })
}

/// Clamp a raw position into `source`. Lines past the end land on the last
/// line; columns past the end of a line land just after its last character.
pub fn clamp_location(source: &str, line: usize, column: usize) -> SourceLocation {
    let lines: Vec<&str> = source.split('\n').collect();
    let line = line.clamp(1, lines.len().max(1));
    let width = lines
        .get(line - 1)
        .map(|text| text.trim_end_matches('\r').chars().count())
        .unwrap_or(0);
    SourceLocation::new(line, column.clamp(1, width + 1))
}

/// Render `message` with the offending line and a caret under `location`.
///
/// ```text
/// SyntaxError: Unexpected token ';' (1:9)
///  1 | let a = ;
///    |         ^
/// ```
pub fn render_caret(source: &str, message: &str, location: SourceLocation) -> String {
    let text = source
        .split('\n')
        .nth(location.line - 1)
        .unwrap_or_default()
        .trim_end_matches('\r');

    // Tabs stay tabs so the caret lines up in any tab width
    let padding: String = text
        .chars()
        .take(location.column - 1)
        .map(|c| if c == '\t' { '\t' } else { ' ' })
        .collect();

    let gutter = location.line.to_string();
    let blank = " ".repeat(gutter.len());
    let heading = if error_line_pattern().is_match(message) {
        message.to_string()
    } else {
        format!("SyntaxError: {message}")
    };

    format!(
        "{heading} ({}:{})\n {gutter} | {text}\n {blank} | {padding}^",
        location.line, location.column
    )
}

/// First user-script frame in `stack`, shifted back by `wrapper_lines`.
/// Frames that fall inside the wrapper are ignored.
pub fn location_from_stack(stack: &str, wrapper_lines: usize) -> Option<SourceLocation> {
    frame_pattern().captures_iter(stack).find_map(|captures| {
        let raw_line: usize = captures.get(1)?.as_str().parse().ok()?;
        let column = captures
            .get(2)
            .and_then(|c| c.as_str().parse().ok())
            .unwrap_or(1);
        let line = raw_line.checked_sub(wrapper_lines).filter(|&l| l > 0)?;
        Some(SourceLocation::new(line, column))
    })
}

pub fn line_from_stack(stack: &str, wrapper_lines: usize) -> Option<usize> {
    location_from_stack(stack, wrapper_lines).map(|location| location.line)
}

/// Best-effort error from diagnostic text a crashed runner left on its
/// output streams.
///
/// A `SyntaxError` with a frame becomes a mapped syntax error; any other
/// `Kind: message` line becomes a runtime error. Text with neither is
/// surfaced as a protocol error.
pub fn map_diagnostic(diagnostic: &str, source: &str, wrapper_lines: usize) -> ExecutionError {
    let location = location_from_stack(diagnostic, wrapper_lines);

    let Some(captures) = error_line_pattern().captures(diagnostic) else {
        let trimmed = diagnostic.trim();
        if trimmed.is_empty() {
            return ExecutionError::Protocol("runner exited without a result".to_string());
        }
        return ExecutionError::Protocol(last_lines(trimmed, 5));
    };

    let kind = &captures[1];
    let message = captures[2].trim();
    match (kind, location) {
        ("SyntaxError", Some(location)) => {
            ExecutionError::syntax(source, message, location.line, location.column)
        }
        _ => ExecutionError::runtime(
            format!("{kind}: {message}"),
            location.map(|location| location.line),
        ),
    }
}

fn last_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(count)..].join("\n")
}
