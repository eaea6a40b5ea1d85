//! Expression-capture instrumentation.
//!
//! Every top-level expression statement that sits alone on its line is
//! rewritten to `__scratchpad_capture(<expr>, <line>);`, so the backend can
//! report its value against the source line.

use std::collections::BTreeMap;

use super::boundaries::{StatementScan, CONTINUATION_CHARS};
use super::scanner::SourceMask;
use super::{starts_with_keyword, CAPTURE_FUNCTION};

/// Instrumented text and the line → expression map it produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureResult {
    pub text: String,
    pub expression_line_map: BTreeMap<usize, String>,
}

/// A physical line: byte range of its content and its terminator.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Line {
    pub start: usize,
    pub end: usize,
    pub terminator_end: usize,
}

pub(crate) fn split_lines(source: &str) -> Vec<Line> {
    let mut lines = Vec::new();
    let mut start = 0;
    for segment in source.split_inclusive('\n') {
        let terminator_end = start + segment.len();
        let content = segment
            .strip_suffix('\n')
            .map(|rest| rest.strip_suffix('\r').unwrap_or(rest))
            .unwrap_or(segment);
        lines.push(Line {
            start,
            end: start + content.len(),
            terminator_end,
        });
        start = terminator_end;
    }
    lines
}

pub fn instrument_expressions(source: &str) -> CaptureResult {
    let mask = SourceMask::scan(source);
    let scan = StatementScan::run(source, &mask);
    let bytes = source.as_bytes();

    let mut text = String::with_capacity(source.len() + 64);
    let mut expression_line_map = BTreeMap::new();

    for (index, line) in split_lines(source).into_iter().enumerate() {
        let line_number = index + 1;
        match capturable_expression(source, &mask, &scan, index, line) {
            Some((content_start, expression)) => {
                text.push_str(&source[line.start..content_start]);
                text.push_str(&format!("{CAPTURE_FUNCTION}({expression}, {line_number});"));
                expression_line_map.insert(line_number, expression.to_string());
            }
            None => text.push_str(&source[line.start..line.end]),
        }
        text.push_str(&source[line.end..line.terminator_end]);
    }

    debug_assert_eq!(bytes.iter().filter(|&&b| b == b'\n').count(), text.matches('\n').count());

    CaptureResult {
        text,
        expression_line_map,
    }
}

/// The expression on `line` if it is a capturable top-level statement,
/// with the offset where its content starts.
fn capturable_expression<'a>(
    source: &'a str,
    mask: &SourceMask,
    scan: &StatementScan,
    index: usize,
    line: Line,
) -> Option<(usize, &'a str)> {
    let bytes = source.as_bytes();

    // Top level only, and not the tail of a string or template
    if scan.depth_at_line(index) != 0 || scan.depth_at_line(index + 1) != 0 {
        return None;
    }
    if line.start > 0 && !mask.is_code(line.start - 1) {
        return None;
    }
    // Nor the head of one that runs onto the next line
    if line.end < source.len() && !mask.is_code(line.end) {
        return None;
    }

    let content_start = (line.start..line.end).find(|&i| !bytes[i].is_ascii_whitespace())?;
    if mask.is_comment(content_start) {
        return None;
    }

    // Cut trailing comments and whitespace
    let content_end = (content_start..line.end)
        .rev()
        .find(|&i| mask.is_significant(bytes, i))?
        + 1;
    let content = &source[content_start..content_end];

    if !starts_statement(source, mask, scan, content_start) || skipped_form(content) {
        return None;
    }

    // One statement per line: no boundary before the final character
    if scan.has_boundary_in(content_start, content_end - 1) {
        return None;
    }

    let complete = content.ends_with(';')
        || line.terminator_end == line.end
        || next_line_ends_statement(bytes, mask, line.terminator_end);
    if !complete {
        return None;
    }

    let expression = content.strip_suffix(';').unwrap_or(content).trim_end();
    if expression.is_empty() {
        return None;
    }
    Some((content_start, expression))
}

/// Forms left unchanged regardless of completeness.
fn skipped_form(content: &str) -> bool {
    let first = content.as_bytes()[0];
    starts_with_keyword(content)
        || content.bytes().all(|b| matches!(b, b')' | b']' | b'}' | b';' | b','))
        || matches!(first, b')' | b']' | b'}' | b'?' | b':' | b'.')
        || content.ends_with('{')
        || content.starts_with("console.")
        || content.starts_with(CAPTURE_FUNCTION)
}

/// Whether a new statement begins at `offset`: nothing precedes it, or a
/// boundary separates it from the previous significant character.
fn starts_statement(source: &str, mask: &SourceMask, scan: &StatementScan, offset: usize) -> bool {
    match mask.prev_significant(source.as_bytes(), offset) {
        None => true,
        Some(prev) => scan.has_boundary_in(prev, offset),
    }
}

/// The next non-empty line does not continue the current statement.
fn next_line_ends_statement(bytes: &[u8], mask: &SourceMask, from: usize) -> bool {
    match mask.next_significant(bytes, from) {
        Some(next) => !CONTINUATION_CHARS.contains(&bytes[next]),
        None => true,
    }
}
