//! Final-expression return wrapping.
//!
//! The last statement of the script becomes `return <expr>;` so the backend
//! can report one program result. Trailing comments are walked past, and
//! declarations, control statements and bare fragments are left alone.

use super::boundaries::StatementScan;
use super::scanner::SourceMask;
use super::starts_with_keyword;

/// Wrapped text and the 1-based line of the wrapped statement.
pub fn wrap_final_expression(source: &str) -> (String, Option<usize>) {
    let mask = SourceMask::scan(source);
    let scan = StatementScan::run(source, &mask);
    let bytes = source.as_bytes();

    // Statements end just after each boundary
    let mut starts = vec![0];
    starts.extend(scan.boundaries.iter().map(|b| b + 1));
    let mut ends: Vec<usize> = scan.boundaries.iter().map(|b| b + 1).collect();
    ends.push(source.len());

    for (&start, &end) in starts.iter().zip(ends.iter()).rev() {
        let Some(first) = (start..end).find(|&i| mask.is_significant(bytes, i)) else {
            // Blank or comment-only: keep walking back
            continue;
        };
        return wrap_statement(source, &mask, first, end);
    }

    (source.to_string(), None)
}

fn wrap_statement(source: &str, mask: &SourceMask, first: usize, end: usize) -> (String, Option<usize>) {
    let bytes = source.as_bytes();
    let statement = &source[first..end];

    let leading = bytes[first];
    if starts_with_keyword(statement)
        || matches!(leading, b')' | b']' | b'}' | b'{')
        || statement.starts_with("async function")
    {
        return (source.to_string(), None);
    }

    // Last significant byte of the statement, before any trailing comment
    let Some(last) = (first..end).rev().find(|&i| mask.is_significant(bytes, i)) else {
        return (source.to_string(), None);
    };
    let mut expression_end = last + 1;
    if bytes[last] == b';' {
        expression_end = last;
    }
    let expression = source[first..expression_end].trim_end();
    if expression.is_empty() {
        return (source.to_string(), None);
    }

    // Keep the tail's line breaks, drop its comments and the `;`
    let tail: String = source[first + expression.len()..end]
        .chars()
        .filter(|&c| c == '\n')
        .collect();

    let mut wrapped = String::with_capacity(source.len() + 8);
    wrapped.push_str(&source[..first]);
    wrapped.push_str("return ");
    wrapped.push_str(expression);
    wrapped.push(';');
    wrapped.push_str(&tail);
    wrapped.push_str(&source[end..]);

    let line = source[..first].matches('\n').count() + 1;
    (wrapped, Some(line))
}
