//! # Source Rewriter
//!
//! Pure text-to-text transforms that prepare a user script for execution.
//! No parser is involved: everything runs off a string/template/comment-aware
//! scan ([`scanner`]) and a handful of line-level heuristics.
//!
//! ## Pipeline
//!
//! 1. [`modules`]: `import`/`export` → `require`/`module.exports`
//! 2. [`capture`]: top-level expression statements → capture calls
//! 3. [`returns`]: final expression → explicit `return`
//!
//! Every step preserves the line count, so a line in the instrumented text is
//! the same line in the user's source.

pub mod boundaries;
pub mod capabilities;
pub mod capture;
pub mod modules;
pub mod returns;
pub mod scanner;


use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::OnceLock;

pub use boundaries::statement_boundaries;
pub use capabilities::{required_capabilities, HostCapability};
pub use modules::{normalize_modules, uses_modules};

/// Name of the injected capture function.
pub const CAPTURE_FUNCTION: &str = "__scratchpad_capture";

/// Lines the execution wrapper adds ahead of user code.
pub const WRAPPER_LINES: usize = 1;

/// File name user code is compiled under, as it appears in stack traces.
pub const SCRIPT_FILENAME: &str = "scratchpad.js";

const STATEMENT_KEYWORDS: &[&str] = &[
    "const", "let", "var", "function", "class", "if", "for", "while", "do", "switch", "try",
    "throw", "import", "export", "return", "break", "continue", "debugger",
];

/// Whether `text` opens with a declaration or control keyword.
pub(crate) fn starts_with_keyword(text: &str) -> bool {
    STATEMENT_KEYWORDS.iter().any(|keyword| {
        text.strip_prefix(keyword).is_some_and(|rest| {
            !rest
                .chars()
                .next()
                .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '$')
        })
    })
}

/// Output of [`transform`], shared by both backends.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformationResult {
    pub normalized_script: String,
    pub instrumented_script: String,
    pub result_line: Option<usize>,
    pub expression_line_map: BTreeMap<usize, String>,
}

/// Run the full rewrite pipeline.
pub fn transform(script: &str) -> TransformationResult {
    let normalized_script = normalize_modules(script);
    let captured = capture::instrument_expressions(&normalized_script);
    let (instrumented_script, result_line) = returns::wrap_final_expression(&captured.text);

    TransformationResult {
        normalized_script,
        instrumented_script,
        result_line,
        expression_line_map: captured.expression_line_map,
    }
}

fn await_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\bawait\b").unwrap_or_else(|e| panic!("invalid await pattern: {e}"))
    })
}

/// Whether the script uses `await` in code and so needs an async wrapper.
pub fn needs_async_wrapper(script: &str) -> bool {
    let mask = scanner::SourceMask::scan(script);
    await_pattern()
        .find_iter(script)
        .any(|found| mask.is_code(found.start()))
}

/// Wrap `script` in an immediately-invoked function. Adds
/// [`WRAPPER_LINES`] lines ahead of the script.
pub fn wrap_invocation(script: &str, is_async: bool) -> String {
    let keyword = if is_async { "async function" } else { "function" };
    format!("({keyword} () {{\n{script}\n}})()")
}

/// Wrap `script` in a function that is compiled but never called, so syntax
/// errors surface without running anything.
pub fn wrap_for_syntax_check(script: &str) -> String {
    format!("(async function () {{\n{script}\n}})")
}
