//! Module-syntax normalization and module-usage detection.
//!
//! Import and export declarations are rewritten into synchronous `require`
//! calls and `module.exports` assignments. Matches starting inside strings,
//! templates or comments are left alone. Every replacement keeps the line
//! count of the text it replaces, so line numbers survive the rewrite.

use regex::{Captures, Regex};
use std::sync::OnceLock;

use super::scanner::SourceMask;

const IDENT: &str = r"[A-Za-z_$][\w$]*";
const SPECIFIER: &str = r#"['"]([^'"\n]+)['"]"#;

/// One rewrite rule: a pattern and how to render a match.
struct Rule {
    pattern: Regex,
    render: fn(&Captures) -> String,
}

/// Rules in application order. Combined default forms run before the plain
/// default form; re-exports with a source run before the bare export list.
fn rules() -> &'static [Rule] {
    static RULES: OnceLock<Vec<Rule>> = OnceLock::new();
    RULES.get_or_init(|| {
        let rule = |pattern: String, render: fn(&Captures) -> String| Rule {
            pattern: Regex::new(&pattern).unwrap_or_else(|e| panic!("invalid module pattern: {e}")),
            render,
        };
        vec![
            // import name, * as ns from 'mod'
            rule(
                format!(r"\bimport\s+({IDENT})\s*,\s*\*\s*as\s+({IDENT})\s+from\s*{SPECIFIER}\s*;?"),
                |c| {
                    format!(
                        "const {ns} = require('{module}'); const {name} = {default};",
                        ns = &c[2],
                        module = &c[3],
                        name = &c[1],
                        default = default_of(&c[2]),
                    )
                },
            ),
            // import name, { a, b as c } from 'mod'
            rule(
                format!(r"\bimport\s+({IDENT})\s*,\s*\{{([^}}]*)\}}\s*from\s*{SPECIFIER}\s*;?"),
                |c| {
                    let holder = format!("__module_{}", &c[1]);
                    format!(
                        "const {holder} = require('{module}'); const {{ {named} }} = {holder}; const {name} = {default};",
                        module = &c[3],
                        named = destructure(&c[2]),
                        name = &c[1],
                        default = default_of(&holder),
                    )
                },
            ),
            // import * as ns from 'mod'
            rule(
                format!(r"\bimport\s*\*\s*as\s+({IDENT})\s+from\s*{SPECIFIER}\s*;?"),
                |c| format!("const {} = require('{}');", &c[1], &c[2]),
            ),
            // import { a, b as c } from 'mod'
            rule(
                format!(r"\bimport\s*\{{([^}}]*)\}}\s*from\s*{SPECIFIER}\s*;?"),
                |c| format!("const {{ {} }} = require('{}');", destructure(&c[1]), &c[2]),
            ),
            // import name from 'mod'
            rule(
                format!(r"\bimport\s+({IDENT})\s+from\s*{SPECIFIER}\s*;?"),
                |c| format!("const {} = {};", &c[1], default_of(&format!("require('{}')", &c[2]))),
            ),
            // import 'mod'
            rule(format!(r"\bimport\s*{SPECIFIER}\s*;?"), |c| {
                format!("require('{}');", &c[1])
            }),
            // export default <expr>
            rule(r"\bexport\s+default\s+".to_string(), |_| String::new()),
            // export const|let|var|function|async function|class
            rule(
                r"\bexport\s+(const|let|var|function|async\s+function|class)\b".to_string(),
                |c| c[1].to_string(),
            ),
            // export { a, b as c } from 'mod'
            rule(
                format!(r"\bexport\s*\{{([^}}]*)\}}\s*from\s*{SPECIFIER}\s*;?"),
                |c| {
                    specifiers(&c[1])
                        .map(|(source, alias)| {
                            format!("module.exports.{alias} = require('{}').{source};", &c[2])
                        })
                        .collect::<Vec<_>>()
                        .join(" ")
                },
            ),
            // export * from 'mod'
            rule(format!(r"\bexport\s*\*\s*from\s*{SPECIFIER}\s*;?"), |c| {
                format!("Object.assign(module.exports, require('{}'));", &c[1])
            }),
            // export { a, b as c }
            rule(r"\bexport\s*\{[^}]*\}\s*;?".to_string(), |_| String::new()),
        ]
    })
}

/// Expression for a module's default export, falling back to the module.
fn default_of(module: &str) -> String {
    format!("((m) => (m && m.default !== undefined ? m.default : m))({module})")
}

/// `a, b as c` → `(a, a), (b, c)` pairs of (source name, local name).
fn specifiers(list: &str) -> impl Iterator<Item = (String, String)> + '_ {
    list.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut words = part.split_whitespace();
            let source = words.next().unwrap_or_default().to_string();
            let alias = match (words.next(), words.next()) {
                (Some("as"), Some(alias)) => alias.to_string(),
                _ => source.clone(),
            };
            (source, alias)
        })
}

/// `a, b as c` → `a, b: c`
fn destructure(list: &str) -> String {
    specifiers(list)
        .map(|(source, alias)| {
            if source == alias {
                source
            } else {
                format!("{source}: {alias}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Rewrite every import/export form into `require`-based code.
pub fn normalize_modules(source: &str) -> String {
    let mut text = source.to_string();
    for rule in rules() {
        text = apply_rule(&text, rule);
    }
    text
}

fn apply_rule(text: &str, rule: &Rule) -> String {
    let mask = SourceMask::scan(text);
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for captures in rule.pattern.captures_iter(text) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        if !mask.is_code(whole.start()) {
            continue;
        }
        out.push_str(&text[last..whole.start()]);
        out.push_str(&(rule.render)(&captures));
        // Keep the line count of the replaced text
        for _ in whole.as_str().matches('\n') {
            out.push('\n');
        }
        last = whole.end();
    }
    out.push_str(&text[last..]);
    out
}

/* ===================== Detection ===================== */

fn declaration_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?m)(?:^|;)[ \t]*(import|export)\b")
            .unwrap_or_else(|e| panic!("invalid declaration pattern: {e}"))
    })
}

fn load_call_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\b(require|import)\s*\(")
            .unwrap_or_else(|e| panic!("invalid load pattern: {e}"))
    })
}

/// Whether the script needs real module loading.
///
/// True for an `import`/`export` declaration at statement position or a
/// `require(...)`/`import(...)` call in code; occurrences inside strings,
/// templates and comments do not count.
pub fn uses_modules(source: &str) -> bool {
    let mask = SourceMask::scan(source);
    let bytes = source.as_bytes();

    let declared = declaration_pattern()
        .captures_iter(source)
        .filter_map(|c| c.get(1))
        .any(|keyword| mask.is_code(keyword.start()));

    declared
        || load_call_pattern().find_iter(source).any(|call| {
            let preceded_by_dot = call.start() > 0 && bytes[call.start() - 1] == b'.';
            mask.is_code(call.start()) && !preceded_by_dot
        })
}
