//! Statement-boundary scanning.
//!
//! Tracks `{ ( [` nesting over code bytes only. At depth zero:
//!
//! - `;` is a boundary, unless the text before it ends with a `)` whose `(`
//!   opened on an earlier line (a multi-line call argument list)
//! - a newline is a boundary, unless the next significant character is in
//!   [`CONTINUATION_CHARS`]
//!
//! Comments are skipped when looking for the next significant character.

use super::scanner::SourceMask;

/// Characters that continue a statement onto the next line.
pub const CONTINUATION_CHARS: &[u8] = b".,?:+-*/%&|^<>=!([}";

/// Boundary offsets plus the nesting depth at every line start.
#[derive(Debug, Clone)]
pub struct StatementScan {
    /// Byte offsets of boundary `;` and newline characters, ascending
    pub boundaries: Vec<usize>,
    /// Depth at the start of each line; one extra entry holds the final depth
    pub line_depths: Vec<usize>,
}

impl StatementScan {
    pub fn run(source: &str, mask: &SourceMask) -> Self {
        let bytes = source.as_bytes();
        let mut boundaries = Vec::new();
        let mut line_depths = vec![0];
        // Open brackets with the line they opened on
        let mut open: Vec<(u8, usize)> = Vec::new();
        // Offset of the last depth-zero `)` and the line of its `(`
        let mut last_call_close: Option<(usize, usize)> = None;
        let mut line = 0usize;

        for (i, &b) in bytes.iter().enumerate() {
            if mask.is_code(i) {
                match b {
                    b'(' | b'[' | b'{' => open.push((b, line)),
                    b')' | b']' | b'}' => {
                        if let Some((_, opened_on)) = open.pop() {
                            if b == b')' && open.is_empty() {
                                last_call_close = Some((i, opened_on));
                            }
                        }
                    }
                    b';' if open.is_empty() => {
                        let closes_multiline_call = mask
                            .prev_significant(bytes, i)
                            .and_then(|prev| {
                                last_call_close
                                    .filter(|(close, _)| *close == prev)
                                    .map(|(_, opened_on)| opened_on < line)
                            })
                            .unwrap_or(false);
                        if !closes_multiline_call {
                            boundaries.push(i);
                        }
                    }
                    b'\n' if open.is_empty() => {
                        let continues = mask
                            .next_significant(bytes, i + 1)
                            .map(|next| CONTINUATION_CHARS.contains(&bytes[next]))
                            .unwrap_or(false);
                        if !continues {
                            boundaries.push(i);
                        }
                    }
                    _ => {}
                }
            }

            if b == b'\n' {
                line += 1;
                line_depths.push(open.len());
            }
        }
        line_depths.push(open.len());

        Self {
            boundaries,
            line_depths,
        }
    }

    /// Nesting depth at the start of 0-based `line`.
    pub fn depth_at_line(&self, line: usize) -> usize {
        self.line_depths.get(line).copied().unwrap_or(0)
    }

    /// Whether any boundary lies in `start..end`.
    pub fn has_boundary_in(&self, start: usize, end: usize) -> bool {
        let from = self.boundaries.partition_point(|&b| b < start);
        self.boundaries.get(from).is_some_and(|&b| b < end)
    }
}

/// Byte offsets of statement boundaries in `source`.
pub fn statement_boundaries(source: &str) -> Vec<usize> {
    StatementScan::run(source, &SourceMask::scan(source)).boundaries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boundary_chars(source: &str) -> Vec<char> {
        statement_boundaries(source)
            .into_iter()
            .map(|i| source.as_bytes()[i] as char)
            .collect()
    }

    #[test]
    fn test_semicolons_and_newlines() {
        assert_eq!(boundary_chars("a;\nb"), vec![';', '\n']);
        assert_eq!(statement_boundaries("a; b; c"), vec![1, 4]);
    }

    #[test]
    fn test_nested_semicolons_are_not_boundaries() {
        assert_eq!(statement_boundaries("for (let i = 0; i < 3; i++) {}"), Vec::<usize>::new());
        assert_eq!(statement_boundaries("f(() => { a; b; })"), Vec::<usize>::new());
    }

    #[test]
    fn test_strings_and_comments_are_skipped() {
        assert_eq!(statement_boundaries("x = ';'"), Vec::<usize>::new());
        assert_eq!(statement_boundaries("x /* ; */"), Vec::<usize>::new());
        assert_eq!(statement_boundaries("`a\nb`"), Vec::<usize>::new());
    }

    #[test]
    fn test_continuation_lines() {
        // Method chain, ternary and binary operator continuations
        assert_eq!(statement_boundaries("a\n  .map(f)"), Vec::<usize>::new());
        assert_eq!(statement_boundaries("c\n ? 1\n : 2"), Vec::<usize>::new());
        assert_eq!(statement_boundaries("a\n+ b"), Vec::<usize>::new());
        assert_eq!(boundary_chars("a\nb"), vec!['\n']);
    }

    #[test]
    fn test_comment_line_does_not_continue_a_statement() {
        assert_eq!(boundary_chars("a\n// note\nb"), vec!['\n', '\n']);
    }

    #[test]
    fn test_multiline_call_semicolon_is_not_a_boundary() {
        let source = "foo(\n  1,\n  2\n);\nbar();";
        let boundaries = statement_boundaries(source);
        let semicolons: Vec<usize> = boundaries
            .iter()
            .copied()
            .filter(|&i| source.as_bytes()[i] == b';')
            .collect();
        // Only the single-line `bar();` semicolon counts
        assert_eq!(semicolons, vec![source.len() - 1]);
    }

    #[test]
    fn test_line_depths() {
        let source = "if (x) {\n  y();\n}\nz";
        let scan = StatementScan::run(source, &SourceMask::scan(source));
        assert_eq!(scan.depth_at_line(0), 0);
        assert_eq!(scan.depth_at_line(1), 1);
        assert_eq!(scan.depth_at_line(2), 1);
        assert_eq!(scan.depth_at_line(3), 0);
    }
}
