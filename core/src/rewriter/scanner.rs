//! Lexical region mask.
//!
//! One forward pass classifies every byte of a script as code, quoted string,
//! template literal text, line comment or block comment. Template
//! substitutions (`${ ... }`) are code again, nested to any depth. Regular
//! expression literals are not recognized.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Code,
    String,
    Template,
    LineComment,
    BlockComment,
}

impl Region {
    pub fn is_comment(self) -> bool {
        matches!(self, Region::LineComment | Region::BlockComment)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Code,
    Quote(u8),
    Template,
    LineComment,
    BlockComment,
}

/// Per-byte region classification of a source text.
#[derive(Debug, Clone)]
pub struct SourceMask {
    regions: Vec<Region>,
}

impl SourceMask {
    pub fn scan(source: &str) -> Self {
        let bytes = source.as_bytes();
        let mut regions = vec![Region::Code; bytes.len()];
        let mut mode = Mode::Code;
        // Brace depth at which each open template substitution started
        let mut substitutions: Vec<usize> = Vec::new();
        let mut braces = 0usize;
        let mut i = 0;

        while i < bytes.len() {
            let b = bytes[i];
            let next = bytes.get(i + 1).copied();

            match mode {
                Mode::Code => match b {
                    b'/' if next == Some(b'/') => {
                        mode = Mode::LineComment;
                        regions[i] = Region::LineComment;
                    }
                    b'/' if next == Some(b'*') => {
                        mode = Mode::BlockComment;
                        regions[i] = Region::BlockComment;
                        regions[i + 1] = Region::BlockComment;
                        i += 2;
                        continue;
                    }
                    b'\'' | b'"' => {
                        mode = Mode::Quote(b);
                        regions[i] = Region::String;
                    }
                    b'`' => {
                        mode = Mode::Template;
                        regions[i] = Region::Template;
                    }
                    b'{' => braces += 1,
                    b'}' => {
                        if substitutions.last() == Some(&braces) {
                            substitutions.pop();
                            mode = Mode::Template;
                            regions[i] = Region::Template;
                        } else {
                            braces = braces.saturating_sub(1);
                        }
                    }
                    _ => {}
                },
                Mode::Quote(quote) => {
                    regions[i] = Region::String;
                    if b == b'\\' {
                        if next.is_some() {
                            regions[i + 1] = Region::String;
                        }
                        i += 2;
                        continue;
                    }
                    if b == quote {
                        mode = Mode::Code;
                    } else if b == b'\n' {
                        // Unterminated string: recover at end of line
                        regions[i] = Region::Code;
                        mode = Mode::Code;
                    }
                }
                Mode::Template => {
                    regions[i] = Region::Template;
                    match b {
                        b'\\' => {
                            if next.is_some() {
                                regions[i + 1] = Region::Template;
                            }
                            i += 2;
                            continue;
                        }
                        b'`' => mode = Mode::Code,
                        b'$' if next == Some(b'{') => {
                            regions[i + 1] = Region::Template;
                            substitutions.push(braces);
                            mode = Mode::Code;
                            i += 2;
                            continue;
                        }
                        _ => {}
                    }
                }
                Mode::LineComment => {
                    if b == b'\n' {
                        mode = Mode::Code;
                    } else {
                        regions[i] = Region::LineComment;
                    }
                }
                Mode::BlockComment => {
                    regions[i] = Region::BlockComment;
                    if b == b'*' && next == Some(b'/') {
                        regions[i + 1] = Region::BlockComment;
                        mode = Mode::Code;
                        i += 2;
                        continue;
                    }
                }
            }
            i += 1;
        }

        Self { regions }
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Region of byte `index`; past the end counts as code.
    pub fn region(&self, index: usize) -> Region {
        self.regions.get(index).copied().unwrap_or(Region::Code)
    }

    pub fn is_code(&self, index: usize) -> bool {
        self.region(index) == Region::Code
    }

    pub fn is_comment(&self, index: usize) -> bool {
        self.region(index).is_comment()
    }

    /// Bytes that carry meaning: anything but whitespace and comments.
    pub fn is_significant(&self, source: &[u8], index: usize) -> bool {
        !self.is_comment(index) && !source[index].is_ascii_whitespace()
    }

    /// First significant byte at or after `from`.
    pub fn next_significant(&self, source: &[u8], from: usize) -> Option<usize> {
        (from..source.len()).find(|&i| self.is_significant(source, i))
    }

    /// Last significant byte strictly before `before`.
    pub fn prev_significant(&self, source: &[u8], before: usize) -> Option<usize> {
        (0..before.min(source.len()))
            .rev()
            .find(|&i| self.is_significant(source, i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regions(source: &str) -> String {
        let mask = SourceMask::scan(source);
        (0..source.len())
            .map(|i| match mask.region(i) {
                Region::Code => 'c',
                Region::String => 's',
                Region::Template => 't',
                Region::LineComment => 'l',
                Region::BlockComment => 'b',
            })
            .collect()
    }

    #[test]
    fn test_strings_and_comments() {
        assert_eq!(regions("a'b'c"), "csssc");
        assert_eq!(regions("x // y\nz"), "ccllllcc");
        assert_eq!(regions("a/*b*/c"), "cbbbbbc");
    }

    #[test]
    fn test_escaped_quote_stays_in_string() {
        assert_eq!(regions(r"'a\'b'c"), "ssssssc");
    }

    #[test]
    fn test_template_substitution_is_code() {
        assert_eq!(regions("`a${b}c`"), "ttttcttt");
        assert_eq!(regions("`${ {x:1}.x }`d"), "tttcccccccccttc");
    }

    #[test]
    fn test_comment_markers_inside_strings_are_ignored() {
        let source = "const url = 'http://example.com'; x";
        let mask = SourceMask::scan(source);
        assert!(mask.is_code(source.len() - 1));
    }
}
