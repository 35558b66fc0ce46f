//! Line splitter for CPU description files.

use crate::cpu::diagnostic::Diagnostic;

/// One non-blank source line split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub number: usize,
    /// Indented lines are records of the construct opened above them.
    pub indented: bool,
    pub parts: Vec<String>,
}

impl Line {
    pub fn head(&self) -> &str {
        self.parts.first().map(String::as_str).unwrap_or("")
    }

    pub fn args(&self) -> &[String] {
        self.parts.get(1..).unwrap_or(&[])
    }
}

pub struct Lexer<'src> {
    lines: std::iter::Enumerate<std::str::Lines<'src>>,
}

impl<'src> Lexer<'src> {
    pub fn new(src: &'src str) -> Self {
        Self {
            lines: src.lines().enumerate(),
        }
    }

    /// Next line with content; blank and comment-only lines are skipped.
    pub fn next_line(&mut self) -> Option<Result<Line, Diagnostic>> {
        for (index, text) in self.lines.by_ref() {
            let number = index + 1;
            let parts = match split(text) {
                Ok(parts) => parts,
                Err(message) => return Some(Err(Diagnostic::new(number, "unterminated-string", message))),
            };
            if parts.is_empty() {
                continue;
            }
            let indented = text.starts_with(char::is_whitespace);
            return Some(Ok(Line {
                number,
                indented,
                parts,
            }));
        }
        None
    }
}

impl Iterator for Lexer<'_> {
    type Item = Result<Line, Diagnostic>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_line()
    }
}

/// Splits on whitespace; a double-quoted segment is kept whole, quotes included, and `#`
/// outside quotes starts a comment.
fn split(text: &str) -> Result<Vec<String>, &'static str> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '#' => break,
            '"' => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
                let mut quoted = String::from('"');
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some(inner) => quoted.push(inner),
                        None => return Err("string literal is missing its closing quote"),
                    }
                }
                quoted.push('"');
                parts.push(quoted);
            }
            ch if ch.is_whitespace() => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
            ch => current.push(ch),
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_keep_quoted_segments_whole() {
        let mut lexer = Lexer::new("\tdis \"ld %s, #%d\" r 0x10 # trailing\n");
        let line = lexer.next_line().expect("line").expect("ok");
        assert!(line.indented);
        assert_eq!(line.head(), "dis");
        assert_eq!(line.args(), ["\"ld %s, #%d\"", "r", "0x10"]);
        assert!(lexer.next_line().is_none());
    }

    #[test]
    fn blank_and_comment_lines_are_skipped() {
        let lexer = Lexer::new("# header\n\n   \nregs\n\ta 8\n");
        let lines: Vec<Line> = lexer.map(|line| line.expect("ok")).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].number, 4);
        assert!(!lines[0].indented);
        assert_eq!(lines[1].parts, ["a", "8"]);
    }

    #[test]
    fn unterminated_string_is_reported_with_its_line() {
        let mut lexer = Lexer::new("foo\n\tdis \"oops\n");
        lexer.next_line().expect("first").expect("ok");
        let err = lexer.next_line().expect("second").unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.code, "unterminated-string");
    }
}
