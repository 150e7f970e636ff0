use std::iter::Enumerate;
use std::str::Lines;

/// Joins physical lines ending in `\` with the line after them, yielding
/// each logical line with the 1-based number of its first physical line.
pub struct LogicalLines<'a> {
    lines: Enumerate<Lines<'a>>,
}

impl<'a> LogicalLines<'a> {
    pub fn new(source: &'a str) -> LogicalLines<'a> {
        LogicalLines {
            lines: source.lines().enumerate(),
        }
    }
}

impl<'a> Iterator for LogicalLines<'a> {
    type Item = (usize, String);

    fn next(&mut self) -> Option<Self::Item> {
        let (index, first) = self.lines.next()?;
        let mut line = first.to_string();

        while is_continued(&line) {
            trim_continuation(&mut line);
            match self.lines.next() {
                Some((_, next)) => {
                    line.push(' ');
                    line.push_str(next.trim());
                }
                // dangling continuation at end of input
                None => break,
            }
        }

        Some((index + 1, line))
    }
}

/// A trailing `\\` is an escaped backslash, not a continuation.
fn is_continued(line: &str) -> bool {
    line.ends_with('\\') && !line.ends_with("\\\\")
}

fn trim_continuation(line: &mut String) {
    let len = line.trim_end_matches('\\').trim_end().len();
    line.truncate(len);
}

#[cfg(test)]
fn collect(source: &str) -> Vec<(usize, String)> {
    LogicalLines::new(source).collect()
}

#[test]
fn test_plain_lines() {
    assert_eq!(
        collect("a\n\nb\n"),
        vec![(1, "a".to_string()), (2, "".to_string()), (3, "b".to_string())]
    );
    assert_eq!(collect(""), vec![]);
}

#[test]
fn test_continuation() {
    assert_eq!(
        collect("SRC = a.c \\\n    b.c \\\n\tc.c\nall:\n"),
        vec![(1, "SRC = a.c b.c c.c".to_string()), (4, "all:".to_string())]
    );
    assert_eq!(
        collect("\techo one\\\n  two"),
        vec![(1, "\techo one two".to_string())]
    );
}

#[test]
fn test_escaped_backslash() {
    assert_eq!(
        collect("path = C:\\\\\nnext"),
        vec![(1, "path = C:\\\\".to_string()), (2, "next".to_string())]
    );
}

#[test]
fn test_continuation_at_end_of_input() {
    assert_eq!(collect("a \\"), vec![(1, "a".to_string())]);
}

#[test]
fn test_crlf() {
    assert_eq!(
        collect("a \\\r\nb\r\nc"),
        vec![(1, "a b".to_string()), (3, "c".to_string())]
    );
}
