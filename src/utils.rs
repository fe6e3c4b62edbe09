//! Lexical helpers shared by the source model builder and the engine.

/// Blanks out comments and string/bytes literal contents while keeping every
/// newline in place, so line numbers computed on the result match the input.
///
/// Quote characters are kept (`"abc"` becomes `"   "`) so call syntax such as
/// `.call("")` still reads as a call after sanitizing.
pub fn strip_comments_and_literals(source: &str) -> String {
    #[derive(Clone, Copy, PartialEq)]
    enum State {
        Code,
        LineComment,
        BlockComment,
        Literal(char),
    }

    let mut out = String::with_capacity(source.len());
    let mut state = State::Code;
    let mut chars = source.chars().peekable();

    while let Some(ch) = chars.next() {
        match state {
            State::Code => match ch {
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    out.push_str("  ");
                    state = State::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    out.push_str("  ");
                    state = State::BlockComment;
                }
                '"' | '\'' => {
                    out.push(ch);
                    state = State::Literal(ch);
                }
                _ => out.push(ch),
            },
            State::LineComment => {
                if ch == '\n' {
                    out.push('\n');
                    state = State::Code;
                } else {
                    out.push(' ');
                }
            }
            State::BlockComment => {
                if ch == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    out.push_str("  ");
                    state = State::Code;
                } else if ch == '\n' {
                    out.push('\n');
                } else {
                    out.push(' ');
                }
            }
            State::Literal(quote) => {
                if ch == '\\' {
                    out.push(' ');
                    // An escaped newline still has to keep the line count intact.
                    if let Some(next) = chars.next() {
                        out.push(if next == '\n' { '\n' } else { ' ' });
                    }
                } else if ch == quote {
                    out.push(ch);
                    state = State::Code;
                } else if ch == '\n' {
                    // Unterminated literal: literals cannot span lines.
                    out.push('\n');
                    state = State::Code;
                } else {
                    out.push(' ');
                }
            }
        }
    }

    out
}

pub fn is_ident_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '$'
}

pub fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' || first == '$' => {
            chars.all(is_ident_char)
        }
        _ => false,
    }
}

/// Collapses runs of whitespace into single spaces and trims the ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Byte index of the delimiter closing the one at `open_idx`, if balanced.
pub fn find_matching(text: &str, open_idx: usize, open: u8, close: u8) -> Option<usize> {
    let bytes = text.as_bytes();
    if bytes.get(open_idx) != Some(&open) {
        return None;
    }
    let mut depth = 0usize;
    for (idx, &b) in bytes.iter().enumerate().skip(open_idx) {
        if b == open {
            depth += 1;
        } else if b == close {
            depth -= 1;
            if depth == 0 {
                return Some(idx);
            }
        }
    }
    None
}

/// Byte index of the delimiter opening the one at `close_idx`, scanning backwards.
pub fn find_matching_backwards(text: &str, close_idx: usize, open: u8, close: u8) -> Option<usize> {
    let bytes = text.as_bytes();
    if bytes.get(close_idx) != Some(&close) {
        return None;
    }
    let mut depth = 0usize;
    for idx in (0..=close_idx).rev() {
        let b = bytes[idx];
        if b == close {
            depth += 1;
        } else if b == open {
            depth -= 1;
            if depth == 0 {
                return Some(idx);
            }
        }
    }
    None
}

/// Splits on `sep` only where no parenthesis, bracket or brace is open.
pub fn split_top_level(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (idx, ch) in text.char_indices() {
        match ch {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            c if c == sep && depth <= 0 => {
                parts.push(&text[start..idx]);
                start = idx + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

/// Every identifier in `text` with its byte offset.
pub fn identifiers(text: &str) -> Vec<(usize, &str)> {
    let mut found = Vec::new();
    let mut start: Option<usize> = None;
    for (idx, ch) in text.char_indices() {
        if is_ident_char(ch) {
            if start.is_none() {
                start = Some(idx);
            }
        } else if let Some(s) = start.take() {
            push_identifier(&mut found, text, s, idx);
        }
    }
    if let Some(s) = start {
        push_identifier(&mut found, text, s, text.len());
    }
    found
}

fn push_identifier<'a>(found: &mut Vec<(usize, &'a str)>, text: &'a str, start: usize, end: usize) {
    let word = &text[start..end];
    if is_identifier(word) {
        found.push((start, word));
    }
}

pub fn extract_code_snippet(content: &str, line: usize, context_lines: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    if line == 0 || line > lines.len() {
        return String::new();
    }
    let start = line.saturating_sub(context_lines + 1);
    let end = std::cmp::min(line + context_lines, lines.len());

    lines[start..end]
        .iter()
        .enumerate()
        .map(|(i, line_content)| {
            let line_num = start + i + 1;
            if line_num == line {
                format!(">>> {:4} | {}", line_num, line_content)
            } else {
                format!("    {:4} | {}", line_num, line_content)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_keeps_line_layout() {
        let source = "a = 1; // x.call()\n/* multi\nline */ b = \"msg.sender.call()\";\n";
        let stripped = strip_comments_and_literals(source);
        assert_eq!(stripped.lines().count(), source.lines().count());
        assert!(!stripped.contains("call"));
        assert!(stripped.contains("b = \""));
    }

    #[test]
    fn test_strip_handles_escaped_quotes() {
        let stripped = strip_comments_and_literals(r#"s = "a\"b.call()"; t = 1;"#);
        assert!(!stripped.contains("call"));
        assert!(stripped.contains("t = 1;"));
    }

    #[test]
    fn test_find_matching_pairs() {
        let text = "f(a, (b), c) + 1";
        assert_eq!(find_matching(text, 1, b'(', b')'), Some(11));
        assert_eq!(find_matching_backwards(text, 11, b'(', b')'), Some(1));
        assert_eq!(find_matching("f(a", 1, b'(', b')'), None);
    }

    #[test]
    fn test_split_top_level_respects_nesting() {
        let parts = split_top_level("uint a, mapping(address => uint) b, f(x, y)", ',');
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1].trim(), "mapping(address => uint) b");
    }

    #[test]
    fn test_snippet_marks_primary_line() {
        let snippet = extract_code_snippet("one\ntwo\nthree\nfour", 2, 1);
        assert!(snippet.contains(">>>    2 | two"));
        assert!(snippet.contains("       1 | one"));
        assert!(extract_code_snippet("one", 5, 1).is_empty());
    }
}
