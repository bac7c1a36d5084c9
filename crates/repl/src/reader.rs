//! Source Reader
//!
//! Splits source text into whitespace-separated tokens, each tagged with
//! its 1-based line and column. `\` starts a comment that runs to the end
//! of the line. Parenthesised stack comments are left to the interpreter,
//! which needs their contents for definition headers.

/// One whitespace-delimited word of source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub line: usize,
    pub column: usize,
}

/// Tokenize `source`, numbering lines from `first_line`.
pub fn tokenize(source: &str, first_line: usize) -> Vec<Token> {
    let mut tokens = Vec::new();
    for (offset, line) in source.lines().enumerate() {
        let mut current: Option<(usize, String)> = None;
        for (column, ch) in line.chars().enumerate() {
            if ch.is_whitespace() {
                if let Some((start, text)) = current.take() {
                    tokens.push(Token {
                        text,
                        line: first_line + offset,
                        column: start + 1,
                    });
                }
                continue;
            }
            match &mut current {
                Some((_, text)) => text.push(ch),
                None => current = Some((column, ch.to_string())),
            }
        }
        if let Some((start, text)) = current {
            tokens.push(Token {
                text,
                line: first_line + offset,
                column: start + 1,
            });
        }
    }
    strip_line_comments(tokens)
}

/// Drop every `\` token and whatever follows it on the same line.
fn strip_line_comments(tokens: Vec<Token>) -> Vec<Token> {
    let mut comment_line = None;
    tokens
        .into_iter()
        .filter(|token| {
            if comment_line == Some(token.line) {
                return false;
            }
            if token.text == "\\" {
                comment_line = Some(token.line);
                return false;
            }
            true
        })
        .collect()
}

/// Parse a number token: decimal, `0x` hex or a `'c'` character literal.
pub fn parse_number(text: &str) -> Option<i64> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) if !rest.is_empty() => (true, rest),
        _ => (false, text),
    };
    let magnitude = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()? as i64
    } else if digits.len() == 3 && digits.starts_with('\'') && digits.ends_with('\'') {
        digits.chars().nth(1)? as i64
    } else if digits.bytes().all(|b| b.is_ascii_digit()) {
        digits.parse::<u64>().ok()? as i64
    } else {
        return None;
    };
    Some(if negative { magnitude.wrapping_neg() } else { magnitude })
}
