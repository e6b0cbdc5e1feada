//! Tokenizer for the transformation expression dialect.

use super::ScriptError;


/// A lexical token with its byte offset in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Str(String),
    Ident(String),
    /// Operators and punctuation, e.g. `===`, `?.`, `(`.
    Punct(&'static str),
    Eof,
}

impl TokenKind {
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Number(n) => format!("number {}", n),
            TokenKind::Str(s) => format!("string \"{}\"", s),
            TokenKind::Ident(s) => format!("'{}'", s),
            TokenKind::Punct(p) => format!("'{}'", p),
            TokenKind::Eof => "end of input".to_string(),
        }
    }
}


/// Longest operators first so `===` wins over `==` and `=`.
const PUNCTUATION: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "??", "+", "-", "*", "/", "%", "<", ">",
    "!", "?", ":", "(", ")", "[", "]", "{", "}", ",", ".", ";", "=",
];


/// Split `source` into tokens, ending with a single `Eof`.
pub fn tokenize(source: &str) -> Result<Vec<Token>, ScriptError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];

        if b.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        // Line and block comments.
        if source[i..].starts_with("//") {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            continue;
        }
        if source[i..].starts_with("/*") {
            let end = source[i + 2..]
                .find("*/")
                .ok_or_else(|| ScriptError::parse(i, "unterminated comment"))?;
            i += end + 4;
            continue;
        }

        if b.is_ascii_digit() || (b == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit)) {
            let (n, len) = lex_number(&source[i..]).ok_or_else(|| ScriptError::parse(i, "malformed number"))?;
            tokens.push(Token { kind: TokenKind::Number(n), pos: i });
            i += len;
            continue;
        }

        if b == b'"' || b == b'\'' {
            let (s, len) = lex_string(&source[i..], i)?;
            tokens.push(Token { kind: TokenKind::Str(s), pos: i });
            i += len;
            continue;
        }

        if b.is_ascii_alphabetic() || b == b'_' || b == b'$' {
            let start = i;
            while i < bytes.len()
                && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'$')
            {
                i += 1;
            }
            tokens.push(Token {
                kind: TokenKind::Ident(source[start..i].to_string()),
                pos: start,
            });
            continue;
        }

        match PUNCTUATION.iter().find(|p| source[i..].starts_with(**p)) {
            Some(p) => {
                tokens.push(Token { kind: TokenKind::Punct(p), pos: i });
                i += p.len();
            }
            None => {
                let ch = source[i..].chars().next().unwrap_or('?');
                return Err(ScriptError::parse(i, format!("unexpected character '{}'", ch)));
            }
        }
    }

    tokens.push(Token { kind: TokenKind::Eof, pos: source.len() });
    Ok(tokens)
}


/// Decimal literal with optional fraction and exponent. Returns value and length.
fn lex_number(input: &str) -> Option<(f64, usize)> {
    let bytes = input.as_bytes();
    let mut end = 0;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp = end + 1;
        if exp < bytes.len() && (bytes[exp] == b'+' || bytes[exp] == b'-') {
            exp += 1;
        }
        let digits_start = exp;
        while exp < bytes.len() && bytes[exp].is_ascii_digit() {
            exp += 1;
        }
        if exp > digits_start {
            end = exp;
        }
    }
    input[..end].parse::<f64>().ok().map(|n| (n, end))
}


/// Quoted string starting at `input[0]`. Returns decoded text and length.
fn lex_string(input: &str, offset: usize) -> Result<(String, usize), ScriptError> {
    let mut chars = input.char_indices();
    let quote = match chars.next() {
        Some((_, q)) => q,
        None => return Err(ScriptError::parse(offset, "expected string")),
    };
    let mut out = String::new();

    while let Some((idx, ch)) = chars.next() {
        match ch {
            c if c == quote => return Ok((out, idx + c.len_utf8())),
            '\\' => {
                let (_, esc) = chars
                    .next()
                    .ok_or_else(|| ScriptError::parse(offset + idx, "unterminated escape"))?;
                match esc {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    '0' => out.push('\0'),
                    'u' => {
                        let hex: String = chars.by_ref().take(4).map(|(_, c)| c).collect();
                        let code = u32::from_str_radix(&hex, 16)
                            .ok()
                            .and_then(char::from_u32)
                            .ok_or_else(|| ScriptError::parse(offset + idx, "bad \\u escape"))?;
                        out.push(code);
                    }
                    other => out.push(other),
                }
            }
            other => out.push(other),
        }
    }

    Err(ScriptError::parse(offset, "unterminated string"))
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
