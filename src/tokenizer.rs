// Tokenizer for the compliance DSL. Source text becomes a flat token
// stream; every token carries its kind, canonical text and character
// offset so the parser can report positions.

use crate::error::{GlassBoxError, Result};

/// Reserved keywords, stored upper-case. Matching is case-insensitive.
pub const KEYWORDS: &[&str] = &[
    "WHEN", "IF", "THEN", "MUST", "SHOULD", "DO", "AND", "OR", "NOT", "IN", "CONTAINS", "MATCHES",
    "BEFORE", "AFTER", "WITHIN", "EXPIRES", "BETWEEN", "REQUIRE", "ENSURE", "VALIDATE", "FLAG",
    "ALERT", "BLOCK", "ALLOW", "LOG", "NOTIFY", "TRUE", "FALSE",
];

/// Time units, singular and plural.
pub const TIME_UNITS: &[&str] = &[
    "SECOND", "SECONDS", "MINUTE", "MINUTES", "HOUR", "HOURS", "DAY", "DAYS", "WEEK", "WEEKS",
    "MONTH", "MONTHS", "YEAR", "YEARS",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Number,
    Str,
    Identifier,
    Keyword,
    TimeUnit,
    Operator,
    Symbol,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Canonical lexeme: upper-cased for keywords, time units and the
    /// `LIKE` operator; raw inner text for strings (quotes stripped,
    /// escapes untouched).
    pub text: String,
    /// Character offset of the first character of the lexeme.
    pub pos: usize,
}

impl Token {
    fn new(kind: TokenKind, text: impl Into<String>, pos: usize) -> Self {
        Token {
            kind,
            text: text.into(),
            pos,
        }
    }

    pub fn is_keyword(&self, word: &str) -> bool {
        self.kind == TokenKind::Keyword && self.text == word
    }

    pub fn is_symbol(&self, sym: char) -> bool {
        self.kind == TokenKind::Symbol && self.text.len() == 1 && self.text.starts_with(sym)
    }
}

/// Tokenize DSL source text.
pub fn tokenize(text: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let ch = chars[pos];

        if ch.is_whitespace() {
            pos += 1;
            continue;
        }

        if ch.is_ascii_digit() {
            let (token, next) = scan_number(&chars, pos);
            tokens.push(token);
            pos = next;
            continue;
        }

        if ch == '"' || ch == '\'' {
            let (token, next) = scan_string(&chars, pos, text)?;
            tokens.push(token);
            pos = next;
            continue;
        }

        if ch.is_alphabetic() || ch == '_' {
            let (token, next) = scan_word(&chars, pos);
            tokens.push(token);
            pos = next;
            continue;
        }

        if matches!(ch, '=' | '!' | '>' | '<') {
            let (token, next) = scan_operator(&chars, pos, text)?;
            tokens.push(token);
            pos = next;
            continue;
        }

        if matches!(ch, '(' | ')' | '[' | ']' | ',' | '.' | '@') {
            tokens.push(Token::new(TokenKind::Symbol, ch.to_string(), pos));
            pos += 1;
            continue;
        }

        let (line, column) = line_column(text, pos);
        return Err(GlassBoxError::dsl_at(
            format!("Unknown character: {ch}"),
            line,
            column,
        ));
    }

    Ok(tokens)
}

fn scan_number(chars: &[char], start: usize) -> (Token, usize) {
    let mut pos = start;

    while pos < chars.len() && chars[pos].is_ascii_digit() {
        pos += 1;
    }

    if pos < chars.len() && chars[pos] == '.' {
        pos += 1;
        while pos < chars.len() && chars[pos].is_ascii_digit() {
            pos += 1;
        }
    }

    if pos < chars.len() && chars[pos].eq_ignore_ascii_case(&'e') {
        pos += 1;
        if pos < chars.len() && matches!(chars[pos], '+' | '-') {
            pos += 1;
        }
        while pos < chars.len() && chars[pos].is_ascii_digit() {
            pos += 1;
        }
    }

    let lexeme: String = chars[start..pos].iter().collect();
    (Token::new(TokenKind::Number, lexeme, start), pos)
}

fn scan_string(chars: &[char], start: usize, source: &str) -> Result<(Token, usize)> {
    let quote = chars[start];
    let mut pos = start + 1;

    while pos < chars.len() && chars[pos] != quote {
        if chars[pos] == '\\' {
            pos += 2;
        } else {
            pos += 1;
        }
    }

    if pos >= chars.len() {
        let (line, column) = line_column(source, start);
        return Err(GlassBoxError::dsl_at("Unterminated string", line, column));
    }

    let inner: String = chars[start + 1..pos].iter().collect();
    Ok((Token::new(TokenKind::Str, inner, start), pos + 1))
}

fn scan_word(chars: &[char], start: usize) -> (Token, usize) {
    let mut pos = start;

    while pos < chars.len() && (chars[pos].is_alphanumeric() || chars[pos] == '_') {
        pos += 1;
    }

    let lexeme: String = chars[start..pos].iter().collect();
    let upper = lexeme.to_uppercase();

    let token = if KEYWORDS.contains(&upper.as_str()) {
        Token::new(TokenKind::Keyword, upper, start)
    } else if TIME_UNITS.contains(&upper.as_str()) {
        Token::new(TokenKind::TimeUnit, upper, start)
    } else if upper == "LIKE" {
        Token::new(TokenKind::Operator, upper, start)
    } else {
        Token::new(TokenKind::Identifier, lexeme, start)
    };

    (token, pos)
}

fn scan_operator(chars: &[char], start: usize, source: &str) -> Result<(Token, usize)> {
    // Two-character operators bind before one-character forms.
    if start + 1 < chars.len() {
        let two: String = chars[start..start + 2].iter().collect();
        if matches!(two.as_str(), "!=" | ">=" | "<=") {
            return Ok((Token::new(TokenKind::Operator, two, start), start + 2));
        }
    }

    let one = chars[start];
    if matches!(one, '=' | '>' | '<') {
        return Ok((Token::new(TokenKind::Operator, one.to_string(), start), start + 1));
    }

    let (line, column) = line_column(source, start);
    Err(GlassBoxError::dsl_at(
        format!("Unknown operator: {one}"),
        line,
        column,
    ))
}

/// 1-based line and column for a character offset.
fn line_column(text: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut column = 1;
    for (i, ch) in text.chars().enumerate() {
        if i == offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    (line, column)
}
