//! Tokenizer for lambda source strings.

use super::ExprError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    Op(&'static str),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub position: usize,
}

/// Longest operators first so `**` wins over `*`.
const OPERATORS: &[&str] = &[
    "**", "//", "==", "!=", "<=", ">=", "(", ")", "[", "]", ",", ":", ".", "=", "<", ">", "+",
    "-", "*", "/", "%",
];

pub(crate) fn tokenize(source: &str) -> Result<Vec<Spanned>, ExprError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];

        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        if c.is_ascii_alphabetic() || c == b'_' {
            let start = pos;
            while pos < bytes.len() && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_') {
                pos += 1;
            }
            tokens.push(Spanned {
                token: Token::Name(source[start..pos].to_string()),
                position: start,
            });
            continue;
        }

        if c.is_ascii_digit() || (c == b'.' && bytes.get(pos + 1).is_some_and(u8::is_ascii_digit)) {
            let (token, end) = lex_number(source, pos)?;
            tokens.push(Spanned { token, position: pos });
            pos = end;
            continue;
        }

        if c == b'\'' || c == b'"' {
            let (value, end) = lex_string(source, pos)?;
            tokens.push(Spanned {
                token: Token::Str(value),
                position: pos,
            });
            pos = end;
            continue;
        }

        match OPERATORS.iter().copied().find(|op| source[pos..].starts_with(*op)) {
            Some(op) => {
                tokens.push(Spanned {
                    token: Token::Op(op),
                    position: pos,
                });
                pos += op.len();
            }
            None => {
                let ch = source[pos..].chars().next().unwrap_or('?');
                return Err(ExprError::Syntax {
                    position: pos,
                    message: format!("unexpected character '{}'", ch),
                });
            }
        }
    }

    tokens.push(Spanned {
        token: Token::Eof,
        position: source.len(),
    });
    Ok(tokens)
}

fn lex_number(source: &str, start: usize) -> Result<(Token, usize), ExprError> {
    let bytes = source.as_bytes();
    let mut pos = start;
    let mut is_float = false;

    let digits = |pos: &mut usize| {
        while *pos < bytes.len() && (bytes[*pos].is_ascii_digit() || bytes[*pos] == b'_') {
            *pos += 1;
        }
    };

    digits(&mut pos);
    if pos < bytes.len() && bytes[pos] == b'.' {
        is_float = true;
        pos += 1;
        digits(&mut pos);
    }
    if pos < bytes.len() && (bytes[pos] == b'e' || bytes[pos] == b'E') {
        let mut look = pos + 1;
        if look < bytes.len() && (bytes[look] == b'+' || bytes[look] == b'-') {
            look += 1;
        }
        if look < bytes.len() && bytes[look].is_ascii_digit() {
            is_float = true;
            pos = look;
            digits(&mut pos);
        }
    }

    let text: String = source[start..pos].chars().filter(|c| *c != '_').collect();
    let invalid = || ExprError::Syntax {
        position: start,
        message: format!("invalid number literal '{}'", &source[start..pos]),
    };

    let token = if is_float {
        Token::Float(text.parse().map_err(|_| invalid())?)
    } else {
        Token::Int(text.parse().map_err(|_| invalid())?)
    };
    Ok((token, pos))
}

fn lex_string(source: &str, start: usize) -> Result<(String, usize), ExprError> {
    let mut chars = source[start..].char_indices();
    let quote = match chars.next() {
        Some((_, q)) => q,
        None => {
            return Err(ExprError::Syntax {
                position: start,
                message: "expected string literal".to_string(),
            })
        }
    };

    let mut value = String::new();
    while let Some((offset, c)) = chars.next() {
        match c {
            '\\' => {
                let escaped = match chars.next() {
                    Some((_, 'n')) => '\n',
                    Some((_, 't')) => '\t',
                    Some((_, 'r')) => '\r',
                    Some((_, '0')) => '\0',
                    Some((_, other)) => {
                        if other != '\\' && other != '\'' && other != '"' {
                            value.push('\\');
                        }
                        other
                    }
                    None => break,
                };
                value.push(escaped);
            }
            c if c == quote => return Ok((value, start + offset + c.len_utf8())),
            c => value.push(c),
        }
    }

    Err(ExprError::Syntax {
        position: start,
        message: "unterminated string literal".to_string(),
    })
}
