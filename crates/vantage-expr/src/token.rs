//! Lexer for the expression language.

use crate::error::ExprError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Str(String),
    Number(f64),
    True,
    False,
    Null,
    AndAnd,
    OrOr,
    Bang,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    /// `=~`, regex match.
    Tilde,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
}

impl Token {
    pub fn describe(&self) -> String {
        match self {
            Token::Ident(name) => format!("identifier `{name}`"),
            Token::Str(_) => "string literal".to_string(),
            Token::Number(n) => format!("number `{n}`"),
            other => format!("`{}`", other.lexeme()),
        }
    }

    fn lexeme(&self) -> &'static str {
        match self {
            Token::True => "true",
            Token::False => "false",
            Token::Null => "null",
            Token::AndAnd => "&&",
            Token::OrOr => "||",
            Token::Bang => "!",
            Token::EqEq => "==",
            Token::NotEq => "!=",
            Token::Lt => "<",
            Token::LtEq => "<=",
            Token::Gt => ">",
            Token::GtEq => ">=",
            Token::Tilde => "=~",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::Dot => ".",
            Token::Comma => ",",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBracket => "[",
            Token::RBracket => "]",
            _ => "?",
        }
    }
}

/// A token plus the byte offset it started at, for error reporting.
pub type Spanned = (Token, usize);

/// Tokenize an expression source string.
pub fn tokenize(source: &str) -> Result<Vec<Spanned>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(offset, ch)) = chars.peek() {
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }
            '\'' | '"' => {
                chars.next();
                tokens.push((Token::Str(lex_string(source, &mut chars, ch, offset)?), offset));
            }
            c if c.is_ascii_digit() => {
                tokens.push((lex_number(&mut chars, offset)?, offset));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut word = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' {
                        word.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let token = match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(word),
                };
                tokens.push((token, offset));
            }
            '&' => {
                chars.next();
                match chars.peek() {
                    Some(&(_, '&')) => {
                        chars.next();
                        tokens.push((Token::AndAnd, offset));
                    }
                    _ => return Err(ExprError::parse(offset, "expected `&&`")),
                }
            }
            '|' => {
                chars.next();
                match chars.peek() {
                    Some(&(_, '|')) => {
                        chars.next();
                        tokens.push((Token::OrOr, offset));
                    }
                    _ => return Err(ExprError::parse(offset, "expected `||`")),
                }
            }
            '=' => {
                chars.next();
                match chars.peek() {
                    Some(&(_, '=')) => {
                        chars.next();
                        tokens.push((Token::EqEq, offset));
                    }
                    Some(&(_, '~')) => {
                        chars.next();
                        tokens.push((Token::Tilde, offset));
                    }
                    _ => return Err(ExprError::parse(offset, "expected `==` or `=~`")),
                }
            }
            '!' => {
                chars.next();
                if let Some(&(_, '=')) = chars.peek() {
                    chars.next();
                    tokens.push((Token::NotEq, offset));
                } else {
                    tokens.push((Token::Bang, offset));
                }
            }
            '<' => {
                chars.next();
                if let Some(&(_, '=')) = chars.peek() {
                    chars.next();
                    tokens.push((Token::LtEq, offset));
                } else {
                    tokens.push((Token::Lt, offset));
                }
            }
            '>' => {
                chars.next();
                if let Some(&(_, '=')) = chars.peek() {
                    chars.next();
                    tokens.push((Token::GtEq, offset));
                } else {
                    tokens.push((Token::Gt, offset));
                }
            }
            '+' => {
                chars.next();
                tokens.push((Token::Plus, offset));
            }
            '-' => {
                chars.next();
                tokens.push((Token::Minus, offset));
            }
            '*' => {
                chars.next();
                tokens.push((Token::Star, offset));
            }
            '/' => {
                chars.next();
                tokens.push((Token::Slash, offset));
            }
            '%' => {
                chars.next();
                tokens.push((Token::Percent, offset));
            }
            '.' => {
                chars.next();
                tokens.push((Token::Dot, offset));
            }
            ',' => {
                chars.next();
                tokens.push((Token::Comma, offset));
            }
            '(' => {
                chars.next();
                tokens.push((Token::LParen, offset));
            }
            ')' => {
                chars.next();
                tokens.push((Token::RParen, offset));
            }
            '[' => {
                chars.next();
                tokens.push((Token::LBracket, offset));
            }
            ']' => {
                chars.next();
                tokens.push((Token::RBracket, offset));
            }
            other => {
                return Err(ExprError::parse(
                    offset,
                    format!("unexpected character `{other}`"),
                ))
            }
        }
    }

    Ok(tokens)
}

fn lex_string(
    source: &str,
    chars: &mut std::iter::Peekable<std::str::CharIndices>,
    quote: char,
    start: usize,
) -> Result<String, ExprError> {
    let mut value = String::new();
    loop {
        match chars.next() {
            Some((_, c)) if c == quote => return Ok(value),
            Some((escape_at, '\\')) => match chars.next() {
                Some((_, 'n')) => value.push('\n'),
                Some((_, 't')) => value.push('\t'),
                Some((_, 'r')) => value.push('\r'),
                Some((_, '\\')) => value.push('\\'),
                Some((_, c)) if c == quote => value.push(c),
                Some((_, c)) => {
                    return Err(ExprError::parse(
                        escape_at,
                        format!("unknown escape `\\{c}`"),
                    ))
                }
                None => return Err(ExprError::parse(source.len(), "unterminated string")),
            },
            Some((_, c)) => value.push(c),
            None => return Err(ExprError::parse(start, "unterminated string")),
        }
    }
}

fn lex_number(
    chars: &mut std::iter::Peekable<std::str::CharIndices>,
    offset: usize,
) -> Result<Token, ExprError> {
    let mut text = String::new();
    let mut seen_dot = false;
    while let Some(&(_, c)) = chars.peek() {
        if c.is_ascii_digit() {
            text.push(c);
            chars.next();
        } else if c == '.' && !seen_dot {
            // Lookahead: `1.foo` is member access on a number, not a fraction.
            let mut ahead = chars.clone();
            ahead.next();
            match ahead.peek() {
                Some(&(_, d)) if d.is_ascii_digit() => {
                    seen_dot = true;
                    text.push(c);
                    chars.next();
                }
                _ => break,
            }
        } else {
            break;
        }
    }
    text.parse::<f64>()
        .map(Token::Number)
        .map_err(|_| ExprError::parse(offset, format!("invalid number `{text}`")))
}
