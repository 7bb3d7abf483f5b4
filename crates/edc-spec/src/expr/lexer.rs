use crate::expr::ExpressionError;
use crate::ident::is_valid_id;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Number(f64),
    Text(String),
    Word(String),
    Field(String),
    LParen,
    RParen,
    Comma,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    EqEq,
    NotEq,
    Gt,
    Ge,
    Lt,
    Le,
    AndAnd,
    OrOr,
    Bang,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub position: usize,
}

fn syntax(position: usize, message: impl Into<String>) -> ExpressionError {
    ExpressionError::Syntax {
        position,
        message: message.into(),
    }
}

pub(crate) fn tokenize(source: &str) -> Result<Vec<Spanned>, ExpressionError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut index = 0;

    while index < chars.len() {
        let (position, ch) = chars[index];
        if ch.is_whitespace() {
            index += 1;
            continue;
        }

        let peek = chars.get(index + 1).map(|(_, next)| *next);
        let (token, width) = match ch {
            '(' => (Token::LParen, 1),
            ')' => (Token::RParen, 1),
            ',' => (Token::Comma, 1),
            '+' => (Token::Plus, 1),
            '-' => (Token::Minus, 1),
            '*' => (Token::Star, 1),
            '/' => (Token::Slash, 1),
            '%' => (Token::Percent, 1),
            '^' => (Token::Caret, 1),
            '=' if peek == Some('=') => (Token::EqEq, 2),
            '!' if peek == Some('=') => (Token::NotEq, 2),
            '!' => (Token::Bang, 1),
            '>' if peek == Some('=') => (Token::Ge, 2),
            '>' => (Token::Gt, 1),
            '<' if peek == Some('=') => (Token::Le, 2),
            '<' => (Token::Lt, 1),
            '&' if peek == Some('&') => (Token::AndAnd, 2),
            '|' if peek == Some('|') => (Token::OrOr, 2),
            '{' => {
                let start = index + 1;
                let mut end = start;
                while end < chars.len() && chars[end].1 != '}' {
                    end += 1;
                }
                if end == chars.len() {
                    return Err(syntax(position, "unterminated field reference"));
                }
                let name: String = chars[start..end].iter().map(|(_, c)| *c).collect();
                let name = name.trim().to_string();
                if !is_valid_id(&name) {
                    return Err(syntax(position, format!("invalid field reference '{name}'")));
                }
                (Token::Field(name), end - index + 1)
            }
            '\'' | '"' => {
                let quote = ch;
                let mut text = String::new();
                let mut end = index + 1;
                let mut closed = false;
                while end < chars.len() {
                    let current = chars[end].1;
                    if current == '\\' {
                        match chars.get(end + 1) {
                            Some((_, escaped)) => {
                                text.push(*escaped);
                                end += 2;
                                continue;
                            }
                            None => break,
                        }
                    }
                    if current == quote {
                        closed = true;
                        break;
                    }
                    text.push(current);
                    end += 1;
                }
                if !closed {
                    return Err(syntax(position, "unterminated string literal"));
                }
                (Token::Text(text), end - index + 1)
            }
            c if c.is_ascii_digit() || (c == '.' && peek.is_some_and(|n| n.is_ascii_digit())) => {
                let mut end = index;
                let mut seen_dot = false;
                while end < chars.len() {
                    let current = chars[end].1;
                    if current.is_ascii_digit() {
                        end += 1;
                    } else if current == '.' && !seen_dot {
                        seen_dot = true;
                        end += 1;
                    } else {
                        break;
                    }
                }
                let literal: String = chars[index..end].iter().map(|(_, c)| *c).collect();
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| syntax(position, format!("invalid number '{literal}'")))?;
                (Token::Number(value), end - index)
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut end = index;
                while end < chars.len()
                    && (chars[end].1.is_ascii_alphanumeric() || chars[end].1 == '_')
                {
                    end += 1;
                }
                let word: String = chars[index..end].iter().map(|(_, c)| *c).collect();
                (Token::Word(word), end - index)
            }
            other => return Err(syntax(position, format!("unexpected character '{other}'"))),
        };

        tokens.push(Spanned { token, position });
        index += width;
    }

    Ok(tokens)
}
