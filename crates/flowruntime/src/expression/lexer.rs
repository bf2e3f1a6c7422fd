use super::ExpressionError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    Dot,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Plus,
    Minus,
    Star,
    Slash,
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, ExpressionError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];
        match c {
            c if c.is_whitespace() => pos += 1,
            '.' => {
                tokens.push(Token::Dot);
                pos += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                pos += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                pos += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                pos += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                pos += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                pos += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                pos += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                pos += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                pos += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                pos += 1;
            }
            '\'' | '"' => {
                let (text, next) = lex_string(&chars, pos)?;
                tokens.push(Token::Str(text));
                pos = next;
            }
            c if c.is_ascii_digit() => {
                // After a dot only an integer segment makes sense: `items.0.name`.
                let integer_only = matches!(tokens.last(), Some(Token::Dot));
                let (number, next) = lex_number(&chars, pos, integer_only)?;
                tokens.push(Token::Number(number));
                pos = next;
            }
            c if is_ident_start(c) => {
                let start = pos;
                while pos < chars.len() && is_ident_continue(chars[pos]) {
                    pos += 1;
                }
                tokens.push(Token::Ident(chars[start..pos].iter().collect()));
            }
            other => return Err(ExpressionError::UnexpectedChar(other, pos)),
        }
    }

    Ok(tokens)
}

fn lex_string(chars: &[char], start: usize) -> Result<(String, usize), ExpressionError> {
    let quote = chars[start];
    let mut text = String::new();
    let mut pos = start + 1;

    while pos < chars.len() {
        match chars[pos] {
            '\\' if pos + 1 < chars.len() => {
                let escaped = match chars[pos + 1] {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => other,
                };
                text.push(escaped);
                pos += 2;
            }
            c if c == quote => return Ok((text, pos + 1)),
            c => {
                text.push(c);
                pos += 1;
            }
        }
    }

    Err(ExpressionError::UnterminatedString)
}

fn lex_number(chars: &[char], start: usize, integer_only: bool) -> Result<(f64, usize), ExpressionError> {
    let mut pos = start;
    while pos < chars.len() && chars[pos].is_ascii_digit() {
        pos += 1;
    }
    if !integer_only
        && pos + 1 < chars.len()
        && chars[pos] == '.'
        && chars[pos + 1].is_ascii_digit()
    {
        pos += 1;
        while pos < chars.len() && chars[pos].is_ascii_digit() {
            pos += 1;
        }
    }

    let literal: String = chars[start..pos].iter().collect();
    literal
        .parse::<f64>()
        .map(|n| (n, pos))
        .map_err(|_| ExpressionError::InvalidNumber(literal))
}
