// Copyright (c) 2023 Mike Tsao. All rights reserved.

use super::value::ExprError;

#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    True,
    False,
    None,
    And,
    Or,
    Not,
    In,
    Plus,
    Minus,
    Star,
    Slash,
    SlashSlash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
}
impl Token {
    pub fn describe(&self) -> String {
        match self {
            Token::Int(i) => i.to_string(),
            Token::Float(f) => f.to_string(),
            Token::Str(s) => format!("'{s}'"),
            Token::Ident(s) => s.clone(),
            other => format!("{other:?}"),
        }
    }
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, ExprError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '/' => {
                if chars.get(i + 1) == Some(&'/') {
                    tokens.push(Token::SlashSlash);
                    i += 2;
                } else {
                    tokens.push(Token::Slash);
                    i += 1;
                }
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::EqEq);
                    i += 2;
                } else {
                    return Err(ExprError::UnexpectedChar('=', i));
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::NotEq);
                    i += 2;
                } else {
                    return Err(ExprError::UnexpectedChar('!', i));
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '"' | '\'' => {
                let (s, next) = lex_string(&chars, i)?;
                tokens.push(Token::Str(s));
                i = next;
            }
            c if c.is_ascii_digit() || (c == '.' && matches!(chars.get(i + 1), Some(d) if d.is_ascii_digit())) =>
            {
                let (token, next) = lex_number(&chars, i)?;
                tokens.push(token);
                i = next;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "in" => Token::In,
                    "True" => Token::True,
                    "False" => Token::False,
                    "None" => Token::None,
                    _ => Token::Ident(word),
                });
            }
            other => return Err(ExprError::UnexpectedChar(other, i)),
        }
    }
    Ok(tokens)
}

fn lex_string(chars: &[char], start: usize) -> Result<(String, usize), ExprError> {
    let quote = chars[start];
    let mut out = String::new();
    let mut i = start + 1;
    loop {
        let Some(&c) = chars.get(i) else {
            return Err(ExprError::UnterminatedString);
        };
        if c == quote {
            return Ok((out, i + 1));
        }
        if c == '\\' {
            let Some(&escaped) = chars.get(i + 1) else {
                return Err(ExprError::UnterminatedString);
            };
            out.push(match escaped {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                '0' => '\0',
                other => other,
            });
            i += 2;
        } else {
            out.push(c);
            i += 1;
        }
    }
}

fn lex_number(chars: &[char], start: usize) -> Result<(Token, usize), ExprError> {
    let mut i = start;
    let mut saw_dot = false;
    while i < chars.len() && (chars[i].is_ascii_digit() || (chars[i] == '.' && !saw_dot)) {
        if chars[i] == '.' {
            saw_dot = true;
        }
        i += 1;
    }
    let text: String = chars[start..i].iter().collect();
    let token = if saw_dot {
        Token::Float(
            text.parse()
                .map_err(|_| ExprError::BadNumber(text.clone()))?,
        )
    } else {
        Token::Int(
            text.parse()
                .map_err(|_| ExprError::BadNumber(text.clone()))?,
        )
    };
    Ok((token, i))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operators_and_words() {
        let tokens = tokenize("v >= 80 and c != 9").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Ident("v".into()),
                Token::Ge,
                Token::Int(80),
                Token::And,
                Token::Ident("c".into()),
                Token::NotEq,
                Token::Int(9),
            ]
        );
    }

    #[test]
    fn numbers() {
        assert_eq!(
            tokenize("1 2.5 .5").unwrap(),
            vec![Token::Int(1), Token::Float(2.5), Token::Float(0.5)]
        );
    }

    #[test]
    fn strings_with_escapes() {
        assert_eq!(
            tokenize(r#" "a\nb" 'c' "#).unwrap(),
            vec![Token::Str("a\nb".into()), Token::Str("c".into())]
        );
    }

    #[test]
    fn floor_div_vs_div() {
        assert_eq!(
            tokenize("7 // 2 / 2").unwrap(),
            vec![
                Token::Int(7),
                Token::SlashSlash,
                Token::Int(2),
                Token::Slash,
                Token::Int(2),
            ]
        );
    }

    #[test]
    fn lone_equals_is_an_error() {
        assert!(tokenize("v = 3").is_err());
    }
}
