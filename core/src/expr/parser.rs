// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! A hand-written Pratt parser over the token stream. Precedence, loosest
//! first: `or`, `and`, `not`, comparisons (including `in`/`not in`),
//! additive, multiplicative, unary minus, then calls and indexing.

use super::ast::{BinaryOp, Expr, UnaryOp};
use super::lexer::{tokenize, Token};
use super::value::{ExprError, Value};

pub fn parse(source: &str) -> Result<Expr, ExprError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expression(0)?;
    if let Some(extra) = parser.peek() {
        return Err(ExprError::UnexpectedToken {
            expected: "end of expression".to_string(),
            got: extra.describe(),
        });
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

const PREC_OR: u8 = 1;
const PREC_AND: u8 = 2;
const PREC_NOT: u8 = 3;
const PREC_COMPARISON: u8 = 4;
const PREC_ADDITIVE: u8 = 5;
const PREC_MULTIPLICATIVE: u8 = 6;

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Result<Token, ExprError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(ExprError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(token)
    }

    fn expect(&mut self, wanted: &Token, description: &str) -> Result<(), ExprError> {
        let token = self.advance()?;
        if &token != wanted {
            return Err(ExprError::UnexpectedToken {
                expected: description.to_string(),
                got: token.describe(),
            });
        }
        Ok(())
    }

    fn expression(&mut self, min_precedence: u8) -> Result<Expr, ExprError> {
        let mut lhs = self.prefix(min_precedence)?;
        loop {
            let Some((op, precedence)) = self.peek_binary_op() else {
                return Ok(lhs);
            };
            if precedence < min_precedence {
                return Ok(lhs);
            }
            self.consume_binary_op();
            let rhs = self.expression(precedence + 1)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn peek_binary_op(&self) -> Option<(BinaryOp, u8)> {
        let op = match self.peek()? {
            Token::Or => (BinaryOp::Or, PREC_OR),
            Token::And => (BinaryOp::And, PREC_AND),
            Token::EqEq => (BinaryOp::Eq, PREC_COMPARISON),
            Token::NotEq => (BinaryOp::NotEq, PREC_COMPARISON),
            Token::Lt => (BinaryOp::Lt, PREC_COMPARISON),
            Token::Le => (BinaryOp::Le, PREC_COMPARISON),
            Token::Gt => (BinaryOp::Gt, PREC_COMPARISON),
            Token::Ge => (BinaryOp::Ge, PREC_COMPARISON),
            Token::In => (BinaryOp::In, PREC_COMPARISON),
            Token::Not if self.tokens.get(self.pos + 1) == Some(&Token::In) => {
                (BinaryOp::NotIn, PREC_COMPARISON)
            }
            Token::Plus => (BinaryOp::Add, PREC_ADDITIVE),
            Token::Minus => (BinaryOp::Sub, PREC_ADDITIVE),
            Token::Star => (BinaryOp::Mul, PREC_MULTIPLICATIVE),
            Token::Slash => (BinaryOp::Div, PREC_MULTIPLICATIVE),
            Token::SlashSlash => (BinaryOp::FloorDiv, PREC_MULTIPLICATIVE),
            Token::Percent => (BinaryOp::Mod, PREC_MULTIPLICATIVE),
            _ => return None,
        };
        Some(op)
    }

    fn consume_binary_op(&mut self) {
        if self.peek() == Some(&Token::Not) {
            // "not in" spans two tokens
            self.pos += 2;
        } else {
            self.pos += 1;
        }
    }

    fn prefix(&mut self, min_precedence: u8) -> Result<Expr, ExprError> {
        match self.peek() {
            Some(Token::Not) if min_precedence <= PREC_NOT => {
                self.pos += 1;
                let operand = self.expression(PREC_NOT)?;
                Ok(Expr::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                })
            }
            Some(Token::Minus) => {
                self.pos += 1;
                let operand = self.expression(PREC_MULTIPLICATIVE + 1)?;
                Ok(Expr::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(operand),
                })
            }
            _ => self.postfix(),
        }
    }

    fn postfix(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Some(Token::LParen) => {
                    let function = match expr {
                        Expr::Name(name) => name,
                        other => return Err(ExprError::NotCallable(format!("{other:?}"))),
                    };
                    self.pos += 1;
                    let args = self.comma_separated(Token::RParen, ")")?;
                    expr = Expr::Call { function, args };
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let index = self.expression(0)?;
                    self.expect(&Token::RBracket, "]")?;
                    expr = Expr::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn comma_separated(&mut self, closer: Token, description: &str) -> Result<Vec<Expr>, ExprError> {
        let mut items = Vec::new();
        if self.peek() == Some(&closer) {
            self.pos += 1;
            return Ok(items);
        }
        loop {
            items.push(self.expression(0)?);
            match self.advance()? {
                Token::Comma => continue,
                ref token if *token == closer => return Ok(items),
                token => {
                    return Err(ExprError::UnexpectedToken {
                        expected: format!(", or {description}"),
                        got: token.describe(),
                    })
                }
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        match self.advance()? {
            Token::Int(i) => Ok(Expr::Literal(Value::Int(i))),
            Token::Float(f) => Ok(Expr::Literal(Value::Float(f))),
            Token::Str(s) => Ok(Expr::Literal(Value::Str(s))),
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::None => Ok(Expr::Literal(Value::None)),
            Token::Ident(name) => Ok(Expr::Name(name)),
            Token::LParen => {
                let inner = self.expression(0)?;
                self.expect(&Token::RParen, ")")?;
                Ok(inner)
            }
            Token::LBracket => {
                let items = self.comma_separated(Token::RBracket, "]")?;
                Ok(Expr::List(items))
            }
            token => Err(ExprError::UnexpectedToken {
                expected: "an expression".to_string(),
                got: token.describe(),
            }),
        }
    }
}
