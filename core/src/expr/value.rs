// Copyright (c) 2023 Mike Tsao. All rights reserved.

use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// Evaluation failures. Predicate callers treat any of these as a
/// non-match; format callers surface them as invocation errors.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ExprError {
    #[error("unexpected character '{0}' at offset {1}")]
    UnexpectedChar(char, usize),
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("bad number literal: {0}")]
    BadNumber(String),
    #[error("expected {expected}, got {got}")]
    UnexpectedToken { expected: String, got: String },
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unknown name: {0}")]
    UnknownName(String),
    #[error("unknown function: {0}")]
    UnknownFunction(String),
    #[error("{0} is not callable")]
    NotCallable(String),
    #[error("type error: {0}")]
    TypeError(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("index {0} out of range")]
    IndexOutOfRange(i64),
}

/// The value model of the predicate language: a small Python-flavored set,
/// because that is what existing macro files are written against.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    List(Vec<Value>),
    None,
}
impl Value {
    pub fn truthy(&self) -> bool {
        match self {
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Bool(b) => *b,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.is_empty(),
            Value::None => false,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::None => "None",
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(*b as i64 as f64),
            _ => None,
        }
    }

    /// Numeric cross-type equality, then structural equality.
    pub fn loosely_equals(&self, other: &Value) -> bool {
        match (self.as_number(), other.as_number()) {
            (Some(a), Some(b)) => a == b,
            _ => match (self, other) {
                (Value::Str(a), Value::Str(b)) => a == b,
                (Value::List(a), Value::List(b)) => {
                    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loosely_equals(y))
                }
                (Value::None, Value::None) => true,
                _ => false,
            },
        }
    }

    pub fn compare(&self, other: &Value) -> Result<Ordering, ExprError> {
        match (self.as_number(), other.as_number()) {
            (Some(a), Some(b)) => a.partial_cmp(&b).ok_or_else(|| {
                ExprError::TypeError("cannot order NaN".to_string())
            }),
            _ => match (self, other) {
                (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
                _ => Err(ExprError::TypeError(format!(
                    "cannot order {} and {}",
                    self.type_name(),
                    other.type_name()
                ))),
            },
        }
    }
}
impl fmt::Display for Value {
    /// Renders the way a shell argument should look: no quotes around
    /// strings, Python spellings for the rest.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Value::Str(s) => write!(f, "{s}"),
            Value::List(l) => {
                write!(f, "[")?;
                for (i, v) in l.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Value::None => write!(f, "None"),
        }
    }
}
impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}
impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::Int(v as i64)
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}
impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}
