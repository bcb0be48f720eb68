// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! The sandboxed expression language used by match-predicates and format
//! templates. Arithmetic, comparison, boolean logic, membership, list
//! literals, indexing, and a fixed set of helper functions; nothing else.

pub mod ast;
pub mod env;
pub mod interp;
pub mod lexer;
pub mod parser;
pub mod value;

pub use env::Env;
pub use value::{ExprError, Value};

use std::fmt;

/// An expression kept alongside its verbatim source text. Parsing happens
/// once, at macro-parse time; evaluation happens per MIDI event.
#[derive(Clone, Debug, PartialEq)]
pub struct Expression {
    source: String,
    ast: ast::Expr,
}
impl Expression {
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        let ast = parser::parse(source)?;
        Ok(Self {
            source: source.to_string(),
            ast,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn eval(&self, env: &Env) -> Result<Value, ExprError> {
        interp::eval(&self.ast, env)
    }

    pub fn eval_truthy(&self, env: &Env) -> Result<bool, ExprError> {
        Ok(self.eval(env)?.truthy())
    }
}
impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_once_eval_many() {
        let expr = Expression::parse("v > 80").unwrap();
        let mut yes = Env::new();
        yes.bind(&["v"], Value::Int(90));
        let mut no = Env::new();
        no.bind(&["v"], Value::Int(70));
        assert!(expr.eval_truthy(&yes).unwrap());
        assert!(!expr.eval_truthy(&no).unwrap());
    }

    #[test]
    fn parse_error_surfaces() {
        assert!(Expression::parse("v >").is_err());
        assert!(Expression::parse("").is_err());
    }
}
