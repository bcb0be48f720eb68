// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! Tree-walking evaluator. Deliberately not the host language's eval: the
//! only reachable names and functions are the ones the caller binds plus the
//! fixed builtin table below.

use super::ast::{BinaryOp, Expr, UnaryOp};
use super::env::Env;
use super::value::{ExprError, Value};
use crate::time::{nanos_to_millis, nanos_to_seconds};

pub fn eval(expr: &Expr, env: &Env) -> Result<Value, ExprError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Name(name) => env
            .get(name)
            .cloned()
            .ok_or_else(|| ExprError::UnknownName(name.clone())),
        Expr::List(items) => {
            let values: Result<Vec<Value>, ExprError> =
                items.iter().map(|item| eval(item, env)).collect();
            Ok(Value::List(values?))
        }
        Expr::Unary { op, operand } => {
            let value = eval(operand, env)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!value.truthy())),
                UnaryOp::Neg => match value {
                    Value::Int(i) => Ok(Value::Int(-i)),
                    Value::Float(f) => Ok(Value::Float(-f)),
                    other => Err(ExprError::TypeError(format!(
                        "cannot negate {}",
                        other.type_name()
                    ))),
                },
            }
        }
        Expr::Binary { op, lhs, rhs } => eval_binary(*op, lhs, rhs, env),
        Expr::Call { function, args } => {
            let values: Result<Vec<Value>, ExprError> =
                args.iter().map(|arg| eval(arg, env)).collect();
            call_builtin(function, values?)
        }
        Expr::Index { target, index } => {
            let target = eval(target, env)?;
            let index = eval(index, env)?;
            index_value(&target, &index)
        }
    }
}

fn eval_binary(op: BinaryOp, lhs: &Expr, rhs: &Expr, env: &Env) -> Result<Value, ExprError> {
    // Short-circuit forms first; Python returns the deciding operand, and
    // macro predicates rely on that for things like `et and sec(et) < 1`.
    match op {
        BinaryOp::And => {
            let left = eval(lhs, env)?;
            if !left.truthy() {
                return Ok(left);
            }
            return eval(rhs, env);
        }
        BinaryOp::Or => {
            let left = eval(lhs, env)?;
            if left.truthy() {
                return Ok(left);
            }
            return eval(rhs, env);
        }
        _ => {}
    }
    let left = eval(lhs, env)?;
    let right = eval(rhs, env)?;
    match op {
        BinaryOp::Add => match (&left, &right) {
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
            _ => arithmetic(left, right, |a, b| a + b, |a, b| a.checked_add(b)),
        },
        BinaryOp::Sub => arithmetic(left, right, |a, b| a - b, |a, b| a.checked_sub(b)),
        BinaryOp::Mul => arithmetic(left, right, |a, b| a * b, |a, b| a.checked_mul(b)),
        BinaryOp::Div => {
            let (a, b) = numbers(&left, &right)?;
            if b == 0.0 {
                return Err(ExprError::DivisionByZero);
            }
            Ok(Value::Float(a / b))
        }
        BinaryOp::FloorDiv => {
            let (a, b) = numbers(&left, &right)?;
            if b == 0.0 {
                return Err(ExprError::DivisionByZero);
            }
            match (&left, &right) {
                (Value::Int(x), Value::Int(y)) => Ok(Value::Int(x.div_euclid(*y))),
                _ => Ok(Value::Float((a / b).floor())),
            }
        }
        BinaryOp::Mod => {
            let (a, b) = numbers(&left, &right)?;
            if b == 0.0 {
                return Err(ExprError::DivisionByZero);
            }
            match (&left, &right) {
                (Value::Int(x), Value::Int(y)) => Ok(Value::Int(x.rem_euclid(*y))),
                _ => Ok(Value::Float(a.rem_euclid(b))),
            }
        }
        BinaryOp::Eq => Ok(Value::Bool(left.loosely_equals(&right))),
        BinaryOp::NotEq => Ok(Value::Bool(!left.loosely_equals(&right))),
        BinaryOp::Lt => Ok(Value::Bool(left.compare(&right)?.is_lt())),
        BinaryOp::Le => Ok(Value::Bool(left.compare(&right)?.is_le())),
        BinaryOp::Gt => Ok(Value::Bool(left.compare(&right)?.is_gt())),
        BinaryOp::Ge => Ok(Value::Bool(left.compare(&right)?.is_ge())),
        BinaryOp::In => contains(&right, &left).map(Value::Bool),
        BinaryOp::NotIn => contains(&right, &left).map(|b| Value::Bool(!b)),
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    }
}

fn arithmetic(
    left: Value,
    right: Value,
    float_op: fn(f64, f64) -> f64,
    int_op: fn(i64, i64) -> Option<i64>,
) -> Result<Value, ExprError> {
    match (&left, &right) {
        (Value::Int(a), Value::Int(b)) => int_op(*a, *b)
            .map(Value::Int)
            .ok_or_else(|| ExprError::TypeError("integer overflow".to_string())),
        _ => {
            let (a, b) = numbers(&left, &right)?;
            Ok(Value::Float(float_op(a, b)))
        }
    }
}

fn numbers(left: &Value, right: &Value) -> Result<(f64, f64), ExprError> {
    match (left.as_number(), right.as_number()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(ExprError::TypeError(format!(
            "expected numbers, got {} and {}",
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn contains(container: &Value, needle: &Value) -> Result<bool, ExprError> {
    match container {
        Value::List(items) => Ok(items.iter().any(|item| item.loosely_equals(needle))),
        Value::Str(s) => match needle {
            Value::Str(sub) => Ok(s.contains(sub.as_str())),
            other => Err(ExprError::TypeError(format!(
                "cannot search a str for {}",
                other.type_name()
            ))),
        },
        other => Err(ExprError::TypeError(format!(
            "{} is not a container",
            other.type_name()
        ))),
    }
}

fn index_value(target: &Value, index: &Value) -> Result<Value, ExprError> {
    let Value::List(items) = target else {
        return Err(ExprError::TypeError(format!(
            "cannot index {}",
            target.type_name()
        )));
    };
    let Value::Int(i) = index else {
        return Err(ExprError::TypeError(format!(
            "list index must be int, got {}",
            index.type_name()
        )));
    };
    let len = items.len() as i64;
    let effective = if *i < 0 { i + len } else { *i };
    if effective < 0 || effective >= len {
        return Err(ExprError::IndexOutOfRange(*i));
    }
    Ok(items[effective as usize].clone())
}

fn call_builtin(function: &str, args: Vec<Value>) -> Result<Value, ExprError> {
    let arity_error = || {
        ExprError::TypeError(format!(
            "wrong number of arguments for {function}()"
        ))
    };
    match function {
        "sec" | "SECONDS" => {
            let [value] = args.as_slice() else {
                return Err(arity_error());
            };
            let (nanos, _) = numbers(value, &Value::Int(0))?;
            Ok(Value::Float(nanos_to_seconds(nanos as i64)))
        }
        "ms" | "MILLISECONDS" => {
            let [value] = args.as_slice() else {
                return Err(arity_error());
            };
            let (nanos, _) = numbers(value, &Value::Int(0))?;
            Ok(Value::Float(nanos_to_millis(nanos as i64)))
        }
        "abs" => {
            let [value] = args.as_slice() else {
                return Err(arity_error());
            };
            match value {
                Value::Int(i) => Ok(Value::Int(i.abs())),
                Value::Float(f) => Ok(Value::Float(f.abs())),
                other => Err(ExprError::TypeError(format!(
                    "cannot abs {}",
                    other.type_name()
                ))),
            }
        }
        "len" => {
            let [value] = args.as_slice() else {
                return Err(arity_error());
            };
            match value {
                Value::List(items) => Ok(Value::Int(items.len() as i64)),
                Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
                other => Err(ExprError::TypeError(format!(
                    "{} has no len",
                    other.type_name()
                ))),
            }
        }
        "min" | "max" => {
            let items: Vec<Value> = match args.as_slice() {
                [Value::List(items)] => items.clone(),
                [] => return Err(arity_error()),
                _ => args,
            };
            let mut best: Option<Value> = None;
            for item in items {
                best = Some(match best {
                    None => item,
                    Some(current) => {
                        let ordering = item.compare(&current)?;
                        let take = if function == "min" {
                            ordering.is_lt()
                        } else {
                            ordering.is_gt()
                        };
                        if take {
                            item
                        } else {
                            current
                        }
                    }
                });
            }
            best.ok_or_else(|| ExprError::TypeError(format!("{function}() of empty sequence")))
        }
        "round" => {
            let [value] = args.as_slice() else {
                return Err(arity_error());
            };
            let (number, _) = numbers(value, &Value::Int(0))?;
            Ok(Value::Int(number.round() as i64))
        }
        other => Err(ExprError::UnknownFunction(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::super::parser::parse;
    use super::*;

    fn eval_str(source: &str, env: &Env) -> Result<Value, ExprError> {
        eval(&parse(source).unwrap(), env)
    }

    #[test]
    fn arithmetic_and_comparison() {
        let env = Env::new();
        assert_eq!(eval_str("1 + 2 * 3", &env).unwrap(), Value::Int(7));
        assert_eq!(eval_str("7 // 2", &env).unwrap(), Value::Int(3));
        assert_eq!(eval_str("7 / 2", &env).unwrap(), Value::Float(3.5));
        assert_eq!(eval_str("7 % 2 == 1", &env).unwrap(), Value::Bool(true));
    }

    #[test]
    fn variables() {
        let mut env = Env::new();
        env.bind(&["VELOCITY", "v"], Value::Int(90));
        assert_eq!(eval_str("v > 80", &env).unwrap(), Value::Bool(true));
        assert_eq!(
            eval_str("VELOCITY >= 80 and VELOCITY <= 100", &env).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn unknown_name_is_an_error() {
        assert!(matches!(
            eval_str("nope", &Env::new()),
            Err(ExprError::UnknownName(_))
        ));
    }

    #[test]
    fn short_circuit_returns_operand() {
        let mut env = Env::new();
        env.bind(&["et"], Value::None);
        // `et` is None at position 0; the `and` must not evaluate sec(None).
        assert_eq!(
            eval_str("et and sec(et) < 1", &env).unwrap(),
            Value::None
        );
    }

    #[test]
    fn time_helpers() {
        let env = Env::new();
        assert_eq!(
            eval_str("sec(1500000000)", &env).unwrap(),
            Value::Float(1.5)
        );
        assert_eq!(
            eval_str("MILLISECONDS(2000000)", &env).unwrap(),
            Value::Float(2.0)
        );
    }

    #[test]
    fn membership() {
        let mut env = Env::new();
        env.bind(&["c"], Value::Int(9));
        assert_eq!(eval_str("c in [9, 10]", &env).unwrap(), Value::Bool(true));
        assert_eq!(
            eval_str("c not in [9, 10]", &env).unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn list_functions() {
        let mut env = Env::new();
        env.bind(
            &["vs"],
            Value::List(vec![Value::Int(80), Value::Int(95), Value::Int(70)]),
        );
        assert_eq!(eval_str("min(vs)", &env).unwrap(), Value::Int(70));
        assert_eq!(eval_str("max(vs)", &env).unwrap(), Value::Int(95));
        assert_eq!(eval_str("len(vs)", &env).unwrap(), Value::Int(3));
        assert_eq!(eval_str("vs[-1]", &env).unwrap(), Value::Int(70));
    }

    #[test]
    fn division_by_zero() {
        assert_eq!(
            eval_str("1 / 0", &Env::new()),
            Err(ExprError::DivisionByZero)
        );
    }
}
