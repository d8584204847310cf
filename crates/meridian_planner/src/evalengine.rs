//! Scalar expressions the gateway can evaluate without a shard.

use std::collections::HashMap;
use std::fmt;

use meridian_sql_frontend::ast::{BinaryOp, Expr, Literal, UnaryOp};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Int(i64),
    Uint(u64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Uint(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "'{s}'"),
            Value::Bytes(b) => {
                f.write_str("X'")?;
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                f.write_str("'")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScalarExpr {
    Literal { value: Value },
    BindVar { name: String },
    ListBindVar { name: String },
    Tuple { items: Vec<ScalarExpr> },
    Arithmetic {
        op: ArithOp,
        left: Box<ScalarExpr>,
        right: Box<ScalarExpr>,
    },
    Neg { expr: Box<ScalarExpr> },
}

impl ScalarExpr {
    pub fn literal(value: Value) -> Self {
        ScalarExpr::Literal { value }
    }

    pub fn bind_var(name: impl Into<String>) -> Self {
        ScalarExpr::BindVar { name: name.into() }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConvertError {
    /// The expression has no scalar form. Callers treat this as
    /// "optimization not applicable".
    #[error("expression not supported for evaluation: {0}")]
    NotSupported(String),

    #[error("invalid literal: {0}")]
    InvalidLiteral(String),

    #[error("missing bind variable: {0}")]
    MissingBindVar(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),
}

pub(crate) fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| s.get(i..i + 2).and_then(|pair| u8::from_str_radix(pair, 16).ok()))
        .collect()
}

fn convert_literal(lit: &Literal) -> Result<Value, ConvertError> {
    Ok(match lit {
        Literal::Int(s) => match s.parse::<i64>() {
            Ok(v) => Value::Int(v),
            Err(_) => Value::Uint(
                s.parse::<u64>()
                    .map_err(|_| ConvertError::InvalidLiteral(s.clone()))?,
            ),
        },
        Literal::Float(s) => {
            Value::Float(s.parse::<f64>().map_err(|_| ConvertError::InvalidLiteral(s.clone()))?)
        }
        Literal::Str(s) => Value::Str(s.clone()),
        Literal::Hex(h) => {
            Value::Bytes(decode_hex(h).ok_or_else(|| ConvertError::InvalidLiteral(h.clone()))?)
        }
        Literal::Bool(b) => Value::Int(i64::from(*b)),
        Literal::Null => Value::Null,
    })
}

/// Convert a statement expression into its scalar form.
pub fn to_scalar_expr(expr: &Expr) -> Result<ScalarExpr, ConvertError> {
    match expr {
        Expr::Literal(lit) => Ok(ScalarExpr::literal(convert_literal(lit)?)),
        Expr::Argument(name) => Ok(ScalarExpr::bind_var(name.clone())),
        Expr::ListArg(name) => Ok(ScalarExpr::ListBindVar { name: name.clone() }),
        Expr::Tuple(items) => Ok(ScalarExpr::Tuple {
            items: items.iter().map(to_scalar_expr).collect::<Result<_, _>>()?,
        }),
        Expr::Paren(inner) => to_scalar_expr(inner),
        Expr::Unary { op: UnaryOp::Plus, expr: inner } => to_scalar_expr(inner),
        Expr::Unary { op: UnaryOp::Minus, expr: inner } => {
            Ok(ScalarExpr::Neg { expr: Box::new(to_scalar_expr(inner)?) })
        }
        Expr::Binary { op, left, right } => {
            let op = match op {
                BinaryOp::Plus => ArithOp::Add,
                BinaryOp::Minus => ArithOp::Sub,
                BinaryOp::Mult => ArithOp::Mul,
                BinaryOp::Div => ArithOp::Div,
                _ => return Err(ConvertError::NotSupported(expr.to_string())),
            };
            Ok(ScalarExpr::Arithmetic {
                op,
                left: Box::new(to_scalar_expr(left)?),
                right: Box::new(to_scalar_expr(right)?),
            })
        }
        _ => Err(ConvertError::NotSupported(expr.to_string())),
    }
}

fn as_f64(v: &Value) -> Result<f64, ConvertError> {
    match v {
        Value::Int(i) => Ok(*i as f64),
        Value::Uint(u) => Ok(*u as f64),
        Value::Float(f) => Ok(*f),
        other => Err(ConvertError::TypeMismatch(format!("{other} is not numeric"))),
    }
}

fn arith(op: ArithOp, l: Value, r: Value) -> Result<Value, ConvertError> {
    if l == Value::Null || r == Value::Null {
        return Ok(Value::Null);
    }
    if op == ArithOp::Div {
        let d = as_f64(&r)?;
        if d == 0.0 {
            return Ok(Value::Null);
        }
        return Ok(Value::Float(as_f64(&l)? / d));
    }
    if let (Value::Int(a), Value::Int(b)) = (&l, &r) {
        let out = match op {
            ArithOp::Add => a.checked_add(*b),
            ArithOp::Sub => a.checked_sub(*b),
            ArithOp::Mul => a.checked_mul(*b),
            ArithOp::Div => None,
        };
        return out
            .map(Value::Int)
            .ok_or_else(|| ConvertError::TypeMismatch(format!("BIGINT value is out of range in {a} {op:?} {b}")));
    }
    let (a, b) = (as_f64(&l)?, as_f64(&r)?);
    Ok(Value::Float(match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        ArithOp::Div => a / b,
    }))
}

/// Evaluate against a set of bind variables.
pub fn evaluate(expr: &ScalarExpr, binds: &HashMap<String, Value>) -> Result<Value, ConvertError> {
    match expr {
        ScalarExpr::Literal { value } => Ok(value.clone()),
        ScalarExpr::BindVar { name } | ScalarExpr::ListBindVar { name } => binds
            .get(name)
            .cloned()
            .ok_or_else(|| ConvertError::MissingBindVar(name.clone())),
        ScalarExpr::Tuple { .. } => {
            Err(ConvertError::TypeMismatch("tuple cannot be evaluated to a single value".into()))
        }
        ScalarExpr::Arithmetic { op, left, right } => {
            arith(*op, evaluate(left, binds)?, evaluate(right, binds)?)
        }
        ScalarExpr::Neg { expr } => match evaluate(expr, binds)? {
            Value::Null => Ok(Value::Null),
            Value::Int(i) => i
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| ConvertError::TypeMismatch(format!("BIGINT value is out of range in -{i}"))),
            other => Ok(Value::Float(-as_f64(&other)?)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(e: &Expr) -> Value {
        evaluate(&to_scalar_expr(e).unwrap(), &HashMap::new()).unwrap()
    }

    #[test]
    fn test_arithmetic() {
        let e = Expr::Binary {
            op: BinaryOp::Plus,
            left: Box::new(Expr::int(1)),
            right: Box::new(Expr::Binary {
                op: BinaryOp::Mult,
                left: Box::new(Expr::int(2)),
                right: Box::new(Expr::int(3)),
            }),
        };
        assert_eq!(eval(&e), Value::Int(7));
    }

    #[test]
    fn test_division_by_zero_is_null() {
        let e = Expr::Binary {
            op: BinaryOp::Div,
            left: Box::new(Expr::int(1)),
            right: Box::new(Expr::int(0)),
        };
        assert_eq!(eval(&e), Value::Null);
    }

    #[test]
    fn test_not_supported_is_distinguishable() {
        let err = to_scalar_expr(&Expr::col("a")).unwrap_err();
        assert!(matches!(err, ConvertError::NotSupported(_)));
        let err = to_scalar_expr(&Expr::Literal(Literal::Int("99999999999999999999999".into())))
            .unwrap_err();
        assert!(matches!(err, ConvertError::InvalidLiteral(_)));
    }

    #[test]
    fn test_bind_var_lookup() {
        let mut binds = HashMap::new();
        binds.insert("x".to_string(), Value::Int(4));
        let e = to_scalar_expr(&Expr::Unary { op: UnaryOp::Minus, expr: Box::new(Expr::arg("x")) })
            .unwrap();
        assert_eq!(evaluate(&e, &binds).unwrap(), Value::Int(-4));
        assert!(matches!(
            evaluate(&ScalarExpr::bind_var("y"), &binds),
            Err(ConvertError::MissingBindVar(_))
        ));
    }

    #[test]
    fn test_decode_hex() {
        assert_eq!(decode_hex("80ff"), Some(vec![0x80, 0xff]));
        assert_eq!(decode_hex("8"), None);
        assert_eq!(decode_hex("zz"), None);
    }
}
