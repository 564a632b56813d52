//! Operator semantics shared by the VM and the tree-walking interpreter.
//!
//! Numeric operands are tried as integers first; only when both are integers
//! is integer arithmetic used. Otherwise both are tried as floats. Anything
//! else is a type error naming both operands.

use crate::lang::node::BinaryOp;
use crate::lang::value::Value;
use crate::runtime::runtime_error::{RuntimeError, type_error, unary_type_error};

pub fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, RuntimeError> {
    match op {
        BinaryOp::Add => numeric(left, right, "add", |a, b| Ok(a.wrapping_add(b)), |a, b| a + b),
        BinaryOp::Subtract => numeric(
            left,
            right,
            "subtract",
            |a, b| Ok(a.wrapping_sub(b)),
            |a, b| a - b,
        ),
        BinaryOp::Multiply => numeric(
            left,
            right,
            "multiply",
            |a, b| Ok(a.wrapping_mul(b)),
            |a, b| a * b,
        ),
        BinaryOp::Divide => numeric(
            left,
            right,
            "divide",
            |a, b| {
                if b == 0 {
                    Err(RuntimeError::DivisionByZero)
                } else {
                    Ok(a.wrapping_div(b))
                }
            },
            |a, b| a / b,
        ),

        BinaryOp::Equal => Ok(Value::Bool(equals(left, right))),
        BinaryOp::NotEqual => Ok(Value::Bool(!equals(left, right))),

        BinaryOp::Greater => compare(left, right, |a, b| a > b, |a, b| a > b),
        BinaryOp::GreaterEqual => compare(left, right, |a, b| a >= b, |a, b| a >= b),
        BinaryOp::Less => compare(left, right, |a, b| a < b, |a, b| a < b),
        BinaryOp::LessEqual => compare(left, right, |a, b| a <= b, |a, b| a <= b),
    }
}

fn numeric(
    left: &Value,
    right: &Value,
    operation: &'static str,
    int_op: impl FnOnce(i64, i64) -> Result<i64, RuntimeError>,
    float_op: impl FnOnce(f64, f64) -> f64,
) -> Result<Value, RuntimeError> {
    if let (Some(a), Some(b)) = (left.as_integer(), right.as_integer()) {
        return int_op(a, b).map(Value::Integer);
    }
    if let (Some(a), Some(b)) = (left.as_float(), right.as_float()) {
        return Ok(Value::Float(float_op(a, b)));
    }
    Err(type_error(operation, left, right))
}

fn compare(
    left: &Value,
    right: &Value,
    int_cmp: impl FnOnce(i64, i64) -> bool,
    float_cmp: impl FnOnce(f64, f64) -> bool,
) -> Result<Value, RuntimeError> {
    if let (Some(a), Some(b)) = (left.as_integer(), right.as_integer()) {
        return Ok(Value::Bool(int_cmp(a, b)));
    }
    if let (Some(a), Some(b)) = (left.as_float(), right.as_float()) {
        return Ok(Value::Bool(float_cmp(a, b)));
    }
    Err(type_error("compare", left, right))
}

/// Numbers compare by value across integer and float; everything else
/// structurally, and values of different kinds are never equal.
pub fn equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Integer(a), Value::Integer(b)) => a == b,
        (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
            left.as_float() == right.as_float()
        }
        _ => left == right,
    }
}

pub fn negate(value: &Value) -> Result<Value, RuntimeError> {
    match value {
        Value::Integer(n) => Ok(Value::Integer(n.wrapping_neg())),
        Value::Float(n) => Ok(Value::Float(-n)),
        other => Err(unary_type_error("negate", other)),
    }
}

pub fn not(value: &Value) -> Value {
    Value::Bool(!value.is_truthy())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(n: i64) -> Value {
        Value::Integer(n)
    }

    fn float(n: f64) -> Value {
        Value::Float(n)
    }

    fn string(s: &str) -> Value {
        Value::String(s.to_string())
    }

    #[test]
    fn integer_division_stays_integer() {
        assert_eq!(binary(BinaryOp::Divide, &int(5), &int(2)).unwrap(), int(2));
        assert_eq!(binary(BinaryOp::Divide, &int(-7), &int(2)).unwrap(), int(-3));
    }

    #[test]
    fn mixed_operands_use_float() {
        assert_eq!(binary(BinaryOp::Divide, &int(9), &float(2.0)).unwrap(), float(4.5));
        assert_eq!(binary(BinaryOp::Add, &float(1.5), &int(1)).unwrap(), float(2.5));
    }

    #[test]
    fn integer_division_by_zero() {
        assert!(matches!(
            binary(BinaryOp::Divide, &int(1), &int(0)),
            Err(RuntimeError::DivisionByZero)
        ));
    }

    #[test]
    fn float_division_by_zero_is_infinite() {
        let result = binary(BinaryOp::Divide, &float(1.0), &int(0)).unwrap();
        assert_eq!(result, float(f64::INFINITY));
    }

    #[test]
    fn integer_overflow_wraps() {
        assert_eq!(
            binary(BinaryOp::Add, &int(i64::MAX), &int(1)).unwrap(),
            int(i64::MIN)
        );
    }

    #[test]
    fn strings_do_not_add() {
        let err = binary(BinaryOp::Add, &string("a"), &int(1)).unwrap_err();
        assert!(err.to_string().contains("cannot add string \"a\" and integer 1"));
        assert!(binary(BinaryOp::Add, &string("a"), &string("b")).is_err());
        assert!(binary(BinaryOp::Multiply, &Value::Bool(true), &int(1)).is_err());
    }

    #[test]
    fn comparisons() {
        assert_eq!(binary(BinaryOp::Less, &int(1), &int(2)).unwrap(), Value::Bool(true));
        assert_eq!(
            binary(BinaryOp::GreaterEqual, &float(2.0), &int(2)).unwrap(),
            Value::Bool(true)
        );
        assert!(binary(BinaryOp::Greater, &string("b"), &string("a")).is_err());
    }

    #[test]
    fn equality_across_kinds() {
        assert!(equals(&int(2), &float(2.0)));
        assert!(equals(&Value::Nil, &Value::Nil));
        assert!(equals(&string("x"), &string("x")));
        assert!(!equals(&int(0), &Value::Bool(false)));
        assert!(!equals(&Value::Nil, &Value::Bool(false)));
        assert_eq!(
            binary(BinaryOp::NotEqual, &int(1), &string("1")).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn unary_operators() {
        assert_eq!(negate(&int(3)).unwrap(), int(-3));
        assert_eq!(negate(&float(1.5)).unwrap(), float(-1.5));
        assert!(negate(&string("x")).is_err());
        assert_eq!(not(&Value::Nil), Value::Bool(true));
        assert_eq!(not(&int(0)), Value::Bool(false));
    }
}
