use thiserror::Error;

use crate::bytecode::bytecode_error::BytecodeError;
use crate::lang::value::Value;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime error: type error: cannot {operation} {left} and {right}")]
    TypeError {
        operation: &'static str,
        left: String,
        right: String,
    },

    #[error("runtime error: type error: cannot {operation} {operand}")]
    UnaryTypeError {
        operation: &'static str,
        operand: String,
    },

    #[error("runtime error: division by zero")]
    DivisionByZero,

    #[error("runtime error: unknown opcode 0x{opcode:02x} at offset {offset}")]
    UnknownOpcode { opcode: u8, offset: usize },

    #[error("runtime error: stack underflow at offset {offset}")]
    StackUnderflow { offset: usize },

    #[error("runtime error: stack size limit exceeded ({limit})")]
    StackOverflow { limit: usize },

    #[error("runtime error: execution step limit exceeded ({limit})")]
    StepLimit { limit: usize },

    #[error("runtime error: malformed bytecode: {0}")]
    Malformed(#[from] BytecodeError),

    #[error("runtime error: name '{name}' is not defined")]
    UndefinedVariable { name: String },

    #[error("runtime error: cannot access uninitialized variable '{name}'")]
    UninitializedVariable { name: String },

    #[error("runtime error: redefinition of variable '{name}'")]
    Redefinition { name: String },

    #[error("runtime error: invalid assignment target")]
    InvalidAssignmentTarget,

    #[error("runtime error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type error naming both offending values.
pub fn type_error(operation: &'static str, left: &Value, right: &Value) -> RuntimeError {
    RuntimeError::TypeError {
        operation,
        left: describe(left),
        right: describe(right),
    }
}

pub fn unary_type_error(operation: &'static str, operand: &Value) -> RuntimeError {
    RuntimeError::UnaryTypeError {
        operation,
        operand: describe(operand),
    }
}

fn describe(value: &Value) -> String {
    format!("{} {}", value.type_name(), value.repr())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_error_names_both_values() {
        let err = type_error("add", &Value::String("a".to_string()), &Value::Bool(true));
        assert_eq!(
            err.to_string(),
            "runtime error: type error: cannot add string \"a\" and bool true"
        );
    }

    #[test]
    fn test_malformed_wraps_bytecode_error() {
        let err: RuntimeError = BytecodeError::MissingEnd.into();
        assert!(err.to_string().contains("does not end with END"));
    }
}
