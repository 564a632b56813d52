use thiserror::Error;

use crate::bytecode::bytecode_error::BytecodeError;

/// A mistake in the user's program found while compiling it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SemanticError {
    #[error("redefinition of variable '{name}'")]
    Redefinition { name: String },

    #[error("name '{name}' is not defined")]
    UndefinedName { name: String },

    #[error("cannot access uninitialized variable '{name}'")]
    Uninitialized { name: String },

    #[error("invalid assignment target")]
    InvalidAssignmentTarget,

    #[error("too many constants in one program (max 65536)")]
    TooManyConstants,

    #[error("too many global names in one program (max 65536)")]
    TooManyNames,

    #[error("too many live local variables (max 65536)")]
    TooManyLocals,

    #[error("jump target {target} is beyond the addressable range")]
    JumpTooFar { target: usize },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    /// User-facing error; aborts the current top-level statement.
    #[error("line {line}: semantic error: {error}")]
    Semantic { error: SemanticError, line: usize },

    /// A program-wide capacity limit was hit. Not tied to one source line.
    #[error("semantic error: {0}")]
    Limit(SemanticError),

    /// Instruction assembly was misused. This is a compiler bug.
    #[error("developer error: {0}")]
    Developer(#[from] BytecodeError),
}

impl CompileError {
    pub fn semantic(error: SemanticError, line: usize) -> Self {
        CompileError::Semantic { error, line }
    }

    pub fn is_semantic(&self) -> bool {
        matches!(self, CompileError::Semantic { .. } | CompileError::Limit(_))
    }
}

/// All errors from one batch compilation, one per failed top-level statement.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompileErrors(pub Vec<CompileError>);

impl CompileErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CompileError> {
        self.0.iter()
    }
}

impl std::fmt::Display for CompileErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "compile error: {}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileErrors {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semantic_error_display_names_identifier() {
        let err = CompileError::semantic(
            SemanticError::Uninitialized {
                name: "a".to_string(),
            },
            3,
        );
        assert_eq!(
            err.to_string(),
            "line 3: semantic error: cannot access uninitialized variable 'a'"
        );
        assert!(err.is_semantic());
    }

    #[test]
    fn test_limit_error_has_no_line() {
        let err = CompileError::Limit(SemanticError::TooManyConstants);
        assert_eq!(
            err.to_string(),
            "semantic error: too many constants in one program (max 65536)"
        );
        assert!(err.is_semantic());
    }

    #[test]
    fn test_developer_error_from_bytecode_error() {
        let err: CompileError = BytecodeError::OperandCount {
            name: "POP",
            expected: 0,
            got: 2,
        }
        .into();
        assert!(!err.is_semantic());
        assert!(err.to_string().starts_with("developer error:"));
    }

    #[test]
    fn test_error_list_display() {
        let errors = CompileErrors(vec![
            CompileError::semantic(
                SemanticError::UndefinedName {
                    name: "x".to_string(),
                },
                1,
            ),
            CompileError::semantic(
                SemanticError::Redefinition {
                    name: "y".to_string(),
                },
                2,
            ),
        ]);
        let text = errors.to_string();
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("name 'x' is not defined"));
        assert!(text.contains("redefinition of variable 'y'"));
    }

    #[test]
    fn test_error_implements_std_error() {
        let err = CompileErrors::default();
        let _: &dyn std::error::Error = &err;
    }
}
