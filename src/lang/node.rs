use serde::Serialize;

use super::value::Value;

/// Binary arithmetic and comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Equal,
    NotEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnaryOp {
    /// `-x`
    Negate,
    /// `!x`
    Not,
}

/// Short-circuiting operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LogicalOp {
    And,
    Or,
}

/// Expression node.
///
/// Every expression produces exactly one value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Expr {
    // ───────────────────────────── Operators ────────────────────────────
    /// `left op right`, evaluated left to right.
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },

    /// `op operand`
    Unary { op: UnaryOp, operand: Box<Expr> },

    /// `left and right` / `left or right`.
    ///
    /// The right operand is only evaluated when the left one does not
    /// decide the result; the deciding operand's value is the result.
    Logical {
        left: Box<Expr>,
        op: LogicalOp,
        right: Box<Expr>,
    },

    // ───────────────────────────── Primaries ────────────────────────────
    Literal(Value),

    /// Parenthesized expression. Only the inner expression is compiled.
    Grouping(Box<Expr>),

    /// Read of a named variable.
    Variable { name: String, line: usize },

    /// `target = value`.
    ///
    /// The parser accepts any expression as the target; only
    /// `Expr::Variable` is a valid one.
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
        line: usize,
    },
}

/// Statement node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Stmt {
    /// An expression evaluated for its effect (or, at the end of a
    /// top-level unit, for its value).
    Expression(Expr),

    /// `print expr`
    Print(Expr),

    /// `var name` or `var name = initializer`
    Var {
        name: String,
        initializer: Option<Expr>,
        line: usize,
    },

    /// `{ ... }` opens a new scope.
    Block(Vec<Stmt>),

    /// `if (condition) then_branch else else_branch`
    If {
        condition: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },

    /// `while (condition) body`
    While { condition: Expr, body: Box<Stmt> },
}

impl Expr {
    pub fn binary(left: Expr, op: BinaryOp, right: Expr) -> Self {
        Expr::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    pub fn logical(left: Expr, op: LogicalOp, right: Expr) -> Self {
        Expr::Logical {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Expr::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn variable(name: impl Into<String>, line: usize) -> Self {
        Expr::Variable {
            name: name.into(),
            line,
        }
    }
}
