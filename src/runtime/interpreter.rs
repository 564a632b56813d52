use std::collections::HashMap;
use std::io::{self, Stdout, Write};

use tracing::debug;

use crate::lang::node::{Expr, LogicalOp, Stmt, UnaryOp};
use crate::lang::program::Program;
use crate::lang::value::Value;
use crate::runtime::arith;
use crate::runtime::runtime_error::RuntimeError;

/// One lexical scope. `None` marks a declared but unassigned variable.
type Scope = HashMap<String, Option<Value>>;

/// Evaluates the syntax tree directly, without compiling it.
///
/// Observable behavior matches the compiler and VM pair: the same operator
/// rules, truthiness and name rules. Name errors surface when the offending
/// statement runs rather than before the program starts.
pub struct Interpreter<W: Write = Stdout> {
    /// `scopes[0]` holds the globals and survives between runs.
    scopes: Vec<Scope>,
    out: W,
    last_value: Option<Value>,
}

impl Default for Interpreter<Stdout> {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter<Stdout> {
    pub fn new() -> Self {
        Self::with_output(io::stdout())
    }
}

impl<W: Write> Interpreter<W> {
    pub fn with_output(out: W) -> Self {
        Self {
            scopes: vec![Scope::new()],
            out,
            last_value: None,
        }
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    /// Value of the trailing expression statement of the last run.
    pub fn last_value(&self) -> Option<&Value> {
        self.last_value.as_ref()
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.scopes.first()?.get(name)?.as_ref()
    }

    pub fn run(&mut self, program: &Program) -> Result<(), RuntimeError> {
        self.last_value = None;
        let last = program.statements.len().checked_sub(1);

        for (i, stmt) in program.statements.iter().enumerate() {
            let result = match stmt {
                Stmt::Expression(expr) if Some(i) == last => self.evaluate(expr).map(|value| {
                    self.last_value = Some(value);
                }),
                _ => self.execute(stmt),
            };

            if let Err(err) = result {
                debug!(statement = i, error = %err, "interpreter run failed");
                self.scopes.truncate(1);
                return Err(err);
            }
        }

        Ok(())
    }

    // Statements

    fn execute(&mut self, stmt: &Stmt) -> Result<(), RuntimeError> {
        match stmt {
            Stmt::Expression(expr) => {
                self.evaluate(expr)?;
            }
            Stmt::Print(expr) => {
                let value = self.evaluate(expr)?;
                writeln!(self.out, "{}", value)?;
            }
            Stmt::Var {
                name, initializer, ..
            } => {
                if self.current_scope().contains_key(name) {
                    return Err(RuntimeError::Redefinition { name: name.clone() });
                }
                let value = match initializer {
                    Some(expr) => Some(self.evaluate(expr)?),
                    None => None,
                };
                self.current_scope_mut().insert(name.clone(), value);
            }
            Stmt::Block(statements) => {
                self.scopes.push(Scope::new());
                let result = statements.iter().try_for_each(|stmt| self.execute(stmt));
                self.scopes.pop();
                result?;
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    self.execute(then_branch)?;
                } else if let Some(else_branch) = else_branch {
                    self.execute(else_branch)?;
                }
            }
            Stmt::While { condition, body } => {
                while self.evaluate(condition)?.is_truthy() {
                    self.execute(body)?;
                }
            }
        }
        Ok(())
    }

    // Expressions

    fn evaluate(&mut self, expr: &Expr) -> Result<Value, RuntimeError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Grouping(inner) => self.evaluate(inner),
            Expr::Binary { left, op, right } => {
                let left = self.evaluate(left)?;
                let right = self.evaluate(right)?;
                arith::binary(*op, &left, &right)
            }
            Expr::Unary { op, operand } => {
                let value = self.evaluate(operand)?;
                match op {
                    UnaryOp::Negate => arith::negate(&value),
                    UnaryOp::Not => Ok(arith::not(&value)),
                }
            }
            Expr::Logical { left, op, right } => {
                let left = self.evaluate(left)?;
                match (op, left.is_truthy()) {
                    (LogicalOp::And, false) | (LogicalOp::Or, true) => Ok(left),
                    _ => self.evaluate(right),
                }
            }
            Expr::Variable { name, .. } => self.lookup(name),
            Expr::Assign { target, value, .. } => {
                let Expr::Variable { name, .. } = target.as_ref() else {
                    return Err(RuntimeError::InvalidAssignmentTarget);
                };
                let value = self.evaluate(value)?;
                self.assign(name, value.clone())?;
                Ok(value)
            }
        }
    }

    fn lookup(&self, name: &str) -> Result<Value, RuntimeError> {
        let slot = self
            .scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .ok_or_else(|| RuntimeError::UndefinedVariable {
                name: name.to_string(),
            })?;

        slot.clone()
            .ok_or_else(|| RuntimeError::UninitializedVariable {
                name: name.to_string(),
            })
    }

    fn assign(&mut self, name: &str, value: Value) -> Result<(), RuntimeError> {
        let slot = self
            .scopes
            .iter_mut()
            .rev()
            .find_map(|scope| scope.get_mut(name))
            .ok_or_else(|| RuntimeError::UndefinedVariable {
                name: name.to_string(),
            })?;
        *slot = Some(value);
        Ok(())
    }

    fn current_scope(&self) -> &Scope {
        // `scopes` always holds at least the global scope
        &self.scopes[self.scopes.len() - 1]
    }

    fn current_scope_mut(&mut self) -> &mut Scope {
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parse_source;

    fn interpreter() -> Interpreter<Vec<u8>> {
        Interpreter::with_output(Vec::new())
    }

    fn run_source(source: &str) -> Interpreter<Vec<u8>> {
        let program = parse_source(source).expect("parse");
        let mut interp = interpreter();
        interp.run(&program).expect("run");
        interp
    }

    fn run_error(source: &str) -> RuntimeError {
        let program = parse_source(source).expect("parse");
        interpreter().run(&program).expect_err("expected error")
    }

    fn output(interp: &Interpreter<Vec<u8>>) -> String {
        String::from_utf8(interp.output().clone()).unwrap()
    }

    #[test]
    fn evaluates_arithmetic() {
        assert_eq!(run_source("5 * 3 + 2").last_value(), Some(&Value::Integer(17)));
        assert_eq!(run_source("9 / 2.0").last_value(), Some(&Value::Float(4.5)));
        assert_eq!(run_source("5 / 2").last_value(), Some(&Value::Integer(2)));
    }

    #[test]
    fn scoping_and_shadowing() {
        let interp = run_source("var x = 1; { var x = 2; print x } print x");
        assert_eq!(output(&interp), "2\n1\n");
    }

    #[test]
    fn control_flow() {
        let interp = run_source("var x = 0; while (x < 5) { x = x + 1 } if (x == 5) print \"done\" else print \"no\"");
        assert_eq!(output(&interp), "done\n");
        assert_eq!(interp.global("x"), Some(&Value::Integer(5)));
    }

    #[test]
    fn short_circuit_values() {
        assert_eq!(run_source("nil or 3").last_value(), Some(&Value::Integer(3)));
        assert_eq!(run_source("false and 1 / 0").last_value(), Some(&Value::Bool(false)));
    }

    #[test]
    fn name_errors() {
        assert!(matches!(run_error("print y"), RuntimeError::UndefinedVariable { .. }));
        assert!(matches!(run_error("var a; print a"), RuntimeError::UninitializedVariable { .. }));
        assert!(matches!(run_error("var a = 1; var a = 2"), RuntimeError::Redefinition { .. }));
        assert!(matches!(run_error("y = 1"), RuntimeError::UndefinedVariable { .. }));
        assert!(matches!(run_error("1 = 1"), RuntimeError::InvalidAssignmentTarget));
    }

    #[test]
    fn globals_persist_between_runs() {
        let mut interp = interpreter();
        interp.run(&parse_source("var a = 4").unwrap()).unwrap();
        interp.run(&parse_source("a * 2").unwrap()).unwrap();
        assert_eq!(interp.last_value(), Some(&Value::Integer(8)));
    }

    #[test]
    fn error_inside_block_drops_local_scopes() {
        let mut interp = interpreter();
        assert!(interp.run(&parse_source("{ var t = 1; print 1 / 0 }").unwrap()).is_err());
        // `t` is gone, so a global of the same name can be declared
        interp.run(&parse_source("var t = 2; t").unwrap()).unwrap();
        assert_eq!(interp.last_value(), Some(&Value::Integer(2)));
    }
}
