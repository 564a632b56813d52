use std::io::{self, Stdout, Write};

use crate::KilnError;
use crate::bytecode::Bytecode;
use crate::bytecode::compile::Compiler;
use crate::bytecode::compile_error::CompileErrors;
use crate::frontend::parse_source;
use crate::lang::value::Value;
use crate::runtime::vm::{Vm, VmConfig};

/// Result of evaluating one chunk of source in a session.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Evaluation {
    /// Value of a trailing expression statement, if there was one.
    pub value: Option<Value>,
    /// Statements that failed to compile and were skipped.
    pub errors: CompileErrors,
}

/// A compiler and VM pair fed one input at a time, as the REPL does.
///
/// Globals declared by earlier inputs stay visible to later ones.
pub struct Session<W: Write = Stdout> {
    compiler: Compiler,
    vm: Vm<W>,
}

impl Default for Session<Stdout> {
    fn default() -> Self {
        Self::new()
    }
}

impl Session<Stdout> {
    pub fn new() -> Self {
        Self::with_output(io::stdout(), VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        Self::with_output(io::stdout(), config)
    }
}

impl<W: Write> Session<W> {
    pub fn with_output(out: W, config: VmConfig) -> Self {
        Self {
            compiler: Compiler::new(),
            vm: Vm::with_output(out, config),
        }
    }

    /// Compile and run `source`.
    ///
    /// Statements that fail to compile are reported in the evaluation and the
    /// rest still run. Lexer, parser and runtime errors abort the whole input;
    /// a runtime error also carries any compile errors from the same input.
    pub fn eval(&mut self, source: &str) -> Result<Evaluation, KilnError> {
        let program = parse_source(source)?;

        let errors = match self.compiler.compile(&program) {
            Ok(()) => CompileErrors::default(),
            Err(errors) => errors,
        };

        if let Err(runtime) = self.vm.run(self.compiler.bytecode()) {
            return Err(if errors.is_empty() {
                runtime.into()
            } else {
                KilnError::Evaluation {
                    compile: errors,
                    runtime,
                }
            });
        }

        Ok(Evaluation {
            value: self.vm.last_value().cloned(),
            errors,
        })
    }

    /// Everything compiled so far.
    pub fn bytecode(&self) -> &Bytecode {
        self.compiler.bytecode()
    }

    pub fn vm(&self) -> &Vm<W> {
        &self.vm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::runtime_error::RuntimeError;

    fn session() -> Session<Vec<u8>> {
        Session::with_output(Vec::new(), VmConfig::default())
    }

    fn output(session: &Session<Vec<u8>>) -> String {
        String::from_utf8(session.vm().output().clone()).unwrap()
    }

    #[test]
    fn echoes_trailing_expression() {
        let mut session = session();
        let eval = session.eval("1 + 2").unwrap();
        assert_eq!(eval.value, Some(Value::Integer(3)));
        assert!(eval.errors.is_empty());

        let eval = session.eval("print 4").unwrap();
        assert_eq!(eval.value, None);
    }

    #[test]
    fn bindings_persist_across_inputs() {
        let mut session = session();
        session.eval("var a = 2").unwrap();
        session.eval("a = a + 1").unwrap();
        let eval = session.eval("a * 10").unwrap();
        assert_eq!(eval.value, Some(Value::Integer(30)));
    }

    #[test]
    fn good_statements_run_when_others_fail() {
        let mut session = session();
        let eval = session.eval("print 1; print nope; print 2").unwrap();
        assert_eq!(eval.errors.len(), 1);
        assert_eq!(output(&session), "1\n2\n");
    }

    #[test]
    fn parse_error_aborts_input() {
        let mut session = session();
        assert!(matches!(session.eval("print (1"), Err(KilnError::Parser(_))));
        let eval = session.eval("5").unwrap();
        assert_eq!(eval.value, Some(Value::Integer(5)));
    }

    #[test]
    fn runtime_error_keeps_compile_errors() {
        let mut session = session();
        match session.eval("print nope; print 1 / 0") {
            Err(KilnError::Evaluation { compile, runtime }) => {
                assert_eq!(compile.len(), 1);
                assert!(compile.to_string().contains("name 'nope' is not defined"));
                assert!(matches!(runtime, RuntimeError::DivisionByZero));
            }
            other => panic!("expected compile and runtime errors, got {:?}", other),
        }
    }

    #[test]
    fn runtime_error_does_not_poison_session() {
        let mut session = session();
        session.eval("var a = 1").unwrap();
        assert!(matches!(session.eval("a / 0"), Err(KilnError::Runtime(_))));
        let eval = session.eval("a + 1").unwrap();
        assert_eq!(eval.value, Some(Value::Integer(2)));
    }
}
