use std::io::{self, Stdout, Write};

use tracing::{debug, trace};

use crate::bytecode::Bytecode;
use crate::bytecode::bytecode_error::BytecodeError;
use crate::bytecode::op::{Opcode, read_u16};
use crate::bytecode::verify::verify;
use crate::lang::node::BinaryOp;
use crate::lang::value::Value;
use crate::runtime::arith;
use crate::runtime::runtime_error::RuntimeError;

#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Abort after this many dispatched instructions. `None` runs forever.
    pub max_steps: Option<usize>,
    pub max_stack_size: usize,
    /// Check the bytecode before running it.
    pub verify: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            max_steps: None,
            max_stack_size: 10_000,
            verify: true,
        }
    }
}

/// Stack machine executing compiled `Bytecode`.
///
/// Globals and the instruction pointer survive between `run` calls, so a
/// REPL can keep feeding it bytecode from the same compiler: each run picks up
/// at the END where the previous one stopped.
pub struct Vm<W: Write = Stdout> {
    stack: Vec<Value>,
    /// Indexed by name-pool index. `None` until first assigned.
    globals: Vec<Option<Value>>,
    ip: usize,
    /// Offset of the instruction being executed, for error reports.
    current: usize,
    out: W,
    config: VmConfig,
    steps: usize,
}

impl Default for Vm<Stdout> {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm<Stdout> {
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        Self::with_output(io::stdout(), config)
    }
}

impl<W: Write> Vm<W> {
    pub fn with_output(out: W, config: VmConfig) -> Self {
        Self {
            stack: Vec::new(),
            globals: Vec::new(),
            ip: 0,
            current: 0,
            out,
            config,
            steps: 0,
        }
    }

    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    /// Value left on top of the stack by the last run.
    pub fn last_value(&self) -> Option<&Value> {
        self.stack.last()
    }

    pub fn ip(&self) -> usize {
        self.ip
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    pub fn into_output(self) -> W {
        self.out
    }

    /// Current value of the global at `index` in the name pool.
    pub fn global(&self, index: usize) -> Option<&Value> {
        self.globals.get(index).and_then(Option::as_ref)
    }

    pub fn global_named(&self, bytecode: &Bytecode, name: &str) -> Option<&Value> {
        let index = bytecode.names.iter().position(|n| n == name)?;
        self.global(index)
    }

    /// Forget all state, ready for an unrelated program.
    pub fn reset(&mut self) {
        self.stack.clear();
        self.globals.clear();
        self.ip = 0;
        self.current = 0;
        self.steps = 0;
    }

    /// Execute from the current instruction pointer up to the next END.
    ///
    /// On error the VM parks on the program's final END with an empty stack,
    /// so code appended later still runs.
    pub fn run(&mut self, bytecode: &Bytecode) -> Result<(), RuntimeError> {
        if self.config.verify {
            verify(bytecode)?;
        }

        if self.ip >= bytecode.instructions.len() {
            self.ip = 0;
        }
        self.stack.clear();
        self.steps = 0;

        debug!(
            ip = self.ip,
            bytes = bytecode.instructions.len(),
            "vm run start"
        );

        let result = self.execute(bytecode);

        match &result {
            Ok(()) => debug!(steps = self.steps, depth = self.stack.len(), "vm run end"),
            Err(err) => {
                debug!(offset = self.current, error = %err, "vm run failed");
                self.stack.clear();
                self.ip = bytecode.instructions.len().saturating_sub(1);
            }
        }

        result
    }

    // Execution

    fn check_limits(&mut self) -> Result<(), RuntimeError> {
        self.steps += 1;

        if let Some(max) = self.config.max_steps {
            if self.steps > max {
                return Err(RuntimeError::StepLimit { limit: max });
            }
        }

        if self.stack.len() > self.config.max_stack_size {
            return Err(RuntimeError::StackOverflow {
                limit: self.config.max_stack_size,
            });
        }

        Ok(())
    }

    fn execute(&mut self, bytecode: &Bytecode) -> Result<(), RuntimeError> {
        let code = &bytecode.instructions;

        loop {
            self.check_limits()?;

            let offset = self.ip;
            self.current = offset;

            let byte = *code
                .get(offset)
                .ok_or(RuntimeError::Malformed(BytecodeError::MissingEnd))?;
            let op = Opcode::try_from(byte)
                .map_err(|_| RuntimeError::UnknownOpcode { opcode: byte, offset })?;
            let def = op.definition();

            let operand = if def.operand_widths.is_empty() {
                0
            } else {
                read_u16(code, offset + 1).ok_or(BytecodeError::Truncated {
                    name: def.name,
                    offset,
                })?
            };

            trace!(offset, op = def.name, operand, depth = self.stack.len(), "dispatch");
            self.ip = offset + def.instruction_len();

            match op {
                Opcode::End => {
                    self.ip = offset;
                    return Ok(());
                }

                // Literals
                Opcode::Constant => {
                    let value = bytecode.constants.get(operand).cloned().ok_or(
                        BytecodeError::ConstantOutOfRange {
                            index: operand,
                            len: bytecode.constants.len(),
                        },
                    )?;
                    self.push(value);
                }

                // Arithmetic
                Opcode::Add => self.binary(BinaryOp::Add)?,
                Opcode::Subtract => self.binary(BinaryOp::Subtract)?,
                Opcode::Multiply => self.binary(BinaryOp::Multiply)?,
                Opcode::Divide => self.binary(BinaryOp::Divide)?,
                Opcode::Negate => {
                    let value = self.pop()?;
                    self.push(arith::negate(&value)?);
                }

                // Logic
                Opcode::Not => {
                    let value = self.pop()?;
                    self.push(arith::not(&value));
                }
                Opcode::And => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.push(Value::Bool(a.is_truthy() && b.is_truthy()));
                }
                Opcode::Or => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.push(Value::Bool(a.is_truthy() || b.is_truthy()));
                }

                // Comparison
                Opcode::Equality => self.binary(BinaryOp::Equal)?,
                Opcode::NotEqual => self.binary(BinaryOp::NotEqual)?,
                Opcode::Larger => self.binary(BinaryOp::Greater)?,
                Opcode::Less => self.binary(BinaryOp::Less)?,
                Opcode::LargerEqual => self.binary(BinaryOp::GreaterEqual)?,
                Opcode::LessEqual => self.binary(BinaryOp::LessEqual)?,

                // Globals
                Opcode::GetGlobal => {
                    let value = self.global(operand).cloned().unwrap_or(Value::Nil);
                    self.push(value);
                }
                Opcode::SetGlobal => {
                    let value = self.peek()?.clone();
                    self.store_global(operand, value);
                }
                Opcode::DefineGlobal => {
                    let value = self.pop()?;
                    self.store_global(operand, value);
                }

                // Locals: the operand is an absolute stack slot
                Opcode::GetLocal => {
                    let value = self
                        .stack
                        .get(operand)
                        .cloned()
                        .ok_or(RuntimeError::StackUnderflow { offset })?;
                    self.push(value);
                }
                Opcode::SetLocal => {
                    let value = self.peek()?.clone();
                    let slot = self
                        .stack
                        .get_mut(operand)
                        .ok_or(RuntimeError::StackUnderflow { offset })?;
                    *slot = value;
                }
                Opcode::ScopeExit => {
                    let depth = self
                        .stack
                        .len()
                        .checked_sub(operand)
                        .ok_or(RuntimeError::StackUnderflow { offset })?;
                    self.stack.truncate(depth);
                }

                // Jumps
                Opcode::Jump => self.ip = operand,
                Opcode::JumpIfFalse => {
                    if !self.peek()?.is_truthy() {
                        self.ip = operand;
                    }
                }

                // I/O and stack
                Opcode::Print => {
                    let value = self.pop()?;
                    writeln!(self.out, "{}", value)?;
                }
                Opcode::Pop => {
                    self.pop()?;
                }
            }
        }
    }

    fn binary(&mut self, op: BinaryOp) -> Result<(), RuntimeError> {
        let right = self.pop()?;
        let left = self.pop()?;
        self.push(arith::binary(op, &left, &right)?);
        Ok(())
    }

    fn store_global(&mut self, index: usize, value: Value) {
        if index >= self.globals.len() {
            self.globals.resize(index + 1, None);
        }
        self.globals[index] = Some(value);
    }

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack.pop().ok_or(RuntimeError::StackUnderflow {
            offset: self.current,
        })
    }

    fn peek(&self) -> Result<&Value, RuntimeError> {
        self.stack.last().ok_or(RuntimeError::StackUnderflow {
            offset: self.current,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::compile::Compiler;
    use crate::frontend::parse_source;

    // =========================================================================
    // Helpers
    // =========================================================================

    fn compile(source: &str) -> Bytecode {
        let program = parse_source(source).expect("parse");
        Compiler::new().compile_program(&program).expect("compile")
    }

    fn vm() -> Vm<Vec<u8>> {
        Vm::with_output(Vec::new(), VmConfig::default())
    }

    fn run_source(source: &str) -> Vm<Vec<u8>> {
        let bytecode = compile(source);
        let mut vm = vm();
        vm.run(&bytecode).expect("run");
        vm
    }

    fn run_error(source: &str) -> RuntimeError {
        let bytecode = compile(source);
        vm().run(&bytecode).expect_err("expected runtime error")
    }

    fn output(vm: &Vm<Vec<u8>>) -> String {
        String::from_utf8(vm.output().clone()).unwrap()
    }

    fn assert_last(source: &str, expected: Value) {
        let vm = run_source(source);
        assert_eq!(vm.last_value(), Some(&expected), "source: {}", source);
    }

    fn assert_output(source: &str, expected: &str) {
        let vm = run_source(source);
        assert_eq!(output(&vm), expected, "source: {}", source);
    }

    fn int(n: i64) -> Value {
        Value::Integer(n)
    }

    // =========================================================================
    // Arithmetic
    // =========================================================================

    #[test]
    fn arithmetic_add() {
        assert_last("5 + 1", int(6));
    }

    #[test]
    fn arithmetic_precedence() {
        assert_last("5 * 3 + 2", int(17));
        assert_last("5 * (3 + 2)", int(25));
        assert_last("10 - 4 - 3", int(3));
    }

    #[test]
    fn arithmetic_division_kinds() {
        assert_last("5 / 2", int(2));
        assert_last("9 / 2.0", Value::Float(4.5));
    }

    #[test]
    fn arithmetic_negate() {
        assert_last("-(2 + 3)", int(-5));
        assert_last("--4", int(4));
    }

    #[test]
    fn arithmetic_type_error() {
        let err = run_error("\"a\" + 1");
        assert!(matches!(err, RuntimeError::TypeError { operation: "add", .. }));
        assert!(matches!(run_error("true * 2"), RuntimeError::TypeError { .. }));
        assert!(matches!(run_error("-\"x\""), RuntimeError::UnaryTypeError { .. }));
    }

    #[test]
    fn arithmetic_division_by_zero() {
        assert!(matches!(run_error("1 / 0"), RuntimeError::DivisionByZero));
    }

    #[test]
    fn comparison_and_equality() {
        assert_last("1 < 2", Value::Bool(true));
        assert_last("2 <= 1", Value::Bool(false));
        assert_last("2 == 2.0", Value::Bool(true));
        assert_last("\"a\" != \"a\"", Value::Bool(false));
        assert_last("!nil", Value::Bool(true));
    }

    // =========================================================================
    // Logic
    // =========================================================================

    #[test]
    fn logical_operators_yield_deciding_operand() {
        assert_last("1 and 2", int(2));
        assert_last("false and 1", Value::Bool(false));
        assert_last("nil or 3", int(3));
        assert_last("4 or 5", int(4));
    }

    #[test]
    fn logical_operators_short_circuit() {
        assert_last("true or 1 / 0 == 1", Value::Bool(true));
        assert_last("false and 1 / 0 == 1", Value::Bool(false));
    }

    // =========================================================================
    // Variables
    // =========================================================================

    #[test]
    fn globals_persist_in_vm() {
        let bytecode = compile("var a = 2; a = a * 10;");
        let mut vm = vm();
        vm.run(&bytecode).unwrap();
        assert_eq!(vm.global_named(&bytecode, "a"), Some(&int(20)));
        assert!(vm.stack().is_empty());
    }

    #[test]
    fn assignment_is_an_expression() {
        assert_last("var a = 1; a = 7", int(7));
    }

    #[test]
    fn shadowed_locals_print_inner() {
        let vm = run_source("{ var x = 5 { var x = 10; print x } }");
        assert_eq!(output(&vm), "10\n");
        assert!(vm.stack().is_empty());
    }

    #[test]
    fn locals_inside_loops_and_branches() {
        assert_last(
            "var s = 0; var i = 0; while (i < 3) { var d = i * 2; s = s + d; i = i + 1 } s",
            int(6),
        );
        assert_output(
            "var n = 0; while (n < 3) { if (n == 1) { var t = 10; print t } n = n + 1 }",
            "10\n",
        );
    }

    // =========================================================================
    // Control flow
    // =========================================================================

    #[test]
    fn if_else_runs_one_branch() {
        assert_output("if (true) { print 1 } else { print 2 }", "1\n");
        assert_output("if (nil) { print 1 } else { print 2 }", "2\n");
        assert_output("if (false) print 1", "");
    }

    #[test]
    fn while_loop_counts() {
        let bytecode = compile("var x = 0; while (x < 5) { x = x + 1 }");
        let mut vm = vm();
        vm.run(&bytecode).unwrap();
        assert_eq!(vm.global_named(&bytecode, "x"), Some(&int(5)));
        assert!(vm.stack().is_empty());
    }

    #[test]
    fn while_loop_from_one_runs_four_times() {
        let bytecode = compile("var x = 1; var n = 0; while (x < 5) { x = x + 1; n = n + 1 }");
        let mut vm = vm();
        vm.run(&bytecode).unwrap();
        assert_eq!(vm.global_named(&bytecode, "n"), Some(&int(4)));
        assert_eq!(vm.global_named(&bytecode, "x"), Some(&int(5)));
        assert!(vm.stack().is_empty());
    }

    #[test]
    fn print_formats() {
        assert_output("print 5.0; print 4.5; print nil; print \"hi\"; print true", "5\n4.5\nnil\nhi\ntrue\n");
    }

    // =========================================================================
    // Hand-built bytecode
    // =========================================================================

    #[test]
    fn define_global_and_boolean_opcodes() {
        let bytecode = Bytecode::from_ops(&[
            (Opcode::Constant, &[0]),
            (Opcode::DefineGlobal, &[0]),
            (Opcode::GetGlobal, &[0]),
            (Opcode::Constant, &[1]),
            (Opcode::And, &[]),
            (Opcode::End, &[]),
        ])
        .unwrap()
        .with_constants(vec![int(1), Value::Nil])
        .with_names(vec!["g".to_string()]);

        let mut vm = vm();
        vm.run(&bytecode).unwrap();
        assert_eq!(vm.stack(), &[Value::Bool(false)]);
        assert_eq!(vm.global(0), Some(&int(1)));
    }

    #[test]
    fn unset_global_reads_nil() {
        let bytecode = Bytecode::from_ops(&[(Opcode::GetGlobal, &[0]), (Opcode::End, &[])])
            .unwrap()
            .with_names(vec!["g".to_string()]);
        let mut vm = vm();
        vm.run(&bytecode).unwrap();
        assert_eq!(vm.last_value(), Some(&Value::Nil));
    }

    #[test]
    fn unknown_opcode_is_fatal() {
        // 0 CONSTANT 0, 3 POP, 4 <garbage>
        let mut bytecode = Bytecode::from_ops(&[(Opcode::Constant, &[0]), (Opcode::Pop, &[])])
            .unwrap()
            .with_constants(vec![int(1)]);
        bytecode.instructions.push(0xEE);

        let config = VmConfig {
            verify: false,
            ..VmConfig::default()
        };
        let mut vm = Vm::with_output(Vec::new(), config);

        let err = vm.run(&bytecode).unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::UnknownOpcode {
                opcode: 0xEE,
                offset: 4
            }
        ));
    }

    #[test]
    fn verification_rejects_malformed_bytecode() {
        let bytecode = Bytecode::from_ops(&[(Opcode::Constant, &[9]), (Opcode::End, &[])]).unwrap();
        let err = vm().run(&bytecode).unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Malformed(BytecodeError::ConstantOutOfRange { index: 9, .. })
        ));
    }

    #[test]
    fn stack_underflow_without_verification() {
        let bytecode = Bytecode::from_ops(&[(Opcode::Pop, &[]), (Opcode::End, &[])]).unwrap();
        let mut vm = Vm::with_output(
            Vec::new(),
            VmConfig {
                verify: false,
                ..VmConfig::default()
            },
        );
        assert!(matches!(
            vm.run(&bytecode),
            Err(RuntimeError::StackUnderflow { offset: 0 })
        ));
    }

    // =========================================================================
    // Limits
    // =========================================================================

    #[test]
    fn step_limit_stops_infinite_loop() {
        let bytecode = compile("while (true) {}");
        let config = VmConfig {
            max_steps: Some(100),
            ..VmConfig::default()
        };
        let mut vm = Vm::with_output(Vec::new(), config);
        assert!(matches!(
            vm.run(&bytecode),
            Err(RuntimeError::StepLimit { limit: 100 })
        ));
    }

    #[test]
    fn stack_size_limit() {
        let bytecode = compile("{ var a = 1; var b = 2; var c = 3; print c }");
        let config = VmConfig {
            max_stack_size: 2,
            ..VmConfig::default()
        };
        let mut vm = Vm::with_output(Vec::new(), config);
        assert!(matches!(
            vm.run(&bytecode),
            Err(RuntimeError::StackOverflow { limit: 2 })
        ));
    }

    // =========================================================================
    // Incremental runs
    // =========================================================================

    #[test]
    fn resumes_after_previous_end() {
        let mut compiler = Compiler::new();
        let mut vm = vm();

        compiler.compile(&parse_source("var a = 2; print 1").unwrap()).unwrap();
        vm.run(compiler.bytecode()).unwrap();

        compiler.compile(&parse_source("print 2; a * 3").unwrap()).unwrap();
        vm.run(compiler.bytecode()).unwrap();

        assert_eq!(output(&vm), "1\n2\n");
        assert_eq!(vm.last_value(), Some(&int(6)));
    }

    #[test]
    fn resumes_after_runtime_error() {
        let mut compiler = Compiler::new();
        let mut vm = vm();

        compiler.compile(&parse_source("print 1 / 0").unwrap()).unwrap();
        assert!(vm.run(compiler.bytecode()).is_err());
        assert!(vm.stack().is_empty());

        compiler.compile(&parse_source("print 7").unwrap()).unwrap();
        vm.run(compiler.bytecode()).unwrap();
        assert_eq!(output(&vm), "7\n");
    }

    #[test]
    fn reset_forgets_globals() {
        let bytecode = compile("var a = 1");
        let mut vm = vm();
        vm.run(&bytecode).unwrap();
        vm.reset();
        assert_eq!(vm.global(0), None);
        assert_eq!(vm.ip(), 0);
    }
}
