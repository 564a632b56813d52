use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::{
    bytecode::{
        Bytecode,
        bytecode_error::BytecodeError,
        compile_error::{CompileError, CompileErrors, SemanticError},
        op::{Opcode, assemble},
    },
    lang::{
        node::{BinaryOp, Expr, LogicalOp, Stmt, UnaryOp},
        program::Program,
        value::Value,
    },
};

const MAX_INDEX: usize = u16::MAX as usize;

/// A local variable living in a VM stack slot.
#[derive(Debug, Clone)]
struct Local {
    name: String,
    depth: usize,
    initialized: bool,
    /// Absolute operand-stack position holding the variable's value.
    slot: usize,
}

/// Compiler state captured before each top-level statement, so a failing
/// statement leaves no trace in the output.
struct Checkpoint {
    instructions: usize,
    constants: usize,
    names: usize,
    locals: usize,
    scope_depth: usize,
    held: usize,
    initialized_globals: HashSet<usize>,
}

/// Compiles statement trees into a single growing `Bytecode`.
///
/// One instance can be fed several programs in a row (the REPL does this):
/// globals, the constant pool and the instruction stream persist, and the
/// trailing END of the previous unit is replaced by the new code.
pub struct Compiler {
    /// Output bytecode program
    bytecode: Bytecode,

    /// Live locals, innermost last
    locals: Vec<Local>,

    /// 0 = global scope
    scope_depth: usize,

    /// Values the enclosing `if`/`while` conditions keep on the stack while
    /// their bodies run. Locals declared inside sit above them.
    held: usize,

    /// Global name -> index into `bytecode.names`
    globals: HashMap<String, usize>,

    /// Globals that have been given a value
    initialized_globals: HashSet<usize>,

    /// Offset of the END emitted by the last `compile` call
    end_offset: Option<usize>,

    /// Source line of the node being compiled, for error messages
    line: usize,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            bytecode: Bytecode::new(),
            locals: Vec::new(),
            scope_depth: 0,
            held: 0,
            globals: HashMap::new(),
            initialized_globals: HashSet::new(),
            end_offset: None,
            line: 1,
        }
    }

    pub fn bytecode(&self) -> &Bytecode {
        &self.bytecode
    }

    pub fn into_bytecode(self) -> Bytecode {
        self.bytecode
    }

    /// Compile a whole program with a fresh compiler.
    pub fn compile_program(mut self, program: &Program) -> Result<Bytecode, CompileErrors> {
        self.compile(program)?;
        Ok(self.bytecode)
    }

    /// Compile `program` onto the bytecode built so far.
    ///
    /// Statements are compiled one at a time. A statement that fails is rolled
    /// back completely and compilation continues with the next one; all
    /// failures are returned together. The stream always ends with END, so
    /// the successfully compiled statements can still run.
    pub fn compile(&mut self, program: &Program) -> Result<(), CompileErrors> {
        self.drop_trailing_end();

        let mut errors = Vec::new();
        let last = program.statements.len().checked_sub(1);

        for (i, stmt) in program.statements.iter().enumerate() {
            // The value of a trailing expression statement is the unit's result.
            let keep_value = Some(i) == last && matches!(stmt, Stmt::Expression(_));
            let checkpoint = self.checkpoint();
            let start = self.bytecode.instructions.len();

            match self.compile_top_level(stmt, keep_value) {
                Ok(()) => debug!(
                    statement = i,
                    bytes = self.bytecode.instructions.len() - start,
                    "compiled statement"
                ),
                Err(err) => {
                    warn!(statement = i, error = %err, "statement rolled back");
                    self.rollback(checkpoint);
                    errors.push(err);
                }
            }
        }

        self.end_offset = Some(self.here());
        if let Err(err) = self.emit(Opcode::End, &[]) {
            errors.push(err);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(CompileErrors(errors))
        }
    }

    fn drop_trailing_end(&mut self) {
        if let Some(offset) = self.end_offset.take() {
            let code = &mut self.bytecode.instructions;
            if offset + 1 == code.len() && code[offset] == Opcode::End as u8 {
                code.truncate(offset);
            }
        }
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            instructions: self.bytecode.instructions.len(),
            constants: self.bytecode.constants.len(),
            names: self.bytecode.names.len(),
            locals: self.locals.len(),
            scope_depth: self.scope_depth,
            held: self.held,
            initialized_globals: self.initialized_globals.clone(),
        }
    }

    fn rollback(&mut self, checkpoint: Checkpoint) {
        self.bytecode.instructions.truncate(checkpoint.instructions);
        self.bytecode.constants.truncate(checkpoint.constants);
        for name in self.bytecode.names.drain(checkpoint.names..) {
            self.globals.remove(&name);
        }
        self.locals.truncate(checkpoint.locals);
        self.scope_depth = checkpoint.scope_depth;
        self.held = checkpoint.held;
        self.initialized_globals = checkpoint.initialized_globals;
    }

    fn error(&self, error: SemanticError) -> CompileError {
        CompileError::semantic(error, self.line)
    }

    // =========================================================================
    // Emission
    // =========================================================================

    fn here(&self) -> usize {
        self.bytecode.instructions.len()
    }

    /// Append one instruction, returning its offset.
    fn emit(&mut self, op: Opcode, operands: &[usize]) -> Result<usize, CompileError> {
        let position = self.here();
        let bytes = assemble(op, operands)?;
        self.bytecode.instructions.extend(bytes);
        Ok(position)
    }

    fn emit_constant(&mut self, value: Value) -> Result<(), CompileError> {
        let index = self.bytecode.constants.len();
        if index > MAX_INDEX {
            return Err(CompileError::Limit(SemanticError::TooManyConstants));
        }
        self.bytecode.constants.push(value);
        self.emit(Opcode::Constant, &[index])?;
        Ok(())
    }

    fn add_name(&mut self, name: &str) -> Result<usize, CompileError> {
        let index = self.bytecode.names.len();
        if index > MAX_INDEX {
            return Err(CompileError::Limit(SemanticError::TooManyNames));
        }
        self.bytecode.names.push(name.to_string());
        self.globals.insert(name.to_string(), index);
        Ok(index)
    }

    /// Emit a jump with a zero placeholder target, returning its offset.
    fn emit_jump(&mut self, op: Opcode) -> Result<usize, CompileError> {
        self.emit(op, &[0])
    }

    fn jump_target(target: usize) -> Result<usize, CompileError> {
        if target > MAX_INDEX {
            return Err(CompileError::Limit(SemanticError::JumpTooFar { target }));
        }
        Ok(target)
    }

    /// Overwrite the operand of the jump at `position` with `target`.
    fn patch_jump(&mut self, position: usize, target: usize) -> Result<(), CompileError> {
        let target = Self::jump_target(target)?;
        let code = &mut self.bytecode.instructions;

        let is_jump = code
            .get(position)
            .and_then(|byte| Opcode::try_from(*byte).ok())
            .is_some_and(Opcode::is_jump);
        if !is_jump || position + 2 >= code.len() {
            return Err(BytecodeError::BadPatch { offset: position }.into());
        }

        code[position + 1] = (target >> 8) as u8;
        code[position + 2] = target as u8;
        Ok(())
    }

    fn patch_jump_here(&mut self, position: usize) -> Result<(), CompileError> {
        let target = self.here();
        self.patch_jump(position, target)
    }

    // =========================================================================
    // Scopes
    // =========================================================================

    fn begin_scope(&mut self) {
        self.scope_depth += 1;
    }

    /// Close the innermost scope and pop its locals off the VM stack.
    fn end_scope(&mut self) -> Result<(), CompileError> {
        self.scope_depth -= 1;

        let mut count = 0;
        while self
            .locals
            .last()
            .is_some_and(|local| local.depth > self.scope_depth)
        {
            self.locals.pop();
            count += 1;
        }

        if count > 0 {
            self.emit(Opcode::ScopeExit, &[count])?;
        }
        Ok(())
    }

    /// Innermost local with this name.
    fn resolve_local(&self, name: &str) -> Option<usize> {
        self.locals.iter().rposition(|local| local.name == name)
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn compile_top_level(&mut self, stmt: &Stmt, keep_value: bool) -> Result<(), CompileError> {
        match stmt {
            Stmt::Expression(expr) if keep_value => self.compile_expr(expr),
            _ => self.compile_stmt(stmt),
        }
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match stmt {
            Stmt::Expression(expr) => {
                self.compile_expr(expr)?;
                self.emit(Opcode::Pop, &[])?;
            }

            Stmt::Print(expr) => {
                self.compile_expr(expr)?;
                self.emit(Opcode::Print, &[])?;
            }

            Stmt::Var {
                name,
                initializer,
                line,
            } => {
                self.line = *line;
                if self.scope_depth == 0 {
                    self.declare_global(name, initializer.as_ref())?;
                } else {
                    self.declare_local(name, initializer.as_ref())?;
                }
            }

            Stmt::Block(statements) => {
                self.begin_scope();
                for stmt in statements {
                    self.compile_stmt(stmt)?;
                }
                self.end_scope()?;
            }

            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => self.compile_if(condition, then_branch, else_branch.as_deref())?,

            Stmt::While { condition, body } => self.compile_while(condition, body)?,
        }

        Ok(())
    }

    fn declare_global(&mut self, name: &str, initializer: Option<&Expr>) -> Result<(), CompileError> {
        if self.globals.contains_key(name) {
            return Err(self.error(SemanticError::Redefinition {
                name: name.to_string(),
            }));
        }

        let index = self.add_name(name)?;
        if let Some(initializer) = initializer {
            self.compile_expr(initializer)?;
            self.emit(Opcode::SetGlobal, &[index])?;
            self.emit(Opcode::Pop, &[])?;
            self.initialized_globals.insert(index);
        }
        Ok(())
    }

    fn declare_local(&mut self, name: &str, initializer: Option<&Expr>) -> Result<(), CompileError> {
        for local in self.locals.iter().rev() {
            if local.depth < self.scope_depth {
                break;
            }
            if local.name == name {
                return Err(self.error(SemanticError::Redefinition {
                    name: name.to_string(),
                }));
            }
        }

        // The initializer's value (or nil) becomes the variable's stack slot.
        match initializer {
            Some(expr) => self.compile_expr(expr)?,
            None => self.emit_constant(Value::Nil)?,
        }

        let slot = self.locals.len() + self.held;
        if slot > MAX_INDEX {
            return Err(CompileError::Limit(SemanticError::TooManyLocals));
        }

        self.locals.push(Local {
            name: name.to_string(),
            depth: self.scope_depth,
            initialized: initializer.is_some(),
            slot,
        });
        self.emit(Opcode::SetLocal, &[slot])?;
        Ok(())
    }

    /// ```text
    ///   <condition>
    ///   JUMP_IF_FALSE else      ; condition stays on the stack
    ///   <then>
    ///   JUMP end                ; only with an else branch
    /// else:
    ///   <else>
    /// end:
    ///   POP                     ; discard the condition
    /// ```
    fn compile_if(
        &mut self,
        condition: &Expr,
        then_branch: &Stmt,
        else_branch: Option<&Stmt>,
    ) -> Result<(), CompileError> {
        self.compile_expr(condition)?;
        let jump_if_false = self.emit_jump(Opcode::JumpIfFalse)?;

        self.held += 1;
        self.compile_stmt(then_branch)?;

        match else_branch {
            Some(else_branch) => {
                let jump = self.emit_jump(Opcode::Jump)?;
                self.patch_jump_here(jump_if_false)?;
                self.compile_stmt(else_branch)?;
                self.patch_jump_here(jump)?;
            }
            None => self.patch_jump_here(jump_if_false)?,
        }
        self.held -= 1;

        self.emit(Opcode::Pop, &[])?;
        Ok(())
    }

    /// ```text
    /// start:
    ///   <condition>
    ///   JUMP_IF_FALSE exit
    ///   <body>
    ///   POP                     ; discard the condition before re-testing
    ///   JUMP start
    /// exit:
    ///   POP
    /// ```
    fn compile_while(&mut self, condition: &Expr, body: &Stmt) -> Result<(), CompileError> {
        let loop_start = Self::jump_target(self.here())?;

        self.compile_expr(condition)?;
        let exit_jump = self.emit_jump(Opcode::JumpIfFalse)?;

        self.held += 1;
        self.compile_stmt(body)?;
        self.held -= 1;

        self.emit(Opcode::Pop, &[])?;
        self.emit(Opcode::Jump, &[loop_start])?;
        self.patch_jump_here(exit_jump)?;
        self.emit(Opcode::Pop, &[])?;
        Ok(())
    }

    // =========================================================================
    // Expressions: each leaves exactly one value on the stack
    // =========================================================================

    fn compile_expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            Expr::Literal(value) => self.emit_constant(value.clone())?,

            Expr::Binary { left, op, right } => {
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                self.emit(binary_opcode(*op), &[])?;
            }

            Expr::Unary { op, operand } => {
                self.compile_expr(operand)?;
                let opcode = match op {
                    UnaryOp::Negate => Opcode::Negate,
                    UnaryOp::Not => Opcode::Not,
                };
                self.emit(opcode, &[])?;
            }

            Expr::Grouping(inner) => self.compile_expr(inner)?,

            Expr::Variable { name, line } => {
                self.line = *line;
                self.compile_variable(name)?;
            }

            Expr::Assign {
                target,
                value,
                line,
            } => self.compile_assign(target, value, *line)?,

            Expr::Logical { left, op, right } => match op {
                LogicalOp::And => self.compile_and(left, right)?,
                LogicalOp::Or => self.compile_or(left, right)?,
            },
        }

        Ok(())
    }

    fn compile_variable(&mut self, name: &str) -> Result<(), CompileError> {
        if let Some(index) = self.resolve_local(name) {
            let local = &self.locals[index];
            if !local.initialized {
                return Err(self.error(SemanticError::Uninitialized {
                    name: name.to_string(),
                }));
            }
            let slot = local.slot;
            self.emit(Opcode::GetLocal, &[slot])?;
            return Ok(());
        }

        let index = *self.globals.get(name).ok_or_else(|| {
            self.error(SemanticError::UndefinedName {
                name: name.to_string(),
            })
        })?;
        if !self.initialized_globals.contains(&index) {
            return Err(self.error(SemanticError::Uninitialized {
                name: name.to_string(),
            }));
        }
        self.emit(Opcode::GetGlobal, &[index])?;
        Ok(())
    }

    fn compile_assign(&mut self, target: &Expr, value: &Expr, line: usize) -> Result<(), CompileError> {
        self.line = line;
        let Expr::Variable { name, .. } = target else {
            return Err(self.error(SemanticError::InvalidAssignmentTarget));
        };

        self.compile_expr(value)?;
        self.line = line;

        if let Some(index) = self.resolve_local(name) {
            let slot = self.locals[index].slot;
            self.emit(Opcode::SetLocal, &[slot])?;
            self.locals[index].initialized = true;
        } else if let Some(&index) = self.globals.get(name) {
            self.emit(Opcode::SetGlobal, &[index])?;
            self.initialized_globals.insert(index);
        } else {
            return Err(self.error(SemanticError::UndefinedName {
                name: name.clone(),
            }));
        }
        Ok(())
    }

    /// ```text
    ///   <left>
    ///   JUMP_IF_FALSE end       ; falsy left is the result
    ///   POP
    ///   <right>
    /// end:
    /// ```
    fn compile_and(&mut self, left: &Expr, right: &Expr) -> Result<(), CompileError> {
        self.compile_expr(left)?;
        let end_jump = self.emit_jump(Opcode::JumpIfFalse)?;
        self.emit(Opcode::Pop, &[])?;
        self.compile_expr(right)?;
        self.patch_jump_here(end_jump)
    }

    /// ```text
    ///   <left>
    ///   JUMP_IF_FALSE right
    ///   JUMP end                ; truthy left is the result
    /// right:
    ///   POP
    ///   <right>
    /// end:
    /// ```
    fn compile_or(&mut self, left: &Expr, right: &Expr) -> Result<(), CompileError> {
        self.compile_expr(left)?;
        let else_jump = self.emit_jump(Opcode::JumpIfFalse)?;
        let end_jump = self.emit_jump(Opcode::Jump)?;
        self.patch_jump_here(else_jump)?;
        self.emit(Opcode::Pop, &[])?;
        self.compile_expr(right)?;
        self.patch_jump_here(end_jump)
    }
}

fn binary_opcode(op: BinaryOp) -> Opcode {
    match op {
        BinaryOp::Add => Opcode::Add,
        BinaryOp::Subtract => Opcode::Subtract,
        BinaryOp::Multiply => Opcode::Multiply,
        BinaryOp::Divide => Opcode::Divide,
        BinaryOp::Equal => Opcode::Equality,
        BinaryOp::NotEqual => Opcode::NotEqual,
        BinaryOp::Greater => Opcode::Larger,
        BinaryOp::GreaterEqual => Opcode::LargerEqual,
        BinaryOp::Less => Opcode::Less,
        BinaryOp::LessEqual => Opcode::LessEqual,
    }
}
