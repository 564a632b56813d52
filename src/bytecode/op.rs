use crate::bytecode::bytecode_error::BytecodeError;

// =============================================================================
// OPCODE - one byte per instruction, operands follow big-endian
// =============================================================================

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // literals
    /// u16 index into the constant pool.
    Constant = 0x01,

    // arithmetic
    Add = 0x10,
    Subtract = 0x11,
    Multiply = 0x12,
    Divide = 0x13,
    Negate = 0x14,

    // logic
    Not = 0x20,
    /// Pop two values, push the conjunction of their truthiness.
    And = 0x21,
    /// Pop two values, push the disjunction of their truthiness.
    Or = 0x22,

    // comparison
    Equality = 0x30,
    NotEqual = 0x31,
    Larger = 0x32,
    Less = 0x33,
    LargerEqual = 0x34,
    LessEqual = 0x35,

    // variables
    /// u16 index into the name pool. Pushes the global's value.
    GetGlobal = 0x40,
    /// u16 index into the name pool. Stores the top value, leaves it on the stack.
    SetGlobal = 0x41,
    /// u16 index into the name pool. Pops the top value into the global.
    DefineGlobal = 0x42,
    /// u16 absolute stack slot. Pushes the slot's value.
    GetLocal = 0x43,
    /// u16 absolute stack slot. Stores the top value, leaves it on the stack.
    SetLocal = 0x44,
    /// u16 count of locals to pop when a block ends.
    ScopeExit = 0x45,

    // ==========================================================================
    // Jumps: the operand is an absolute byte offset into the instruction stream
    // ==========================================================================
    /// Unconditional jump.
    Jump = 0x50,

    /// Jump if the top value is falsy. The value stays on the stack; the
    /// compiler discards it with an explicit POP.
    JumpIfFalse = 0x51,

    // I/O and stack
    Print = 0x60,
    Pop = 0x61,

    End = 0xFF,
}

/// Static description of an opcode: its printable name and operand widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Definition {
    pub name: &'static str,
    pub operand_widths: &'static [usize],
}

impl Definition {
    /// Total size of the instruction in bytes, opcode included.
    pub fn instruction_len(&self) -> usize {
        1 + self.operand_widths.iter().sum::<usize>()
    }

    pub fn operand_bytes(&self) -> usize {
        self.operand_widths.iter().sum()
    }
}

const NONE: &[usize] = &[];
const U16: &[usize] = &[2];

impl Opcode {
    pub const ALL: [Opcode; 26] = [
        Opcode::Constant,
        Opcode::Add,
        Opcode::Subtract,
        Opcode::Multiply,
        Opcode::Divide,
        Opcode::Negate,
        Opcode::Not,
        Opcode::And,
        Opcode::Or,
        Opcode::Equality,
        Opcode::NotEqual,
        Opcode::Larger,
        Opcode::Less,
        Opcode::LargerEqual,
        Opcode::LessEqual,
        Opcode::GetGlobal,
        Opcode::SetGlobal,
        Opcode::DefineGlobal,
        Opcode::GetLocal,
        Opcode::SetLocal,
        Opcode::ScopeExit,
        Opcode::Jump,
        Opcode::JumpIfFalse,
        Opcode::Print,
        Opcode::Pop,
        Opcode::End,
    ];

    pub fn definition(self) -> Definition {
        let (name, operand_widths) = match self {
            Opcode::Constant => ("CONSTANT", U16),
            Opcode::Add => ("ADD", NONE),
            Opcode::Subtract => ("SUBTRACT", NONE),
            Opcode::Multiply => ("MULTIPLY", NONE),
            Opcode::Divide => ("DIVIDE", NONE),
            Opcode::Negate => ("NEGATE", NONE),
            Opcode::Not => ("NOT", NONE),
            Opcode::And => ("AND", NONE),
            Opcode::Or => ("OR", NONE),
            Opcode::Equality => ("EQUALITY", NONE),
            Opcode::NotEqual => ("NOT_EQUAL", NONE),
            Opcode::Larger => ("LARGER", NONE),
            Opcode::Less => ("LESS", NONE),
            Opcode::LargerEqual => ("LARGER_EQUAL", NONE),
            Opcode::LessEqual => ("LESS_EQUAL", NONE),
            Opcode::GetGlobal => ("GET_GLOBAL", U16),
            Opcode::SetGlobal => ("SET_GLOBAL", U16),
            Opcode::DefineGlobal => ("DEFINE_GLOBAL", U16),
            Opcode::GetLocal => ("GET_LOCAL", U16),
            Opcode::SetLocal => ("SET_LOCAL", U16),
            Opcode::ScopeExit => ("SCOPE_EXIT", U16),
            Opcode::Jump => ("JUMP", U16),
            Opcode::JumpIfFalse => ("JUMP_IF_FALSE", U16),
            Opcode::Print => ("PRINT", NONE),
            Opcode::Pop => ("POP", NONE),
            Opcode::End => ("END", NONE),
        };
        Definition {
            name,
            operand_widths,
        }
    }

    pub fn name(self) -> &'static str {
        self.definition().name
    }

    pub fn is_jump(self) -> bool {
        matches!(self, Opcode::Jump | Opcode::JumpIfFalse)
    }

    /// Opcodes whose operand indexes the name pool.
    pub fn uses_name(self) -> bool {
        matches!(
            self,
            Opcode::GetGlobal | Opcode::SetGlobal | Opcode::DefineGlobal
        )
    }
}

impl TryFrom<u8> for Opcode {
    type Error = BytecodeError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Opcode::ALL
            .iter()
            .copied()
            .find(|op| *op as u8 == byte)
            .ok_or(BytecodeError::UnknownOpcode { opcode: byte })
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Encode one instruction: `[opcode, operand bytes...]`.
///
/// The operand count must match the opcode's arity and every operand must fit
/// its declared width.
pub fn assemble(op: Opcode, operands: &[usize]) -> Result<Vec<u8>, BytecodeError> {
    let def = op.definition();
    if operands.len() != def.operand_widths.len() {
        return Err(BytecodeError::OperandCount {
            name: def.name,
            expected: def.operand_widths.len(),
            got: operands.len(),
        });
    }

    let mut bytes = Vec::with_capacity(def.instruction_len());
    bytes.push(op as u8);

    for (&value, &width) in operands.iter().zip(def.operand_widths) {
        if width < std::mem::size_of::<usize>() && value >> (width * 8) != 0 {
            return Err(BytecodeError::OperandOverflow {
                name: def.name,
                value,
                width,
            });
        }
        for shift in (0..width).rev() {
            bytes.push((value >> (shift * 8)) as u8);
        }
    }

    Ok(bytes)
}

/// Decode the operands of the instruction starting at `offset`.
///
/// Returns the opcode, its operands, and the total instruction length.
pub fn read_instruction(
    code: &[u8],
    offset: usize,
) -> Result<(Opcode, Vec<usize>, usize), BytecodeError> {
    let byte = *code.get(offset).ok_or(BytecodeError::Empty)?;
    let op = Opcode::try_from(byte)?;
    let def = op.definition();

    let mut operands = Vec::with_capacity(def.operand_widths.len());
    let mut cursor = offset + 1;
    for &width in def.operand_widths {
        let bytes = code
            .get(cursor..cursor + width)
            .ok_or(BytecodeError::Truncated {
                name: def.name,
                offset,
            })?;
        operands.push(read_be(bytes));
        cursor += width;
    }

    Ok((op, operands, def.instruction_len()))
}

/// One decoded instruction and where it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub offset: usize,
    pub op: Opcode,
    pub operands: Vec<usize>,
}

impl Instruction {
    /// First operand, for the single-operand opcodes.
    pub fn operand(&self) -> Option<usize> {
        self.operands.first().copied()
    }
}

/// Decode a whole instruction stream.
pub fn decode(code: &[u8]) -> Result<Vec<Instruction>, BytecodeError> {
    let mut instructions = Vec::new();
    let mut offset = 0;
    while offset < code.len() {
        let (op, operands, len) = read_instruction(code, offset)?;
        instructions.push(Instruction {
            offset,
            op,
            operands,
        });
        offset += len;
    }
    Ok(instructions)
}

/// Big-endian unsigned read.
pub fn read_be(bytes: &[u8]) -> usize {
    bytes.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize)
}

/// Big-endian u16 read at `offset`, if the bytes exist.
pub fn read_u16(code: &[u8], offset: usize) -> Option<usize> {
    let hi = *code.get(offset)? as usize;
    let lo = *code.get(offset + 1)? as usize;
    Some((hi << 8) | lo)
}
