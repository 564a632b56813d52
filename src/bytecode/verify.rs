use std::collections::HashSet;

use crate::bytecode::Bytecode;
use crate::bytecode::bytecode_error::BytecodeError;
use crate::bytecode::op::{Opcode, decode};

/// Check that `bytecode` is safe to hand to the VM.
///
/// Every byte must decode to a known opcode with all of its operand bytes,
/// every pool index must be in range, every jump must land on an instruction
/// boundary, and the last instruction must be END.
///
/// NOTE: this is a linear scan. Stack heights are not tracked across jumps,
/// so underflow is still caught at run time.
pub fn verify(bytecode: &Bytecode) -> Result<(), BytecodeError> {
    let instructions = decode(&bytecode.instructions)?;

    match instructions.last() {
        Some(last) if last.op == Opcode::End => {}
        _ => return Err(BytecodeError::MissingEnd),
    }

    let boundaries: HashSet<usize> = instructions.iter().map(|i| i.offset).collect();

    for instruction in &instructions {
        let Some(operand) = instruction.operand() else {
            continue;
        };

        match instruction.op {
            Opcode::Constant if operand >= bytecode.constants.len() => {
                return Err(BytecodeError::ConstantOutOfRange {
                    index: operand,
                    len: bytecode.constants.len(),
                });
            }
            op if op.uses_name() && operand >= bytecode.names.len() => {
                return Err(BytecodeError::NameOutOfRange {
                    index: operand,
                    len: bytecode.names.len(),
                });
            }
            op if op.is_jump() && !boundaries.contains(&operand) => {
                return Err(BytecodeError::BadJumpTarget {
                    offset: instruction.offset,
                    target: operand,
                });
            }
            _ => {}
        }
    }

    Ok(())
}
