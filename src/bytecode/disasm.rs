use std::collections::{BTreeSet, HashMap};

use crate::bytecode::Bytecode;
use crate::bytecode::bytecode_error::BytecodeError;
use crate::bytecode::op::{Instruction, Opcode, decode, read_instruction};
use crate::lang::value::Value;

// =============================================================================
// Line format
// =============================================================================

/// Describe the single instruction at the start of `bytes`.
///
/// `constants` is only consulted for CONSTANT, whose line also shows the
/// literal it loads.
pub fn disassemble_instruction(bytes: &[u8], constants: &[Value]) -> Result<String, BytecodeError> {
    let (op, operands, _) = read_instruction(bytes, 0)?;
    let def = op.definition();

    let operand = match operands.first() {
        Some(value) => value.to_string(),
        None => "None".to_string(),
    };

    let mut line = format!(
        "opcode: {}, operand: {}, operand widths: {} bytes",
        def.name,
        operand,
        def.operand_bytes()
    );

    if op == Opcode::Constant {
        let index = operands.first().copied().unwrap_or_default();
        let value = constants
            .get(index)
            .ok_or(BytecodeError::ConstantOutOfRange {
                index,
                len: constants.len(),
            })?;
        line.push_str(&format!(", value: {}", value.repr()));
    }

    Ok(line)
}

/// One line per instruction, up to and including the first END.
pub fn disassemble(bytecode: &Bytecode) -> Result<String, BytecodeError> {
    let mut output = String::new();
    let mut offset = 0;

    while offset < bytecode.instructions.len() {
        let bytes = &bytecode.instructions[offset..];
        output.push_str(&disassemble_instruction(bytes, &bytecode.constants)?);
        output.push('\n');

        let (op, _, len) = read_instruction(bytes, 0)?;
        if op == Opcode::End {
            break;
        }
        offset += len;
    }

    Ok(output)
}

// =============================================================================
// Annotated listing
// =============================================================================

/// Print the annotated listing of a bytecode program
pub fn print_bc(bytecode: &Bytecode) -> Result<(), BytecodeError> {
    println!("=== BYTECODE PROGRAM ===\n");
    print!("{}", listing(bytecode)?);
    println!();
    Ok(())
}

/// Render the listing: byte offsets, jump-target markers, and the literal or
/// global name each operand refers to.
pub fn listing(bytecode: &Bytecode) -> Result<String, BytecodeError> {
    let instructions = decode(&bytecode.instructions)?;
    let jump_targets = collect_jump_targets(&instructions);

    let mut output = String::new();
    output.push_str("════════════════════════════════════════\n");
    output.push_str(" main\n");
    output.push_str(&format!(
        " {} instructions, {} constants, {} names\n",
        instructions.len(),
        bytecode.constants.len(),
        bytecode.names.len()
    ));
    output.push_str("════════════════════════════════════════\n");

    for instruction in &instructions {
        let is_target = jump_targets.contains(&instruction.offset);
        if is_target {
            output.push_str("      ┌──────────────────────────────────\n");
        }

        output.push_str(&format!("{:04} ", instruction.offset));
        output.push_str(if is_target { "► " } else { "  " });
        output.push_str(&format_instruction(instruction, bytecode));
        output.push('\n');
    }

    Ok(output)
}

fn collect_jump_targets(instructions: &[Instruction]) -> BTreeSet<usize> {
    instructions
        .iter()
        .filter(|i| i.op.is_jump())
        .filter_map(Instruction::operand)
        .collect()
}

fn format_instruction(instruction: &Instruction, bytecode: &Bytecode) -> String {
    let name = instruction.op.name();
    let Some(operand) = instruction.operand() else {
        return name.to_string();
    };

    match instruction.op {
        Opcode::Constant => {
            let value = bytecode
                .constants
                .get(operand)
                .map(Value::repr)
                .unwrap_or_else(|| "<out of range>".to_string());
            format!("{:<14}{:>5}  ; {}", name, operand, value)
        }
        Opcode::GetGlobal | Opcode::SetGlobal | Opcode::DefineGlobal => {
            let global = bytecode
                .names
                .get(operand)
                .map(String::as_str)
                .unwrap_or("<out of range>");
            format!("{:<14}{:>5}  ; {}", name, operand, global)
        }
        Opcode::Jump | Opcode::JumpIfFalse => {
            let direction = if operand <= instruction.offset { "↑" } else { "↓" };
            format!("{:<14}{:>5}  {} (→ {:04})", name, operand, direction, operand)
        }
        Opcode::GetLocal | Opcode::SetLocal => {
            format!("{:<14}{:>5}  ; slot", name, operand)
        }
        Opcode::ScopeExit => format!("{:<14}{:>5}  ; pop locals", name, operand),
        _ => format!("{:<14}{:>5}", name, operand),
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Size and opcode frequency of a bytecode program.
#[derive(Debug, Clone, PartialEq)]
pub struct BytecodeStats {
    pub instructions: usize,
    pub bytes: usize,
    pub constants: usize,
    pub names: usize,
    /// Most frequent first; ties by name.
    pub op_counts: Vec<(&'static str, usize)>,
}

pub fn stats(bytecode: &Bytecode) -> Result<BytecodeStats, BytecodeError> {
    let instructions = decode(&bytecode.instructions)?;

    let mut counts: HashMap<&'static str, usize> = HashMap::new();
    for instruction in &instructions {
        *counts.entry(instruction.op.name()).or_insert(0) += 1;
    }

    let mut op_counts: Vec<_> = counts.into_iter().collect();
    op_counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

    Ok(BytecodeStats {
        instructions: instructions.len(),
        bytes: bytecode.instructions.len(),
        constants: bytecode.constants.len(),
        names: bytecode.names.len(),
        op_counts,
    })
}

/// Print bytecode statistics
pub fn print_bc_stats(bytecode: &Bytecode) -> Result<(), BytecodeError> {
    let stats = stats(bytecode)?;

    println!("=== BYTECODE STATISTICS ===\n");
    println!("Instructions:     {}", stats.instructions);
    println!("Bytes:            {}", stats.bytes);
    println!("Constants:        {}", stats.constants);
    println!("Global names:     {}", stats.names);
    println!();

    println!("Op frequency:");
    for (op, count) in stats.op_counts.iter().take(10) {
        let pct = (*count as f64 / stats.instructions.max(1) as f64) * 100.0;
        println!("  {:<14} {:>4} ({:>5.1}%)", op, count, pct);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::op::assemble;
    use pretty_assertions::assert_eq;

    fn program() -> Bytecode {
        // var a = 5; if (a) print "yes"
        Bytecode::from_ops(&[
            (Opcode::Constant, &[0]),
            (Opcode::SetGlobal, &[0]),
            (Opcode::Pop, &[]),
            (Opcode::GetGlobal, &[0]),
            (Opcode::JumpIfFalse, &[17]),
            (Opcode::Constant, &[1]),
            (Opcode::Print, &[]),
            (Opcode::Pop, &[]),
            (Opcode::End, &[]),
        ])
        .unwrap()
        .with_constants(vec![Value::Integer(5), Value::String("yes".to_string())])
        .with_names(vec!["a".to_string()])
    }

    #[test]
    fn test_constant_line() {
        let bytes = assemble(Opcode::Constant, &[1]).unwrap();
        let constants = vec![Value::Integer(5), Value::Float(2.5)];
        assert_eq!(
            disassemble_instruction(&bytes, &constants).unwrap(),
            "opcode: CONSTANT, operand: 1, operand widths: 2 bytes, value: 2.5"
        );
    }

    #[test]
    fn test_zero_operand_line() {
        let bytes = assemble(Opcode::Add, &[]).unwrap();
        assert_eq!(
            disassemble_instruction(&bytes, &[]).unwrap(),
            "opcode: ADD, operand: None, operand widths: 0 bytes"
        );
    }

    #[test]
    fn test_string_constant_is_quoted() {
        let bytes = assemble(Opcode::Constant, &[0]).unwrap();
        let line = disassemble_instruction(&bytes, &[Value::String("hi".to_string())]).unwrap();
        assert!(line.ends_with("value: \"hi\""), "{}", line);
    }

    #[test]
    fn test_unknown_opcode_fails() {
        assert_eq!(
            disassemble_instruction(&[0xEE], &[]),
            Err(BytecodeError::UnknownOpcode { opcode: 0xEE })
        );
    }

    #[test]
    fn test_constant_out_of_range() {
        let bytes = assemble(Opcode::Constant, &[3]).unwrap();
        assert_eq!(
            disassemble_instruction(&bytes, &[]),
            Err(BytecodeError::ConstantOutOfRange { index: 3, len: 0 })
        );
    }

    #[test]
    fn test_assemble_then_disassemble_reproduces_instruction() {
        let constants: Vec<Value> = (0..4).map(Value::Integer).collect();
        for op in Opcode::ALL {
            let def = op.definition();
            let operands: Vec<usize> = def.operand_widths.iter().map(|_| 3).collect();
            let bytes = assemble(op, &operands).unwrap();
            let line = disassemble_instruction(&bytes, &constants).unwrap();

            let expected_operand = if operands.is_empty() { "None" } else { "3" };
            let prefix = format!(
                "opcode: {}, operand: {}, operand widths: {} bytes",
                def.name,
                expected_operand,
                def.operand_bytes()
            );
            assert!(line.starts_with(&prefix), "{} vs {}", line, prefix);
        }
    }

    #[test]
    fn test_disassemble_stops_at_end() {
        let mut bytecode = Bytecode::from_ops(&[
            (Opcode::Constant, &[0]),
            (Opcode::Print, &[]),
            (Opcode::End, &[]),
        ])
        .unwrap()
        .with_constants(vec![Value::Bool(true)]);
        // Trailing garbage after END is never decoded.
        bytecode.instructions.push(0xEE);

        let text = disassemble(&bytecode).unwrap();
        assert_eq!(
            text,
            "opcode: CONSTANT, operand: 0, operand widths: 2 bytes, value: true\n\
             opcode: PRINT, operand: None, operand widths: 0 bytes\n\
             opcode: END, operand: None, operand widths: 0 bytes\n"
        );
    }

    #[test]
    fn test_listing_marks_jump_targets_and_names() {
        let text = listing(&program()).unwrap();
        assert!(text.contains("9 instructions, 2 constants, 1 names"));
        assert!(text.contains("0003   SET_GLOBAL"));
        assert!(text.contains("; a"));
        assert!(text.contains("; \"yes\""));
        assert!(text.contains("0017 ► POP"));
        assert!(text.contains("(→ 0017)"));
    }

    #[test]
    fn test_stats_counts() {
        let stats = stats(&program()).unwrap();
        assert_eq!(stats.instructions, 9);
        assert_eq!(stats.bytes, 19);
        assert_eq!(stats.constants, 2);
        assert_eq!(stats.names, 1);
        assert_eq!(stats.op_counts[0], ("CONSTANT", 2));
        assert_eq!(stats.op_counts[1], ("POP", 2));
    }
}
