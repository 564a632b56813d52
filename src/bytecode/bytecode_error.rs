use thiserror::Error;

/// Errors raised while encoding, decoding or validating raw bytecode.
///
/// When these come out of instruction assembly during compilation they
/// indicate a bug in the compiler, not a mistake in the user's program.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BytecodeError {
    #[error("unknown opcode 0x{opcode:02x}")]
    UnknownOpcode { opcode: u8 },

    #[error("opcode {name} takes {expected} operand(s), got {got}")]
    OperandCount {
        name: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("operand {value} of {name} does not fit in {width} byte(s)")]
    OperandOverflow {
        name: &'static str,
        value: usize,
        width: usize,
    },

    #[error("truncated {name} instruction at offset {offset}")]
    Truncated { name: &'static str, offset: usize },

    #[error("empty instruction")]
    Empty,

    #[error("constant index {index} out of range (pool has {len})")]
    ConstantOutOfRange { index: usize, len: usize },

    #[error("name index {index} out of range (pool has {len})")]
    NameOutOfRange { index: usize, len: usize },

    #[error("jump at offset {offset} targets {target}, which is not an instruction boundary")]
    BadJumpTarget { offset: usize, target: usize },

    #[error("cannot patch jump at offset {offset}: no jump instruction there")]
    BadPatch { offset: usize },

    #[error("instruction stream does not end with END")]
    MissingEnd,

    #[error("compiled image: {0}")]
    Encoding(String),
}
