pub mod bytecode_error;
pub mod compile;
pub mod compile_error;
pub mod disasm;
pub mod ir;
pub mod op;
pub mod verify;

pub use ir::Bytecode;
pub use op::Opcode;
