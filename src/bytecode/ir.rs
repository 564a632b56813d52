use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::bytecode::bytecode_error::BytecodeError;
use crate::bytecode::op::{Opcode, assemble};
use crate::lang::value::Value;

/// A compiled bytecode program.
///
/// Produced only by the compiler, consumed by the VM, and read by the
/// disassembler and verifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bytecode {
    /// Flat instruction stream: opcode bytes followed by big-endian operands.
    pub instructions: Vec<u8>,

    /// Literal values, indexed by the CONSTANT operand. Never deduplicated.
    pub constants: Vec<Value>,

    /// Global variable names, indexed by the GET/SET/DEFINE_GLOBAL operand.
    pub names: Vec<String>,
}

impl Bytecode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an instruction stream from `(opcode, operands)` pairs.
    ///
    /// Mostly useful for tests and hand-written programs.
    pub fn from_ops(ops: &[(Opcode, &[usize])]) -> Result<Self, BytecodeError> {
        let mut bytecode = Self::new();
        for (op, operands) in ops {
            bytecode.instructions.extend(assemble(*op, operands)?);
        }
        Ok(bytecode)
    }

    pub fn with_constants(mut self, constants: Vec<Value>) -> Self {
        self.constants = constants;
        self
    }

    pub fn with_names(mut self, names: Vec<String>) -> Self {
        self.names = names;
        self
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Hex dump of the instruction stream, one contiguous lowercase string.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.instructions)
    }

    pub fn write_hex(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.to_hex())
    }

    /// Encode the whole artifact (instructions and both pools) as a compiled image.
    pub fn to_bytes(&self) -> Result<Vec<u8>, BytecodeError> {
        postcard::to_allocvec(self).map_err(|e| BytecodeError::Encoding(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BytecodeError> {
        postcard::from_bytes(bytes).map_err(|e| BytecodeError::Encoding(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Bytecode {
        Bytecode::from_ops(&[
            (Opcode::Constant, &[0]),
            (Opcode::SetGlobal, &[0]),
            (Opcode::Pop, &[]),
            (Opcode::End, &[]),
        ])
        .unwrap()
        .with_constants(vec![Value::Float(2.5)])
        .with_names(vec!["ratio".to_string()])
    }

    #[test]
    fn test_hex_dump() {
        assert_eq!(sample().to_hex(), "01000041000061ff");
    }

    #[test]
    fn test_compiled_image_preserves_pools() {
        let bytecode = sample();
        let bytes = bytecode.to_bytes().unwrap();
        assert_eq!(Bytecode::from_bytes(&bytes).unwrap(), bytecode);
    }

    #[test]
    fn test_corrupt_image_is_rejected() {
        let err = Bytecode::from_bytes(&[0xFF, 0xFF, 0xFF]).unwrap_err();
        assert!(matches!(err, BytecodeError::Encoding(_)));
    }

    #[test]
    fn test_write_hex_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.hex");
        sample().write_hex(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "01000041000061ff");
    }
}
