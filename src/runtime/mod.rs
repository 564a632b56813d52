pub mod arith;
pub mod interpreter;
pub mod runtime_error;
pub mod vm;

pub use interpreter::Interpreter;
pub use runtime_error::RuntimeError;
pub use vm::{Vm, VmConfig};
