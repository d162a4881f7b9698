pub mod compile;
pub mod compile_error;
pub mod disasm;
pub mod ir;
pub mod op;
pub mod optimize;
pub mod verify;

pub use compile::{CompiledFunction, FunctionCompiler};
pub use ir::{Function, ScriptFunction};
pub use op::{Opcode, OpcodeFlags, OpcodeType};
