//! # Lemonscript vocabulary
//!
//! Types shared by the token processor, the opcode emitter and the
//! optimizer: base types and cast encodings, script data types, operators,
//! variables, constants and the implicit/explicit casting rules.

pub mod base_type;
pub mod constant;
pub mod data_type;
pub mod operators;
pub mod type_casting;
pub mod variable;
