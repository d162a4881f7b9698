use thiserror::Error;

use crate::bytecode::ir::Label;
use crate::bytecode::{Opcode, OpcodeFlags, OpcodeType};

/// Structural problem in an opcode array. Raised after optimization it is
/// an internal compiler bug, not a script error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("opcode verification failed: empty opcode list")]
    Empty,

    #[error("opcode verification failed: last opcode is {found}, expected RETURN or EXTERNAL_JUMP")]
    MissingTerminal { found: OpcodeType },

    #[error("opcode verification failed: {kind} at {index:04} targets {target}, but there are only {len} opcodes")]
    JumpOutOfRange {
        index: usize,
        kind: OpcodeType,
        target: i64,
        len: usize,
    },

    #[error("opcode verification failed: label '{name}' points to {offset}, but there are only {len} opcodes")]
    LabelOutOfRange { name: String, offset: u32, len: usize },

    #[error("opcode verification failed: NOP left at {index:04}")]
    NopLeft { index: usize },

    #[error("opcode verification failed: temporary flag left at {index:04}")]
    TempFlagLeft { index: usize },

    /// The optimizer refuses to touch malformed input.
    #[error("invalid optimizer input: {0}")]
    InvalidInput(Box<VerifyError>),
}

impl VerifyError {
    pub fn invalid_input(inner: VerifyError) -> Self {
        VerifyError::InvalidInput(Box::new(inner))
    }
}

/// Checks the shape every function must have before it is optimized:
/// a terminal last opcode and in-range jumps and labels. NOPs are fine.
pub fn check_input(opcodes: &[Opcode], labels: &[Label]) -> Result<(), VerifyError> {
    check_terminal(opcodes)?;
    check_targets(opcodes, labels)
}

/// Checks the canonical form produced by the optimizer.
pub fn verify_optimized(opcodes: &[Opcode], labels: &[Label]) -> Result<(), VerifyError> {
    check_terminal(opcodes)?;
    check_targets(opcodes, labels)?;
    for (index, op) in opcodes.iter().enumerate() {
        if op.kind == OpcodeType::Nop {
            return Err(VerifyError::NopLeft { index });
        }
        if op.flags.contains(OpcodeFlags::TEMP_FLAG) {
            return Err(VerifyError::TempFlagLeft { index });
        }
    }
    Ok(())
}

fn check_terminal(opcodes: &[Opcode]) -> Result<(), VerifyError> {
    match opcodes.last() {
        None => Err(VerifyError::Empty),
        Some(op) if !op.kind.is_terminal() => Err(VerifyError::MissingTerminal { found: op.kind }),
        Some(_) => Ok(()),
    }
}

fn check_targets(opcodes: &[Opcode], labels: &[Label]) -> Result<(), VerifyError> {
    let len = opcodes.len();
    for (index, op) in opcodes.iter().enumerate() {
        if op.kind.has_jump_target() && !(0..len as i64).contains(&op.parameter) {
            return Err(VerifyError::JumpOutOfRange {
                index,
                kind: op.kind,
                target: op.parameter,
                len,
            });
        }
    }
    for label in labels {
        if label.offset as usize >= len {
            return Err(VerifyError::LabelOutOfRange {
                name: label.name.clone(),
                offset: label.offset,
                len,
            });
        }
    }
    Ok(())
}
