use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::lang::base_type::BaseType;

// =============================================================================
// OPCODE - one instruction of a compiled script function
// =============================================================================

/// Instruction kind. The discriminants are the serialized tag and the
/// runtime's dispatch index, so the order must never change.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpcodeType {
    #[default]
    Nop,
    MoveStack,
    MoveVarStack,
    PushConstant,
    GetVariableValue,
    SetVariableValue,
    ReadMemory,
    WriteMemory,
    CastValue,
    MakeBool,
    ArithmAdd,
    ArithmSub,
    ArithmMul,
    ArithmDiv,
    ArithmMod,
    ArithmAnd,
    ArithmOr,
    ArithmXor,
    ArithmShl,
    ArithmShr,
    ArithmNeg,
    ArithmNot,
    ArithmBitnot,
    CompareEq,
    CompareNeq,
    CompareLt,
    CompareLe,
    CompareGt,
    CompareGe,
    Jump,
    /// Pops the condition; jumps to the parameter when it is zero.
    JumpConditional,
    JumpSwitch,
    Call,
    Return,
    ExternalCall,
    ExternalJump,
}

impl OpcodeType {
    pub const ALL: [OpcodeType; 36] = {
        use OpcodeType::*;
        [
            Nop,
            MoveStack,
            MoveVarStack,
            PushConstant,
            GetVariableValue,
            SetVariableValue,
            ReadMemory,
            WriteMemory,
            CastValue,
            MakeBool,
            ArithmAdd,
            ArithmSub,
            ArithmMul,
            ArithmDiv,
            ArithmMod,
            ArithmAnd,
            ArithmOr,
            ArithmXor,
            ArithmShl,
            ArithmShr,
            ArithmNeg,
            ArithmNot,
            ArithmBitnot,
            CompareEq,
            CompareNeq,
            CompareLt,
            CompareLe,
            CompareGt,
            CompareGe,
            Jump,
            JumpConditional,
            JumpSwitch,
            Call,
            Return,
            ExternalCall,
            ExternalJump,
        ]
    };

    pub fn from_u8(tag: u8) -> Option<OpcodeType> {
        Self::ALL.get(tag as usize).copied()
    }

    /// Kinds whose parameter is an opcode index.
    pub fn has_jump_target(self) -> bool {
        matches!(
            self,
            OpcodeType::Jump | OpcodeType::JumpConditional | OpcodeType::JumpSwitch
        )
    }

    pub fn is_jump(self) -> bool {
        matches!(self, OpcodeType::Jump | OpcodeType::JumpConditional)
    }

    pub fn is_comparison(self) -> bool {
        (OpcodeType::CompareEq..=OpcodeType::CompareGe).contains(&self)
    }

    /// Control never falls through these.
    pub fn is_terminal(self) -> bool {
        matches!(self, OpcodeType::Return | OpcodeType::ExternalJump)
    }

    pub fn is_control_flow(self) -> bool {
        matches!(
            self,
            OpcodeType::Jump
                | OpcodeType::JumpConditional
                | OpcodeType::JumpSwitch
                | OpcodeType::Call
                | OpcodeType::Return
                | OpcodeType::ExternalCall
                | OpcodeType::ExternalJump
        )
    }

    /// Kinds where the sign of the data type makes no difference.
    pub fn ignores_signedness(self) -> bool {
        use OpcodeType::*;
        matches!(
            self,
            GetVariableValue
                | SetVariableValue
                | ReadMemory
                | WriteMemory
                | ArithmAdd
                | ArithmSub
                | ArithmAnd
                | ArithmOr
                | ArithmXor
                | ArithmShl
                | ArithmNeg
                | ArithmNot
                | ArithmBitnot
                | CompareEq
                | CompareNeq
        )
    }

    /// Most common data type per kind; listings only print deviations.
    pub fn default_data_type(self) -> BaseType {
        use OpcodeType::*;
        match self {
            PushConstant | ArithmNeg => BaseType::IntConst,
            GetVariableValue | SetVariableValue => BaseType::U32,
            ArithmAdd | ArithmSub | ArithmMul | ArithmDiv | ArithmMod | ArithmShl | ArithmShr => {
                BaseType::U32
            }
            ReadMemory | WriteMemory | ArithmAnd | ArithmOr | ArithmXor | ArithmNot | ArithmBitnot => {
                BaseType::U8
            }
            CompareEq | CompareNeq | CompareLt | CompareLe | CompareGt | CompareGe => BaseType::U8,
            _ => BaseType::Void,
        }
    }

    pub fn name(self) -> &'static str {
        use OpcodeType::*;
        match self {
            Nop => "NOP",
            MoveStack => "MOVE_STACK",
            MoveVarStack => "MOVE_VAR_STACK",
            PushConstant => "PUSH_CONSTANT",
            GetVariableValue => "GET_VARIABLE_VALUE",
            SetVariableValue => "SET_VARIABLE_VALUE",
            ReadMemory => "READ_MEMORY",
            WriteMemory => "WRITE_MEMORY",
            CastValue => "CAST_VALUE",
            MakeBool => "MAKE_BOOL",
            ArithmAdd => "ARITHM_ADD",
            ArithmSub => "ARITHM_SUB",
            ArithmMul => "ARITHM_MUL",
            ArithmDiv => "ARITHM_DIV",
            ArithmMod => "ARITHM_MOD",
            ArithmAnd => "ARITHM_AND",
            ArithmOr => "ARITHM_OR",
            ArithmXor => "ARITHM_XOR",
            ArithmShl => "ARITHM_SHL",
            ArithmShr => "ARITHM_SHR",
            ArithmNeg => "ARITHM_NEG",
            ArithmNot => "ARITHM_NOT",
            ArithmBitnot => "ARITHM_BITNOT",
            CompareEq => "COMPARE_EQ",
            CompareNeq => "COMPARE_NEQ",
            CompareLt => "COMPARE_LT",
            CompareLe => "COMPARE_LE",
            CompareGt => "COMPARE_GT",
            CompareGe => "COMPARE_GE",
            Jump => "JUMP",
            JumpConditional => "JUMP_CONDITIONAL",
            JumpSwitch => "JUMP_SWITCH",
            Call => "CALL",
            Return => "RETURN",
            ExternalCall => "EXTERNAL_CALL",
            ExternalJump => "EXTERNAL_JUMP",
        }
    }
}

impl std::fmt::Display for OpcodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct OpcodeFlags: u8 {
        const LABEL = 0x01;
        const JUMP_TARGET = 0x02;
        const NEW_LINE = 0x04;
        const CTRLFLOW = 0x08;
        const JUMP = 0x10;
        const SEQ_BREAK = 0x20;
        /// On CALL: calls the overridden implementation (`base.name()`).
        const BASE_CALL = 0x40;
        /// Scratch marker, only meaningful inside a single optimizer pass.
        const TEMP_FLAG = 0x80;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Opcode {
    #[serde(rename = "type")]
    pub kind: OpcodeType,
    #[serde(default)]
    pub data_type: BaseType,
    #[serde(default)]
    pub flags: OpcodeFlags,
    #[serde(default)]
    pub line: u32,
    #[serde(default)]
    pub parameter: i64,
}

impl Opcode {
    pub fn new(kind: OpcodeType, parameter: i64) -> Self {
        Self {
            kind,
            data_type: BaseType::Void,
            flags: OpcodeFlags::empty(),
            line: 0,
            parameter,
        }
    }

    pub fn with_data_type(mut self, data_type: BaseType) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = line;
        self
    }

    pub fn nop() -> Self {
        Self::new(OpcodeType::Nop, 0)
    }

    pub fn push_constant(value: i64) -> Self {
        Self::new(OpcodeType::PushConstant, value).with_data_type(BaseType::IntConst)
    }

    pub fn jump(target: usize) -> Self {
        Self::new(OpcodeType::Jump, target as i64)
    }

    pub fn jump_conditional(target: usize) -> Self {
        Self::new(OpcodeType::JumpConditional, target as i64)
    }

    pub fn ret() -> Self {
        Self::new(OpcodeType::Return, 0)
    }

    /// Target index for jumps; negative parameters have none.
    pub fn jump_target(&self) -> Option<usize> {
        if self.kind.has_jump_target() {
            usize::try_from(self.parameter).ok()
        } else {
            None
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:<20}", self.kind.name())?;
        if self.data_type != BaseType::Void {
            write!(f, " {:<6}", self.data_type.name())?;
        } else {
            write!(f, "       ")?;
        }
        match self.kind {
            OpcodeType::Nop | OpcodeType::Return | OpcodeType::MakeBool => Ok(()),
            OpcodeType::Jump | OpcodeType::JumpConditional | OpcodeType::JumpSwitch => {
                write!(f, " -> {:04}", self.parameter)
            }
            OpcodeType::GetVariableValue | OpcodeType::SetVariableValue => {
                write!(f, " var {:#010x}", self.parameter)
            }
            OpcodeType::CastValue => write!(f, " cast {:#04x}", self.parameter),
            OpcodeType::Call => write!(f, " {:#018x}", self.parameter),
            _ => write!(f, " {}", self.parameter),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_numbering_is_stable() {
        assert_eq!(OpcodeType::Nop as u8, 0);
        assert_eq!(OpcodeType::PushConstant as u8, 3);
        assert_eq!(OpcodeType::CastValue as u8, 8);
        assert_eq!(OpcodeType::CompareEq as u8, 23);
        assert_eq!(OpcodeType::Jump as u8, 29);
        assert_eq!(OpcodeType::JumpConditional as u8, 30);
        assert_eq!(OpcodeType::Return as u8, 33);
        assert_eq!(OpcodeType::ExternalJump as u8, 35);
        for (i, kind) in OpcodeType::ALL.iter().enumerate() {
            assert_eq!(*kind as usize, i);
            assert_eq!(OpcodeType::from_u8(i as u8), Some(*kind));
        }
        assert_eq!(OpcodeType::from_u8(36), None);
    }

    #[test]
    fn test_classification() {
        assert!(OpcodeType::CompareLe.is_comparison());
        assert!(!OpcodeType::MakeBool.is_comparison());
        assert!(OpcodeType::JumpConditional.is_jump());
        assert!(!OpcodeType::JumpSwitch.is_jump());
        assert!(OpcodeType::JumpSwitch.has_jump_target());
        assert!(OpcodeType::ExternalJump.is_terminal());
        assert!(!OpcodeType::ExternalCall.is_terminal());
        assert!(OpcodeType::ArithmAdd.ignores_signedness());
        assert!(!OpcodeType::ArithmDiv.ignores_signedness());
    }

    #[test]
    fn test_default_data_types() {
        assert_eq!(OpcodeType::PushConstant.default_data_type(), BaseType::IntConst);
        assert_eq!(OpcodeType::GetVariableValue.default_data_type(), BaseType::U32);
        assert_eq!(OpcodeType::CompareGe.default_data_type(), BaseType::U8);
        assert_eq!(OpcodeType::Jump.default_data_type(), BaseType::Void);
    }

    #[test]
    fn test_jump_target() {
        assert_eq!(Opcode::jump(4).jump_target(), Some(4));
        assert_eq!(Opcode::new(OpcodeType::Jump, -1).jump_target(), None);
        assert_eq!(Opcode::push_constant(4).jump_target(), None);
    }

    #[test]
    fn test_flag_bits() {
        assert_eq!(OpcodeFlags::LABEL.bits(), 0x01);
        assert_eq!(OpcodeFlags::SEQ_BREAK.bits(), 0x20);
        assert_eq!(OpcodeFlags::TEMP_FLAG.bits(), 0x80);
    }

    #[test]
    fn test_display() {
        let text = Opcode::push_constant(300).to_string();
        assert!(text.starts_with("PUSH_CONSTANT"));
        assert!(text.contains("const"));
        assert!(text.ends_with("300"));
        assert!(Opcode::jump(7).to_string().contains("-> 0007"));
    }
}
