use serde::{Deserialize, Serialize};

use crate::lang::base_type::BaseType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataTypeClass {
    Void,
    Integer,
    Float,
    String,
}

/// How an integer type is meant to be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntegerSemantics {
    Default,
    /// Literal of not yet decided width.
    Constant,
    Boolean,
}

/// Script-visible data types.
///
/// Strings are handles; for casting and operator selection they behave
/// like `u64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    #[default]
    Void,
    Bool,
    U8,
    U16,
    U32,
    U64,
    S8,
    S16,
    S32,
    S64,
    ConstInt,
    String,
    Float,
    Double,
}

impl DataType {
    pub const ALL: [DataType; 14] = [
        DataType::Void,
        DataType::Bool,
        DataType::U8,
        DataType::U16,
        DataType::U32,
        DataType::U64,
        DataType::S8,
        DataType::S16,
        DataType::S32,
        DataType::S64,
        DataType::ConstInt,
        DataType::String,
        DataType::Float,
        DataType::Double,
    ];

    pub fn class(self) -> DataTypeClass {
        match self {
            DataType::Void => DataTypeClass::Void,
            DataType::String => DataTypeClass::String,
            DataType::Float | DataType::Double => DataTypeClass::Float,
            _ => DataTypeClass::Integer,
        }
    }

    pub fn is_integer(self) -> bool {
        self.class() == DataTypeClass::Integer
    }

    pub fn semantics(self) -> Option<IntegerSemantics> {
        match self {
            DataType::Bool => Some(IntegerSemantics::Boolean),
            DataType::ConstInt => Some(IntegerSemantics::Constant),
            t if t.is_integer() => Some(IntegerSemantics::Default),
            _ => None,
        }
    }

    pub fn bytes(self) -> usize {
        match self {
            DataType::Void => 0,
            DataType::Bool | DataType::U8 | DataType::S8 => 1,
            DataType::U16 | DataType::S16 => 2,
            DataType::U32 | DataType::S32 | DataType::Float => 4,
            DataType::U64 | DataType::S64 | DataType::ConstInt => 8,
            DataType::String | DataType::Double => 8,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            DataType::S8 | DataType::S16 | DataType::S32 | DataType::S64 | DataType::ConstInt
        )
    }

    pub fn base_type(self) -> BaseType {
        match self {
            DataType::Void => BaseType::Void,
            DataType::Bool => BaseType::BOOL,
            DataType::U8 => BaseType::U8,
            DataType::U16 => BaseType::U16,
            DataType::U32 => BaseType::U32,
            DataType::U64 | DataType::String => BaseType::U64,
            DataType::S8 => BaseType::I8,
            DataType::S16 => BaseType::I16,
            DataType::S32 => BaseType::I32,
            DataType::S64 => BaseType::I64,
            DataType::ConstInt => BaseType::IntConst,
            DataType::Float => BaseType::Float,
            DataType::Double => BaseType::Double,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DataType::Void => "void",
            DataType::Bool => "bool",
            DataType::U8 => "u8",
            DataType::U16 => "u16",
            DataType::U32 => "u32",
            DataType::U64 => "u64",
            DataType::S8 => "s8",
            DataType::S16 => "s16",
            DataType::S32 => "s32",
            DataType::S64 => "s64",
            DataType::ConstInt => "const_int",
            DataType::String => "string",
            DataType::Float => "float",
            DataType::Double => "double",
        }
    }

    /// Resolves a type keyword as written in scripts.
    pub fn from_name(name: &str) -> Option<DataType> {
        Some(match name {
            "void" => DataType::Void,
            "bool" => DataType::Bool,
            "u8" => DataType::U8,
            "u16" => DataType::U16,
            "u32" => DataType::U32,
            "u64" => DataType::U64,
            "s8" | "int8" => DataType::S8,
            "s16" | "int16" => DataType::S16,
            "s32" | "int" => DataType::S32,
            "s64" => DataType::S64,
            "string" => DataType::String,
            "float" => DataType::Float,
            "double" => DataType::Double,
            _ => return None,
        })
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
