use serde::{Deserialize, Serialize};

/// Low-level value representation used by opcodes.
///
/// The numeric tags are part of the bytecode format: the low two bits of an
/// integer type encode its width (8/16/32/64 bit), bit 0x08 marks it signed.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseType {
    #[default]
    Void = 0x00,
    U8 = 0x10,
    U16 = 0x11,
    U32 = 0x12,
    U64 = 0x13,
    I8 = 0x18,
    I16 = 0x19,
    I32 = 0x1a,
    I64 = 0x1b,
    IntConst = 0x1f,
    Float = 0x20,
    Double = 0x21,
}

impl BaseType {
    /// Booleans are stored as unsigned bytes.
    pub const BOOL: BaseType = BaseType::U8;

    pub fn from_u8(bits: u8) -> Option<BaseType> {
        use BaseType::*;
        Some(match bits {
            0x00 => Void,
            0x10 => U8,
            0x11 => U16,
            0x12 => U32,
            0x13 => U64,
            0x18 => I8,
            0x19 => I16,
            0x1a => I32,
            0x1b => I64,
            0x1f => IntConst,
            0x20 => Float,
            0x21 => Double,
            _ => return None,
        })
    }

    pub fn bits(self) -> u8 {
        self as u8
    }

    pub fn is_integer(self) -> bool {
        self.bits() & 0xf0 == 0x10
    }

    pub fn is_float(self) -> bool {
        self.bits() & 0xf0 == 0x20
    }

    /// Width flags: 0 = 8 bit, 1 = 16 bit, 2 = 32 bit, 3 = 64 bit.
    pub fn size_bits(self) -> u8 {
        self.bits() & 0x03
    }

    pub fn is_signed(self) -> bool {
        self.bits() & 0x08 != 0
    }

    /// Drops the signed flag, and turns `IntConst` into `U64`.
    /// Non-integer types pass through unchanged.
    pub fn make_unsigned(self) -> BaseType {
        if !self.is_integer() {
            return self;
        }
        BaseType::from_u8(self.bits() & !0x0c).unwrap_or(self)
    }

    pub fn name(self) -> &'static str {
        use BaseType::*;
        match self {
            Void => "void",
            U8 => "u8",
            U16 => "u16",
            U32 => "u32",
            U64 => "u64",
            I8 => "s8",
            I16 => "s16",
            I32 => "s32",
            I64 => "s64",
            IntConst => "const",
            Float => "float",
            Double => "double",
        }
    }
}

/// Encoded conversion between two base types, used as the `CAST_VALUE`
/// opcode parameter.
///
/// Integer casts are `base + source_size * 4 + target_size`, where `base`
/// is 0x10 for a signed up-cast and 0x00 otherwise. Floating point casts
/// occupy the 0x20..0x4f range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BaseCastType(pub u8);

impl BaseCastType {
    pub const NONE: BaseCastType = BaseCastType(0x00);
    pub const INVALID: BaseCastType = BaseCastType(0xff);

    pub const FLOAT_TO_DOUBLE: BaseCastType = BaseCastType(0x40);
    pub const DOUBLE_TO_FLOAT: BaseCastType = BaseCastType(0x41);

    /// Integer width change; `source_size` and `target_size` are width flags.
    pub fn integer(source_size: u8, target_size: u8, signed_source: bool) -> BaseCastType {
        if source_size == target_size {
            return BaseCastType::NONE;
        }
        let mut bits = ((source_size & 0x03) << 2) + (target_size & 0x03);
        if signed_source && target_size > source_size {
            bits += 0x10;
        }
        BaseCastType(bits)
    }

    pub fn integer_to_float(source_size: u8, signed_source: bool, double: bool) -> BaseCastType {
        let base = match (double, signed_source) {
            (false, false) => 0x20,
            (false, true) => 0x24,
            (true, false) => 0x28,
            (true, true) => 0x2c,
        };
        BaseCastType(base + (source_size & 0x03))
    }

    pub fn float_to_integer(target_size: u8, signed_target: bool, double: bool) -> BaseCastType {
        let base = match (double, signed_target) {
            (false, false) => 0x30,
            (false, true) => 0x34,
            (true, false) => 0x48,
            (true, true) => 0x4c,
        };
        BaseCastType(base + (target_size & 0x03))
    }

    /// True for the 18 integer width casts; only these may be folded into
    /// a constant at compile time.
    pub fn is_pure_integer(self) -> bool {
        let bits = self.0;
        if bits == 0 || bits >= 0x20 {
            return false;
        }
        let source = (bits >> 2) & 0x03;
        let target = bits & 0x03;
        if source == target {
            return false;
        }
        // the signed marker only exists on up-casts
        bits & 0x10 == 0 || target > source
    }

    /// Applies a pure integer cast to a constant value.
    ///
    /// Follows the `parameter & 0x13` table of the runtime: truncation to
    /// 8/16/32 bits unsigned, sign extension from 16/32 bits for signed
    /// up-casts, and no change for 64-bit targets. Returns `None` for
    /// anything that is not a pure integer cast.
    pub fn fold_integer_constant(self, value: i64) -> Option<i64> {
        if !self.is_pure_integer() {
            return None;
        }
        Some(match self.0 & 0x13 {
            0x00 => value as u8 as i64,
            0x01 => value as u16 as i64,
            0x02 => value as u32 as i64,
            0x10 => value as i8 as i64,
            0x11 => value as i16 as i64,
            0x12 => value as i32 as i64,
            _ => value,
        })
    }
}
