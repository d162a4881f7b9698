use crate::lang::base_type::BaseCastType;
use crate::lang::data_type::{DataType, DataTypeClass};
use crate::lang::operators::{Operator, OperatorType};

/// Implicit cast priority meaning "not possible".
pub const CANNOT_CAST: u8 = 0xff;

/// Overload priorities at or above this are invalid.
pub const INVALID_SIGNATURE_PRIORITY: u32 = 0xff00_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryOperatorSignature {
    pub left: DataType,
    pub right: DataType,
    pub result: DataType,
}

impl BinaryOperatorSignature {
    pub const fn new(left: DataType, right: DataType, result: DataType) -> Self {
        Self { left, right, result }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastHandling {
    NoCast,
    BaseCast(BaseCastType),
    Invalid,
}

use DataType::*;

const fn symmetric(t: DataType) -> BinaryOperatorSignature {
    BinaryOperatorSignature::new(t, t, t)
}

const fn comparison(t: DataType) -> BinaryOperatorSignature {
    BinaryOperatorSignature::new(t, t, Bool)
}

const fn trinary(t: DataType) -> BinaryOperatorSignature {
    BinaryOperatorSignature::new(Bool, t, t)
}

static SIGNATURES_SYMMETRIC: [BinaryOperatorSignature; 11] = [
    symmetric(S64),
    symmetric(U64),
    symmetric(S32),
    symmetric(U32),
    symmetric(S16),
    symmetric(U16),
    symmetric(S8),
    symmetric(U8),
    symmetric(String),
    symmetric(Float),
    symmetric(Double),
];

static SIGNATURES_COMPARISON: [BinaryOperatorSignature; 11] = [
    comparison(S64),
    comparison(U64),
    comparison(S32),
    comparison(U32),
    comparison(S16),
    comparison(U16),
    comparison(S8),
    comparison(U8),
    comparison(String),
    comparison(Float),
    comparison(Double),
];

static SIGNATURES_TRINARY: [BinaryOperatorSignature; 11] = [
    trinary(S64),
    trinary(U64),
    trinary(S32),
    trinary(U32),
    trinary(S16),
    trinary(U16),
    trinary(S8),
    trinary(U8),
    trinary(String),
    trinary(Float),
    trinary(Double),
];

/// Casting rules between script data types.
///
/// Lower priorities are better. Strings are handled as `u64` everywhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeCasting;

fn string_as_u64(t: DataType) -> DataType {
    if t == String { U64 } else { t }
}

impl TypeCasting {
    pub fn new() -> Self {
        Self
    }

    pub fn implicit_cast_priority(&self, original: DataType, target: DataType) -> u8 {
        let original = string_as_u64(original);
        let target = string_as_u64(target);

        if original == target {
            return 0;
        }

        match (original.class(), target.class()) {
            (DataTypeClass::Integer, DataTypeClass::Integer) => {
                if original == ConstInt || target == ConstInt {
                    return 1;
                }
                let sign_loss = original.is_signed() && !target.is_signed();
                if original.bytes() == target.bytes() {
                    return if sign_loss { 0x02 } else { 0x01 };
                }

                let size_a = original.base_type().bits() & 0x07;
                let size_b = target.base_type().bits() & 0x07;
                let delta = size_b.wrapping_sub(size_a);
                if original.bytes() < target.bytes() {
                    (if sign_loss { 0x20u8 } else { 0x10 }).wrapping_add(delta)
                } else {
                    // down-casts wrap around like the runtime's u8 arithmetic
                    (if sign_loss { 0x40u8 } else { 0x30 }).wrapping_add(delta)
                }
            }
            (DataTypeClass::Integer, DataTypeClass::Float) => {
                if target == Float { 0x50 } else { 0x51 }
            }
            (DataTypeClass::Float, DataTypeClass::Float) => {
                if target == Double { 0x10 } else { 0x30 }
            }
            _ => CANNOT_CAST,
        }
    }

    pub fn base_cast_type(&self, original: DataType, target: DataType) -> BaseCastType {
        let original = string_as_u64(original);
        let target = string_as_u64(target);
        let source = original.base_type();
        let dest = target.base_type();

        match (original.class(), target.class()) {
            (DataTypeClass::Integer, DataTypeClass::Integer) => {
                // const ints count as 64 bit
                BaseCastType::integer(source.size_bits(), dest.size_bits(), source.is_signed())
            }
            (DataTypeClass::Integer, DataTypeClass::Float) => {
                BaseCastType::integer_to_float(source.size_bits(), source.is_signed(), target == Double)
            }
            (DataTypeClass::Float, DataTypeClass::Integer) => {
                BaseCastType::float_to_integer(dest.size_bits(), dest.is_signed(), original == Double)
            }
            (DataTypeClass::Float, DataTypeClass::Float) => match (original, target) {
                (Float, Double) => BaseCastType::FLOAT_TO_DOUBLE,
                (Double, Float) => BaseCastType::DOUBLE_TO_FLOAT,
                _ => BaseCastType::NONE,
            },
            _ => BaseCastType::INVALID,
        }
    }

    pub fn cast_handling(&self, original: DataType, target: DataType) -> CastHandling {
        if original == target {
            return CastHandling::NoCast;
        }
        match self.base_cast_type(original, target) {
            BaseCastType::NONE => CastHandling::NoCast,
            BaseCastType::INVALID => CastHandling::Invalid,
            cast => CastHandling::BaseCast(cast),
        }
    }

    pub fn can_explicitly_cast(&self, original: DataType, target: DataType) -> bool {
        if original == target {
            return true;
        }
        let numeric = |t: DataType| matches!(t.class(), DataTypeClass::Integer | DataTypeClass::Float);
        let original = string_as_u64(original);
        let target = string_as_u64(target);
        numeric(original) && numeric(target)
    }

    /// Worse side in the high byte, better side in the low byte.
    pub fn signature_priority(&self, signature: &BinaryOperatorSignature, left: DataType, right: DataType) -> u16 {
        let prio_left = self.implicit_cast_priority(left, signature.left) as u16;
        let prio_right = self.implicit_cast_priority(right, signature.right) as u16;
        (prio_left.max(prio_right) << 8) + prio_left.min(prio_right)
    }

    /// Priority of calling a function with parameters `target` using
    /// arguments of type `original`; the four worst casts are packed into
    /// a u32, highest first. A count mismatch yields `u32::MAX`.
    pub fn parameter_list_priority(&self, original: &[DataType], target: &[DataType]) -> u32 {
        if original.len() != target.len() {
            return u32::MAX;
        }
        let mut priorities: Vec<u8> = original
            .iter()
            .zip(target)
            .map(|(&o, &t)| self.implicit_cast_priority(o, t))
            .collect();
        priorities.sort_unstable_by(|a, b| b.cmp(a));

        priorities
            .iter()
            .take(4)
            .enumerate()
            .fold(0u32, |acc, (i, &p)| acc | ((p as u32) << (24 - i * 8)))
    }

    /// Index of the first argument that cannot be cast, if any.
    pub fn first_mismatch(&self, original: &[DataType], target: &[DataType]) -> Option<usize> {
        original
            .iter()
            .zip(target)
            .position(|(&o, &t)| self.implicit_cast_priority(o, t) == CANNOT_CAST)
    }

    pub fn signatures_for(&self, op: Operator) -> &'static [BinaryOperatorSignature] {
        match op.operator_type() {
            OperatorType::Assignment | OperatorType::Symmetric => &SIGNATURES_SYMMETRIC,
            OperatorType::Comparison => &SIGNATURES_COMPARISON,
            OperatorType::Trinary => &SIGNATURES_TRINARY,
            OperatorType::Unknown => &[],
        }
    }

    /// Picks the cheapest signature; assignments need an exact left match.
    pub fn best_operator_signature(
        &self,
        op: Operator,
        left: DataType,
        right: DataType,
    ) -> Option<BinaryOperatorSignature> {
        let exact_left = op.operator_type() == OperatorType::Assignment;
        let mut best_priority = 0xff00u16;
        let mut best = None;
        for signature in self.signatures_for(op) {
            if exact_left && signature.left != left {
                continue;
            }
            let priority = self.signature_priority(signature, left, right);
            if priority < best_priority {
                best_priority = priority;
                best = Some(*signature);
            }
        }
        best
    }

    /// Converts a constant's raw value between types at compile time.
    /// Floating point values are carried as `f64` bit patterns.
    pub fn cast_constant_value(&self, value: i64, original: DataType, target: DataType) -> Option<i64> {
        let original = string_as_u64(original);
        let target = string_as_u64(target);
        match (original.class(), target.class()) {
            (DataTypeClass::Integer, DataTypeClass::Integer) => Some(truncate_integer(value, target)),
            (DataTypeClass::Integer, DataTypeClass::Float) => Some((value as f64).to_bits() as i64),
            (DataTypeClass::Float, DataTypeClass::Integer) => {
                let f = f64::from_bits(value as u64);
                Some(truncate_integer(f as i64, target))
            }
            (DataTypeClass::Float, DataTypeClass::Float) => Some(value),
            _ => None,
        }
    }
}

fn truncate_integer(value: i64, target: DataType) -> i64 {
    match target {
        Bool => (value != 0) as i64,
        U8 => value as u8 as i64,
        U16 => value as u16 as i64,
        U32 => value as u32 as i64,
        S8 => value as i8 as i64,
        S16 => value as i16 as i64,
        S32 => value as i32 as i64,
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tc() -> TypeCasting {
        TypeCasting::new()
    }

    #[test]
    fn test_same_type_is_free() {
        assert_eq!(tc().implicit_cast_priority(U16, U16), 0);
        assert_eq!(tc().implicit_cast_priority(String, U64), 0);
    }

    #[test]
    fn test_const_casts_everywhere() {
        assert_eq!(tc().implicit_cast_priority(ConstInt, U8), 1);
        assert_eq!(tc().implicit_cast_priority(ConstInt, S64), 1);
    }

    #[test]
    fn test_same_size_sign_loss_costs_more() {
        assert_eq!(tc().implicit_cast_priority(U32, S32), 1);
        assert_eq!(tc().implicit_cast_priority(S32, U32), 2);
        assert_eq!(tc().implicit_cast_priority(Bool, U8), 1);
    }

    #[test]
    fn test_up_and_down_casts() {
        assert_eq!(tc().implicit_cast_priority(U8, U32), 0x12);
        assert_eq!(tc().implicit_cast_priority(S8, U16), 0x21);
        // 32 -> 8: 0x30 + (0 - 2) wrapped
        assert_eq!(tc().implicit_cast_priority(U32, U8), 0x2e);
        assert_eq!(tc().implicit_cast_priority(S16, U8), 0x3f);
    }

    #[test]
    fn test_non_integer_pairs() {
        assert_eq!(tc().implicit_cast_priority(Void, U8), CANNOT_CAST);
        assert_eq!(tc().implicit_cast_priority(Float, U8), CANNOT_CAST);
        assert_eq!(tc().implicit_cast_priority(U8, Float), 0x50);
        assert_eq!(tc().implicit_cast_priority(Float, Double), 0x10);
    }

    #[test]
    fn test_base_cast_type() {
        assert_eq!(tc().base_cast_type(U8, U16), BaseCastType(0x01));
        assert_eq!(tc().base_cast_type(S8, S32), BaseCastType(0x12));
        assert_eq!(tc().base_cast_type(U32, U8), BaseCastType(0x08));
        assert_eq!(tc().base_cast_type(S32, U32), BaseCastType::NONE);
        assert_eq!(tc().base_cast_type(ConstInt, U8), BaseCastType(0x0c));
        assert_eq!(tc().base_cast_type(Void, U8), BaseCastType::INVALID);
        assert_eq!(tc().base_cast_type(S16, Double), BaseCastType(0x2d));
        assert_eq!(tc().base_cast_type(Float, Double), BaseCastType::FLOAT_TO_DOUBLE);
    }

    #[test]
    fn test_cast_handling() {
        assert_eq!(tc().cast_handling(U8, U8), CastHandling::NoCast);
        assert_eq!(tc().cast_handling(S8, U8), CastHandling::NoCast);
        assert_eq!(tc().cast_handling(U8, U32), CastHandling::BaseCast(BaseCastType(0x02)));
        assert_eq!(tc().cast_handling(Void, U32), CastHandling::Invalid);
    }

    #[test]
    fn test_symmetric_prefers_matching_width() {
        let sig = tc()
            .best_operator_signature(Operator::BinaryPlus, U8, ConstInt)
            .unwrap();
        assert_eq!(sig, BinaryOperatorSignature::new(U8, U8, U8));

        let sig = tc().best_operator_signature(Operator::BinaryPlus, U8, U32).unwrap();
        assert_eq!(sig.result, U32);
    }

    #[test]
    fn test_comparison_yields_bool() {
        let sig = tc()
            .best_operator_signature(Operator::CompareLess, S16, S16)
            .unwrap();
        assert_eq!(sig.result, Bool);
        assert_eq!(sig.left, S16);
    }

    #[test]
    fn test_assignment_requires_exact_left() {
        assert!(tc().best_operator_signature(Operator::Assign, U16, ConstInt).is_some());
        // bool is not in the table
        assert!(tc().best_operator_signature(Operator::Assign, Bool, Bool).is_none());
    }

    #[test]
    fn test_unknown_operator_has_no_signature() {
        assert!(
            tc()
                .best_operator_signature(Operator::CommaSeparator, U8, U8)
                .is_none()
        );
    }

    #[test]
    fn test_parameter_list_priority() {
        let t = tc();
        assert_eq!(t.parameter_list_priority(&[U8], &[U8, U8]), u32::MAX);
        assert_eq!(t.parameter_list_priority(&[U8, U8], &[U8, U8]), 0);
        // priorities sorted descending: 0x12, 0x01
        assert_eq!(
            t.parameter_list_priority(&[ConstInt, U8], &[U8, U32]),
            0x1201_0000
        );
        assert!(t.parameter_list_priority(&[Void], &[U8]) >= INVALID_SIGNATURE_PRIORITY);
        assert_eq!(t.first_mismatch(&[U8, Void], &[U8, U8]), Some(1));
    }

    #[test]
    fn test_explicit_casts() {
        assert!(tc().can_explicitly_cast(S32, U8));
        assert!(tc().can_explicitly_cast(Float, S8));
        assert!(tc().can_explicitly_cast(String, U64));
        assert!(!tc().can_explicitly_cast(Void, U8));
    }

    #[test]
    fn test_cast_constant_value() {
        assert_eq!(tc().cast_constant_value(300, ConstInt, U8), Some(44));
        assert_eq!(tc().cast_constant_value(0xff, ConstInt, S8), Some(-1));
        assert_eq!(tc().cast_constant_value(5, ConstInt, Bool), Some(1));
        let bits = tc().cast_constant_value(3, ConstInt, Double).unwrap();
        assert_eq!(f64::from_bits(bits as u64), 3.0);
        assert_eq!(tc().cast_constant_value(bits, Double, S32), Some(3));
        assert_eq!(tc().cast_constant_value(1, Void, U8), None);
    }
}
