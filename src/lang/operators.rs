use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Assign,
    AssignPlus,
    AssignMinus,
    AssignMultiply,
    AssignDivide,
    AssignModulo,
    AssignShiftLeft,
    AssignShiftRight,
    AssignAnd,
    AssignOr,
    AssignXor,
    BinaryPlus,
    /// Also used for unary negation; the token processor decides by position.
    BinaryMinus,
    BinaryMultiply,
    BinaryDivide,
    BinaryModulo,
    BinaryShiftLeft,
    BinaryShiftRight,
    BinaryAnd,
    BinaryOr,
    BinaryXor,
    LogicalAnd,
    LogicalOr,
    UnaryNot,
    UnaryBitNot,
    UnaryDecrement,
    UnaryIncrement,
    CompareEqual,
    CompareNotEqual,
    CompareLess,
    CompareLessOrEqual,
    CompareGreater,
    CompareGreaterOrEqual,
    QuestionMark,
    Colon,
    SemicolonSeparator,
    CommaSeparator,
    ParenthesisLeft,
    ParenthesisRight,
    BracketLeft,
    BracketRight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorType {
    Assignment,
    Symmetric,
    Comparison,
    Trinary,
    Unknown,
}

impl Operator {
    /// Binding strength; lower values bind tighter.
    pub fn priority(self) -> u8 {
        use Operator::*;
        match self {
            Assign | AssignPlus | AssignMinus | AssignMultiply | AssignDivide | AssignModulo
            | AssignShiftLeft | AssignShiftRight | AssignAnd | AssignOr | AssignXor => 15,
            BinaryPlus | BinaryMinus => 6,
            BinaryMultiply | BinaryDivide | BinaryModulo => 5,
            BinaryShiftLeft | BinaryShiftRight => 7,
            BinaryAnd => 10,
            BinaryOr => 12,
            BinaryXor => 11,
            LogicalAnd => 13,
            LogicalOr => 14,
            UnaryNot | UnaryBitNot | UnaryDecrement | UnaryIncrement => 3,
            CompareEqual | CompareNotEqual => 9,
            CompareLess | CompareLessOrEqual | CompareGreater | CompareGreaterOrEqual => 8,
            QuestionMark | Colon => 15,
            SemicolonSeparator => 18,
            CommaSeparator => 17,
            ParenthesisLeft | ParenthesisRight | BracketLeft | BracketRight => 2,
        }
    }

    /// Right-to-left evaluation: unary operators, assignments and `?:`.
    pub fn is_right_associative(self) -> bool {
        matches!(self.priority(), 3 | 15 | 16)
    }

    pub fn operator_type(self) -> OperatorType {
        use Operator::*;
        match self {
            Assign | AssignPlus | AssignMinus | AssignMultiply | AssignDivide | AssignModulo
            | AssignShiftLeft | AssignShiftRight | AssignAnd | AssignOr | AssignXor => {
                OperatorType::Assignment
            }
            BinaryPlus | BinaryMinus | BinaryMultiply | BinaryDivide | BinaryModulo
            | BinaryShiftLeft | BinaryShiftRight | BinaryAnd | BinaryOr | BinaryXor
            | LogicalAnd | LogicalOr | Colon => OperatorType::Symmetric,
            CompareEqual | CompareNotEqual | CompareLess | CompareLessOrEqual | CompareGreater
            | CompareGreaterOrEqual => OperatorType::Comparison,
            QuestionMark => OperatorType::Trinary,
            _ => OperatorType::Unknown,
        }
    }

    pub fn is_commutative(self) -> bool {
        use Operator::*;
        matches!(
            self,
            BinaryPlus
                | BinaryMultiply
                | BinaryAnd
                | BinaryOr
                | BinaryXor
                | CompareEqual
                | CompareNotEqual
        )
    }

    pub fn is_unary(self) -> bool {
        use Operator::*;
        matches!(self, UnaryNot | UnaryBitNot | UnaryDecrement | UnaryIncrement)
    }

    pub fn symbol(self) -> &'static str {
        use Operator::*;
        match self {
            Assign => "=",
            AssignPlus => "+=",
            AssignMinus => "-=",
            AssignMultiply => "*=",
            AssignDivide => "/=",
            AssignModulo => "%=",
            AssignShiftLeft => "<<=",
            AssignShiftRight => ">>=",
            AssignAnd => "&=",
            AssignOr => "|=",
            AssignXor => "^=",
            BinaryPlus => "+",
            BinaryMinus => "-",
            BinaryMultiply => "*",
            BinaryDivide => "/",
            BinaryModulo => "%",
            BinaryShiftLeft => "<<",
            BinaryShiftRight => ">>",
            BinaryAnd => "&",
            BinaryOr => "|",
            BinaryXor => "^",
            LogicalAnd => "&&",
            LogicalOr => "||",
            UnaryNot => "!",
            UnaryBitNot => "~",
            UnaryDecrement => "--",
            UnaryIncrement => "++",
            CompareEqual => "==",
            CompareNotEqual => "!=",
            CompareLess => "<",
            CompareLessOrEqual => "<=",
            CompareGreater => ">",
            CompareGreaterOrEqual => ">=",
            QuestionMark => "?",
            Colon => ":",
            SemicolonSeparator => ";",
            CommaSeparator => ",",
            ParenthesisLeft => "(",
            ParenthesisRight => ")",
            BracketLeft => "[",
            BracketRight => "]",
        }
    }

    /// Diagnostic for an operator found where it cannot be reduced.
    pub fn not_allowed_message(self) -> String {
        use Operator::*;
        match self {
            SemicolonSeparator => "Semicolon ; is only allowed in for-loops".to_string(),
            CommaSeparator => "Comma , is not allowed here".to_string(),
            ParenthesisLeft | ParenthesisRight => {
                format!("Parenthesis {} is not allowed here", self.symbol())
            }
            BracketLeft | BracketRight => format!("Bracket {} is not allowed here", self.symbol()),
            op if op.is_unary() => format!("Unary operator {} is not allowed here", op.symbol()),
            op => format!("Binary operator {} is not allowed here", op.symbol()),
        }
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}
