use crate::bytecode::verify::VerifyError;
use crate::lang::data_type::DataType;

pub type Result<T> = std::result::Result<T, CompileError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// A problem in the script; aborts the statement it was found in
    Script {
        line: u32,
        message: String,
        hint: Option<String>,
    },
    /// Internal compiler error (shouldn't happen in normal use)
    Internal(String),
}

impl CompileError {
    pub fn new(line: u32, message: impl Into<String>) -> Self {
        CompileError::Script {
            line,
            message: message.into(),
            hint: None,
        }
    }

    pub fn with_hint(line: u32, message: impl Into<String>, hint: impl Into<String>) -> Self {
        CompileError::Script {
            line,
            message: message.into(),
            hint: Some(hint.into()),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        CompileError::Internal(msg.into())
    }

    pub fn unresolved_identifier(line: u32, name: &str) -> Self {
        Self::with_hint(
            line,
            format!("Unable to resolve identifier: {}", name),
            "variables must be defined before use, either globally or in an enclosing block",
        )
    }

    pub fn invalid_cast(line: u32, from: DataType, to: DataType) -> Self {
        Self::new(line, format!("Cannot cast from {} to {}", from, to))
    }

    /// Line of the offending statement; `None` for internal errors.
    pub fn line(&self) -> Option<u32> {
        match self {
            CompileError::Script { line, .. } => Some(*line),
            CompileError::Internal(_) => None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            CompileError::Script { message, .. } => message,
            CompileError::Internal(msg) => msg,
        }
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileError::Script { line, message, hint } => {
                write!(f, "compile error in line {}: {}", line, message)?;
                if let Some(h) = hint {
                    write!(f, "\n  hint: {}", h)?;
                }
                Ok(())
            }
            CompileError::Internal(msg) => {
                write!(f, "compile error: internal error: {}", msg)
            }
        }
    }
}

impl std::error::Error for CompileError {}

impl From<VerifyError> for CompileError {
    fn from(err: VerifyError) -> Self {
        CompileError::Internal(err.to_string())
    }
}

// =============================================================================
// Warnings
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningCode {
    DeprecatedFunction,
    DeprecatedFunctionAlias,
}

/// Non-fatal diagnostic; compilation continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerWarning {
    pub line: u32,
    pub code: WarningCode,
    pub message: String,
}

impl std::fmt::Display for CompilerWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "warning in line {}: {}", self.line, self.message)
    }
}
