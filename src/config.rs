//! Compiler options.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lang::data_type::DataType;

/// Result type for option loading.
pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Error, Debug)]
pub enum ConfigError {
    /// Options file could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Options file is not valid TOML or has wrong field types
    #[error("Invalid compile options: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Options for compiling script functions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Language revision the scripts are written for. From level 2 on an
    /// unused comparison result is an error.
    pub script_feature_level: u32,

    /// Run the opcode optimizer when a function is finished
    pub optimize: bool,

    /// Check the optimized opcodes for structural problems
    pub verify: bool,

    /// Upper bound for optimizer rounds per function
    pub max_optimizer_rounds: u32,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            script_feature_level: 2,
            optimize: true,
            verify: true,
            max_optimizer_rounds: 16,
        }
    }
}

impl CompileOptions {
    /// Type that `call` and `jump` arguments are cast to.
    pub const EXTERNAL_ADDRESS_TYPE: DataType = DataType::U64;

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Reads options from a TOML file; missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = CompileOptions::default();
        assert_eq!(options.script_feature_level, 2);
        assert!(options.optimize);
        assert!(options.verify);
        assert_eq!(options.max_optimizer_rounds, 16);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let options = CompileOptions::from_toml_str("optimize = false\nscript_feature_level = 1\n").unwrap();
        assert!(!options.optimize);
        assert_eq!(options.script_feature_level, 1);
        assert!(options.verify);
        assert_eq!(options.max_optimizer_rounds, 16);
    }

    #[test]
    fn test_invalid_toml() {
        let err = CompileOptions::from_toml_str("optimize = \"yes\"").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
        assert!(err.to_string().contains("Invalid compile options"));
    }

    #[test]
    fn test_missing_file() {
        let err = CompileOptions::load(Path::new("/nonexistent/lemonc.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
