use std::sync::Arc;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::bytecode::Opcode;
use crate::frontend::globals::{murmur2_64, name_hash};
use crate::lang::data_type::DataType;
use crate::lang::variable::Variable;

// =============================================================================
// FUNCTIONS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasName {
    pub name: String,
    #[serde(default)]
    pub is_deprecated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub data_type: DataType,
}

impl Parameter {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct FunctionFlags: u8 {
        const ALLOW_INLINE_EXECUTION = 0x01;
        /// Calls with constant arguments may be evaluated by the compiler.
        const COMPILE_TIME_CONSTANT = 0x02;
        const DEPRECATED = 0x04;
        const EXCLUDE_FROM_DEFINITIONS = 0x80;
    }
}

pub type NativeCallable = Arc<dyn Fn(&[i64]) -> i64 + Send + Sync>;

/// Host-side function. The runtime binds the implementation; the compiler
/// only needs the callable for compile-time evaluation.
#[derive(Clone, Default)]
pub struct NativeFunction {
    pub callable: Option<NativeCallable>,
}

impl NativeFunction {
    /// Implemented by the runtime, nothing to call at compile time.
    pub fn runtime_provided() -> Self {
        Self { callable: None }
    }

    pub fn with_callable(callable: impl Fn(&[i64]) -> i64 + Send + Sync + 'static) -> Self {
        Self {
            callable: Some(Arc::new(callable)),
        }
    }

    pub fn call(&self, arguments: &[i64]) -> Option<i64> {
        self.callable.as_ref().map(|f| f(arguments))
    }
}

impl std::fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NativeFunction {{ callable: {} }}", self.callable.is_some())
    }
}

#[derive(Debug, Clone)]
pub enum FunctionKind {
    Script(ScriptFunction),
    Native(NativeFunction),
}

#[derive(Debug, Clone)]
pub struct Function {
    /// Assigned on registration; unique per symbol table.
    pub id: u32,
    pub name: String,
    pub alias_names: Vec<AliasName>,
    pub return_type: DataType,
    pub parameters: Vec<Parameter>,
    pub flags: FunctionFlags,
    pub kind: FunctionKind,
}

impl Function {
    pub fn script(name: impl Into<String>, return_type: DataType, parameters: Vec<Parameter>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            alias_names: Vec::new(),
            return_type,
            parameters,
            flags: FunctionFlags::empty(),
            kind: FunctionKind::Script(ScriptFunction::default()),
        }
    }

    pub fn native(
        name: impl Into<String>,
        return_type: DataType,
        parameters: Vec<Parameter>,
        native: NativeFunction,
    ) -> Self {
        Self {
            id: 0,
            name: name.into(),
            alias_names: Vec::new(),
            return_type,
            parameters,
            flags: FunctionFlags::empty(),
            kind: FunctionKind::Native(native),
        }
    }

    pub fn with_flags(mut self, flags: FunctionFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn name_hash(&self) -> u64 {
        name_hash(&self.name)
    }

    pub fn parameter_types(&self) -> Vec<DataType> {
        self.parameters.iter().map(|p| p.data_type).collect()
    }

    pub fn signature_hash(&self) -> u32 {
        signature_hash(self.return_type, self.parameters.iter().map(|p| p.data_type))
    }

    /// Parameter of `CALL`: identifies one overload of one name.
    pub fn name_and_signature_hash(&self) -> u64 {
        self.name_hash().wrapping_add(self.signature_hash() as u64)
    }

    pub fn as_script(&self) -> Option<&ScriptFunction> {
        match &self.kind {
            FunctionKind::Script(script) => Some(script),
            FunctionKind::Native(_) => None,
        }
    }

    pub fn as_script_mut(&mut self) -> Option<&mut ScriptFunction> {
        match &mut self.kind {
            FunctionKind::Script(script) => Some(script),
            FunctionKind::Native(_) => None,
        }
    }

    pub fn as_native(&self) -> Option<&NativeFunction> {
        match &self.kind {
            FunctionKind::Native(native) => Some(native),
            FunctionKind::Script(_) => None,
        }
    }

    /// Interprets `pragma` entries like `alias(name) deprecated` or
    /// `address-hook(0x1234) off`. The pragma text is kept unless
    /// `consume_if_processed` is set and it declared an address hook.
    pub fn add_or_process_pragma(&mut self, pragma: &str, consume_if_processed: bool) {
        let entries = split_pragma(pragma);
        let mut had_address_hook = false;
        let mut last_hook: Option<usize> = None;
        let mut had_alias = false;

        for (argument, value) in &entries {
            match *argument {
                "alias" => {
                    self.alias_names.push(AliasName {
                        name: value.to_string(),
                        is_deprecated: false,
                    });
                    had_alias = true;
                }
                "address-hook" => {
                    let Some(address) = parse_integer(value) else {
                        tracing::warn!(pragma, "address hook without a valid value");
                        continue;
                    };
                    if let Some(script) = self.as_script_mut() {
                        script.address_hooks.push(AddressHook {
                            address: address as u32,
                            disabled: false,
                        });
                        last_hook = Some(script.address_hooks.len() - 1);
                    }
                    had_address_hook = true;
                }
                "translated" => had_address_hook = true,
                "off" => {
                    if let (Some(index), Some(script)) = (last_hook, self.as_script_mut()) {
                        script.address_hooks[index].disabled = true;
                    }
                }
                "deprecated" => match self.alias_names.last_mut() {
                    Some(alias) if had_alias => alias.is_deprecated = true,
                    _ => self.flags.insert(FunctionFlags::DEPRECATED),
                },
                _ => {}
            }
        }

        if !entries.is_empty() && consume_if_processed && had_address_hook {
            return;
        }
        if let Some(script) = self.as_script_mut() {
            script.pragmas.push(pragma.to_string());
        }
    }
}

/// Splits `a(1) b c(x)` into `[("a", "1"), ("b", ""), ("c", "x")]`.
fn split_pragma(pragma: &str) -> Vec<(&str, &str)> {
    let mut entries = Vec::new();
    let mut rest = pragma.trim_start();
    while !rest.is_empty() {
        let end = rest
            .find(|c: char| c.is_whitespace() || c == '(')
            .unwrap_or(rest.len());
        let argument = &rest[..end];
        rest = &rest[end..];

        let mut value = "";
        if let Some(inner) = rest.strip_prefix('(') {
            let close = inner.find(')').unwrap_or(inner.len());
            value = inner[..close].trim();
            rest = inner.get(close + 1..).unwrap_or("");
        }
        if !argument.is_empty() {
            entries.push((argument, value));
        }
        rest = rest.trim_start();
    }
    entries
}

fn parse_integer(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()
    } else {
        text.parse().ok()
    }
}

// =============================================================================
// SIGNATURE HASH
// =============================================================================

/// CRC32 over the base types of return value and parameters. Never 0.
pub fn signature_hash(return_type: DataType, parameters: impl IntoIterator<Item = DataType>) -> u32 {
    let mut data = vec![return_type.base_type().bits()];
    data.extend(parameters.into_iter().map(|t| t.base_type().bits()));
    let mut hash = crc32fast::hash(&data);
    while hash == 0 {
        data.push(0xcd);
        hash = crc32fast::hash(&data);
    }
    hash
}

// =============================================================================
// SCRIPT FUNCTIONS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressHook {
    pub address: u32,
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub offset: u32,
    #[serde(default)]
    pub address_hooks: Vec<AddressHook>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalVariable {
    pub name: String,
    pub data_type: DataType,
    pub id: u32,
    pub memory_offset: usize,
    pub memory_size: usize,
}

impl LocalVariable {
    pub fn name_hash(&self) -> u64 {
        name_hash(&self.name)
    }

    pub fn to_variable(&self) -> Variable {
        Variable::local(self.name.clone(), self.id, self.data_type)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub file_name: String,
    pub start_line: u32,
    /// Added to line numbers when reporting to the user.
    pub line_offset: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptFunction {
    pub opcodes: Vec<Opcode>,
    pub labels: Vec<Label>,
    pub address_hooks: Vec<AddressHook>,
    pub pragmas: Vec<String>,
    pub local_variables: Vec<LocalVariable>,
    pub local_variables_memory_size: usize,
    pub source: SourceInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("variable '{0}' already exists")]
pub struct DuplicateLocalVariable(pub String);

impl ScriptFunction {
    pub fn new(opcodes: Vec<Opcode>) -> Self {
        Self {
            opcodes,
            ..Self::default()
        }
    }

    /// Adds a local variable slot; memory is reserved in multiples of 8 bytes.
    pub fn add_local_variable(
        &mut self,
        name: impl Into<String>,
        data_type: DataType,
    ) -> Result<&LocalVariable, DuplicateLocalVariable> {
        let name = name.into();
        let hash = name_hash(&name);
        if self.local_variable_by_hash(hash).is_some() {
            return Err(DuplicateLocalVariable(name));
        }

        let memory_size = data_type.bytes().div_ceil(8) * 8;
        let variable = LocalVariable {
            name,
            data_type,
            id: self.local_variables.len() as u32,
            memory_offset: self.local_variables_memory_size,
            memory_size,
        };
        self.local_variables_memory_size += memory_size;
        self.local_variables.push(variable);
        Ok(&self.local_variables[self.local_variables.len() - 1])
    }

    pub fn local_variable_by_hash(&self, hash: u64) -> Option<&LocalVariable> {
        self.local_variables.iter().find(|v| v.name_hash() == hash)
    }

    pub fn local_variable_by_id(&self, id: u32) -> Option<&LocalVariable> {
        self.local_variables.get(id as usize)
    }

    pub fn add_label(&mut self, name: impl Into<String>, offset: usize, address_hooks: Vec<AddressHook>) {
        self.labels.push(Label {
            name: name.into(),
            offset: offset as u32,
            address_hooks,
        });
    }

    pub fn find_label_by_name(&self, name: &str) -> Option<&Label> {
        self.labels.iter().find(|l| l.name == name)
    }

    /// First label at `offset`.
    pub fn find_label_by_offset(&self, offset: usize) -> Option<&Label> {
        self.labels.iter().find(|l| l.offset as usize == offset)
    }

    /// Hash of the executable content, used to detect changed functions
    /// between builds.
    pub fn compiled_hash(&self, seed: u64) -> u64 {
        let mut data = Vec::with_capacity(8 + self.opcodes.len() * 10);
        data.extend_from_slice(&seed.to_le_bytes());
        for opcode in &self.opcodes {
            data.push(opcode.kind as u8);
            data.push(opcode.data_type.bits());
            if opcode.parameter != 0 {
                data.extend_from_slice(&opcode.parameter.to_le_bytes());
            }
        }
        murmur2_64(&data)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}
