use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::bytecode::ir::{Function, FunctionFlags, NativeFunction, Parameter};
use crate::frontend::token::Token;
use crate::lang::constant::{Constant, ConstantArray};
use crate::lang::data_type::DataType;
use crate::lang::variable::Variable;

/// Name of the runtime built-in reading one element of a constant array.
/// There is one overload per element type, each taking `(u32 id, u32 index)`.
pub const CONSTANT_ARRAY_ACCESS: &str = "#builtin_constant_array_access";

/// 64-bit hash of an identifier, used for every symbol lookup.
pub fn name_hash(name: &str) -> u64 {
    murmur2_64(name.as_bytes())
}

/// MurmurHash64A with seed 0, the hash the runtime uses for function and
/// variable names. Call opcodes carry it, so the value must not change.
pub fn murmur2_64(bytes: &[u8]) -> u64 {
    const M: u64 = 0xc6a4_a793_5bd1_e995;
    const R: u32 = 47;

    let mut h = (bytes.len() as u64).wrapping_mul(M);

    let mut chunks = bytes.chunks_exact(8);
    for chunk in &mut chunks {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        let mut k = u64::from_le_bytes(word).wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h ^= k;
        h = h.wrapping_mul(M);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        for (i, &byte) in tail.iter().enumerate() {
            h ^= (byte as u64) << (8 * i);
        }
        h = h.wrapping_mul(M);
    }

    h ^= h >> R;
    h = h.wrapping_mul(M);
    h ^ (h >> R)
}

/// Textual macro: the identifier is replaced by its token sequence.
#[derive(Debug, Clone)]
pub struct Define {
    pub name: String,
    pub data_type: DataType,
    pub content: Vec<Token>,
}

/// What a global identifier resolves to.
#[derive(Debug, Clone)]
pub enum Identifier {
    Variable(Arc<Variable>),
    Constant(Arc<Constant>),
    ConstantArray(Arc<ConstantArray>),
    Define(Arc<Define>),
    DataType(DataType),
}

#[derive(Debug, Clone)]
pub struct FunctionReference {
    pub function: Arc<Function>,
    /// Set when the name used for the lookup is deprecated.
    pub is_deprecated: bool,
}

/// Symbol resolution used by the token processor.
pub trait GlobalsLookup {
    fn resolve_identifier(&self, name_hash: u64) -> Option<&Identifier>;

    /// All overloads registered under a name or alias.
    fn functions_by_name(&self, name_hash: u64) -> &[FunctionReference];
}

/// In-memory symbol table.
#[derive(Debug, Default)]
pub struct Globals {
    identifiers: FxHashMap<u64, Identifier>,
    functions: FxHashMap<u64, Vec<FunctionReference>>,
    next_function_id: u32,
    next_constant_array_id: u32,
}

impl Globals {
    /// Registers the script type keywords and the runtime built-ins.
    pub fn new() -> Self {
        let mut globals = Self::default();
        for data_type in DataType::ALL {
            if data_type != DataType::ConstInt {
                globals
                    .identifiers
                    .insert(name_hash(data_type.name()), Identifier::DataType(data_type));
            }
        }
        for alias in ["int8", "int16", "int"] {
            if let Some(data_type) = DataType::from_name(alias) {
                globals
                    .identifiers
                    .insert(name_hash(alias), Identifier::DataType(data_type));
            }
        }

        for element_type in [
            DataType::U8,
            DataType::U16,
            DataType::U32,
            DataType::U64,
            DataType::S8,
            DataType::S16,
            DataType::S32,
            DataType::S64,
        ] {
            globals.add_function(Function::native(
                CONSTANT_ARRAY_ACCESS,
                element_type,
                vec![
                    Parameter::new("id", DataType::U32),
                    Parameter::new("index", DataType::U32),
                ],
                NativeFunction::runtime_provided(),
            ));
        }
        globals
    }

    pub fn add_variable(&mut self, variable: Variable) -> Arc<Variable> {
        let variable = Arc::new(variable);
        self.identifiers
            .insert(variable.name_hash(), Identifier::Variable(variable.clone()));
        variable
    }

    pub fn add_constant(&mut self, name: impl Into<String>, data_type: DataType, value: i64) -> Arc<Constant> {
        let constant = Arc::new(Constant::new(name, data_type, value));
        self.identifiers
            .insert(constant.name_hash, Identifier::Constant(constant.clone()));
        constant
    }

    pub fn add_constant_array(
        &mut self,
        name: impl Into<String>,
        element_type: DataType,
        values: Vec<i64>,
    ) -> Arc<ConstantArray> {
        let array = Arc::new(ConstantArray::new(
            self.next_constant_array_id,
            name,
            element_type,
            values,
        ));
        self.next_constant_array_id += 1;
        self.identifiers
            .insert(array.name_hash, Identifier::ConstantArray(array.clone()));
        array
    }

    pub fn add_define(&mut self, name: impl Into<String>, data_type: DataType, content: Vec<Token>) -> Arc<Define> {
        let define = Arc::new(Define {
            name: name.into(),
            data_type,
            content,
        });
        self.identifiers
            .insert(name_hash(&define.name), Identifier::Define(define.clone()));
        define
    }

    /// Assigns the function id and registers it under its name and aliases.
    pub fn add_function(&mut self, mut function: Function) -> Arc<Function> {
        function.id = self.next_function_id;
        self.next_function_id += 1;
        let function = Arc::new(function);

        let deprecated = function.flags.contains(FunctionFlags::DEPRECATED);
        self.functions
            .entry(name_hash(&function.name))
            .or_default()
            .push(FunctionReference {
                function: function.clone(),
                is_deprecated: deprecated,
            });
        for alias in &function.alias_names {
            self.functions
                .entry(name_hash(&alias.name))
                .or_default()
                .push(FunctionReference {
                    function: function.clone(),
                    is_deprecated: alias.is_deprecated,
                });
        }
        function
    }
}

impl GlobalsLookup for Globals {
    fn resolve_identifier(&self, name_hash: u64) -> Option<&Identifier> {
        self.identifiers.get(&name_hash)
    }

    fn functions_by_name(&self, name_hash: u64) -> &[FunctionReference] {
        self.functions.get(&name_hash).map_or(&[], |v| v.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::ir::AliasName;

    #[test]
    fn test_name_hash_is_stable_and_distinct() {
        assert_eq!(name_hash("value"), name_hash("value"));
        assert_ne!(name_hash("value"), name_hash("values"));
    }

    #[test]
    fn test_name_hash_reference_values() {
        assert_eq!(name_hash(""), 0);
        assert_eq!(name_hash("a"), 0x0717_17d2_d36b_6b11);
        assert_eq!(name_hash("main"), 0x293b_b3b1_982c_6d5a);
        // one full 8-byte block plus a tail
        assert_eq!(name_hash("score_value"), 0xfef5_2a46_97b0_0d3d);
    }

    #[test]
    fn test_type_keywords_resolve() {
        let globals = Globals::new();
        assert!(matches!(
            globals.resolve_identifier(name_hash("u16")),
            Some(Identifier::DataType(DataType::U16))
        ));
        assert!(matches!(
            globals.resolve_identifier(name_hash("int")),
            Some(Identifier::DataType(DataType::S32))
        ));
        assert!(globals.resolve_identifier(name_hash("const_int")).is_none());
    }

    #[test]
    fn test_constant_array_builtins_registered() {
        let globals = Globals::new();
        let overloads = globals.functions_by_name(name_hash(CONSTANT_ARRAY_ACCESS));
        assert_eq!(overloads.len(), 8);
        assert!(overloads.iter().any(|r| r.function.return_type == DataType::S16));
    }

    #[test]
    fn test_variables_and_constants() {
        let mut globals = Globals::new();
        globals.add_variable(Variable::global("score", 0, DataType::U32, 0));
        globals.add_constant("LIMIT", DataType::U8, 40);

        assert!(matches!(
            globals.resolve_identifier(name_hash("score")),
            Some(Identifier::Variable(v)) if v.name() == "score"
        ));
        assert!(matches!(
            globals.resolve_identifier(name_hash("LIMIT")),
            Some(Identifier::Constant(c)) if c.value == 40
        ));
    }

    #[test]
    fn test_constant_arrays_get_sequential_ids() {
        let mut globals = Globals::new();
        let a = globals.add_constant_array("a", DataType::U8, vec![1, 2]);
        let b = globals.add_constant_array("b", DataType::U8, vec![3]);
        assert_eq!(a.id, 0);
        assert_eq!(b.id, 1);
    }

    #[test]
    fn test_function_aliases_share_the_function() {
        let mut globals = Globals::new();
        let mut function = Function::script("draw", DataType::Void, Vec::new());
        function.alias_names.push(AliasName {
            name: "render".to_string(),
            is_deprecated: true,
        });
        let function = globals.add_function(function);

        let by_name = globals.functions_by_name(name_hash("draw"));
        let by_alias = globals.functions_by_name(name_hash("render"));
        assert_eq!(by_name.len(), 1);
        assert!(!by_name[0].is_deprecated);
        assert!(by_alias[0].is_deprecated);
        assert!(Arc::ptr_eq(&by_alias[0].function, &function));
        assert!(globals.functions_by_name(name_hash("nothing")).is_empty());
    }
}
