use crate::frontend::globals::name_hash;
use crate::lang::data_type::DataType;

/// Named compile-time constant.
#[derive(Debug, Clone, PartialEq)]
pub struct Constant {
    pub name: String,
    pub name_hash: u64,
    pub data_type: DataType,
    pub value: i64,
}

impl Constant {
    pub fn new(name: impl Into<String>, data_type: DataType, value: i64) -> Self {
        let name = name.into();
        Self {
            name_hash: name_hash(&name),
            name,
            data_type,
            value,
        }
    }
}

/// Read-only array of constants, accessed at runtime through a built-in
/// accessor function taking `(array_id, index)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantArray {
    pub id: u32,
    pub name: String,
    pub name_hash: u64,
    pub element_type: DataType,
    pub values: Vec<i64>,
}

impl ConstantArray {
    pub fn new(id: u32, name: impl Into<String>, element_type: DataType, values: Vec<i64>) -> Self {
        let name = name.into();
        Self {
            id,
            name_hash: name_hash(&name),
            name,
            element_type,
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
