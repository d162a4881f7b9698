use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lang::data_type::DataType;

/// Variable identifier; the high nibble encodes the variable kind.
///
/// | kind     | range                     |
/// |----------|---------------------------|
/// | local    | 0x00000000 ..= 0x0fffffff |
/// | global   | 0x10000000 ..= 0x1fffffff |
/// | user     | 0x20000000 ..= 0x2fffffff |
/// | external | 0x30000000 ..= 0x3fffffff |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VariableId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableType {
    Local = 0,
    Global = 1,
    User = 2,
    External = 3,
}

impl VariableId {
    const INDEX_MASK: u32 = 0x0fff_ffff;

    pub fn new(kind: VariableType, index: u32) -> Option<VariableId> {
        if index > Self::INDEX_MASK {
            return None;
        }
        Some(VariableId(((kind as u32) << 28) | index))
    }

    pub fn variable_type(self) -> Option<VariableType> {
        match self.0 >> 28 {
            0 => Some(VariableType::Local),
            1 => Some(VariableType::Global),
            2 => Some(VariableType::User),
            3 => Some(VariableType::External),
            _ => None,
        }
    }

    pub fn index(self) -> u32 {
        self.0 & Self::INDEX_MASK
    }
}

pub type VariableGetter = Arc<dyn Fn() -> i64 + Send + Sync>;
pub type VariableSetter = Arc<dyn Fn(i64) + Send + Sync>;

#[derive(Clone)]
pub enum VariableKind {
    /// Lives on the function's variable stack; the value is owned by the runtime.
    Local,
    /// Lives in the runtime's global table.
    Global { initial_value: i64 },
    /// Backed by host callbacks.
    User {
        getter: Option<VariableGetter>,
        setter: Option<VariableSetter>,
    },
    /// Backed by host-owned storage.
    External { storage: Arc<AtomicI64> },
}

impl VariableKind {
    pub fn variable_type(&self) -> VariableType {
        match self {
            VariableKind::Local => VariableType::Local,
            VariableKind::Global { .. } => VariableType::Global,
            VariableKind::User { .. } => VariableType::User,
            VariableKind::External { .. } => VariableType::External,
        }
    }
}

impl std::fmt::Debug for VariableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VariableKind::Local => write!(f, "Local"),
            VariableKind::Global { initial_value } => {
                write!(f, "Global {{ initial_value: {} }}", initial_value)
            }
            VariableKind::User { getter, setter } => write!(
                f,
                "User {{ getter: {}, setter: {} }}",
                getter.is_some(),
                setter.is_some()
            ),
            VariableKind::External { storage } => {
                write!(f, "External {{ value: {} }}", storage.load(Ordering::Relaxed))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("variable id {id:?} is outside the {expected:?} range")]
pub struct VariableIdMismatch {
    pub id: VariableId,
    pub expected: VariableType,
}

#[derive(Debug, Clone)]
pub struct Variable {
    name: String,
    name_hash: u64,
    id: VariableId,
    data_type: DataType,
    kind: VariableKind,
}

impl Variable {
    /// Fails when the id's kind nibble disagrees with `kind`.
    pub fn new(
        name: impl Into<String>,
        id: VariableId,
        data_type: DataType,
        kind: VariableKind,
    ) -> Result<Self, VariableIdMismatch> {
        let expected = kind.variable_type();
        if id.variable_type() != Some(expected) {
            return Err(VariableIdMismatch { id, expected });
        }
        let name = name.into();
        Ok(Self {
            name_hash: crate::frontend::globals::name_hash(&name),
            name,
            id,
            data_type,
            kind,
        })
    }

    pub fn local(name: impl Into<String>, index: u32, data_type: DataType) -> Self {
        Self::with_index(name, VariableType::Local, index, data_type, VariableKind::Local)
    }

    pub fn global(name: impl Into<String>, index: u32, data_type: DataType, initial_value: i64) -> Self {
        Self::with_index(
            name,
            VariableType::Global,
            index,
            data_type,
            VariableKind::Global { initial_value },
        )
    }

    pub fn user(
        name: impl Into<String>,
        index: u32,
        data_type: DataType,
        getter: Option<VariableGetter>,
        setter: Option<VariableSetter>,
    ) -> Self {
        Self::with_index(
            name,
            VariableType::User,
            index,
            data_type,
            VariableKind::User { getter, setter },
        )
    }

    pub fn external(name: impl Into<String>, index: u32, data_type: DataType, storage: Arc<AtomicI64>) -> Self {
        Self::with_index(
            name,
            VariableType::External,
            index,
            data_type,
            VariableKind::External { storage },
        )
    }

    fn with_index(
        name: impl Into<String>,
        variable_type: VariableType,
        index: u32,
        data_type: DataType,
        kind: VariableKind,
    ) -> Self {
        let id = VariableId(((variable_type as u32) << 28) | (index & VariableId::INDEX_MASK));
        let name = name.into();
        Self {
            name_hash: crate::frontend::globals::name_hash(&name),
            name,
            id,
            data_type,
            kind,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn name_hash(&self) -> u64 {
        self.name_hash
    }

    pub fn id(&self) -> VariableId {
        self.id
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn kind(&self) -> &VariableKind {
        &self.kind
    }

    pub fn variable_type(&self) -> VariableType {
        self.kind.variable_type()
    }

    /// Host-side value access. Local and global variables are owned by the
    /// runtime, so they read as 0 here (globals as their initial value).
    pub fn get_value(&self) -> i64 {
        match &self.kind {
            VariableKind::Local => 0,
            VariableKind::Global { initial_value } => *initial_value,
            VariableKind::User { getter, .. } => getter.as_ref().map_or(0, |g| g()),
            VariableKind::External { storage } => storage.load(Ordering::Relaxed),
        }
    }

    pub fn set_value(&self, value: i64) {
        match &self.kind {
            VariableKind::Local | VariableKind::Global { .. } => {}
            VariableKind::User { setter, .. } => {
                if let Some(s) = setter {
                    s(value);
                }
            }
            VariableKind::External { storage } => storage.store(value, Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_id_ranges() {
        let id = VariableId::new(VariableType::Global, 5).unwrap();
        assert_eq!(id.0, 0x1000_0005);
        assert_eq!(id.variable_type(), Some(VariableType::Global));
        assert_eq!(id.index(), 5);
        assert_eq!(VariableId(0x4000_0000).variable_type(), None);
        assert!(VariableId::new(VariableType::Local, 0x1000_0000).is_none());
    }

    #[test]
    fn test_constructor_rejects_mismatching_range() {
        let err = Variable::new("x", VariableId(0x1000_0000), DataType::U8, VariableKind::Local)
            .unwrap_err();
        assert_eq!(err.expected, VariableType::Local);
        assert!(err.to_string().contains("outside"));

        let ok = Variable::new(
            "x",
            VariableId(0x1000_0001),
            DataType::U8,
            VariableKind::Global { initial_value: 3 },
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn test_typed_constructors_encode_kind() {
        assert_eq!(Variable::local("a", 2, DataType::U8).id().0, 0x0000_0002);
        assert_eq!(Variable::global("b", 2, DataType::U8, 0).id().0, 0x1000_0002);
        assert_eq!(
            Variable::user("c", 2, DataType::U8, None, None).id().0,
            0x2000_0002
        );
        let storage = Arc::new(AtomicI64::new(0));
        assert_eq!(
            Variable::external("d", 2, DataType::U8, storage).id().0,
            0x3000_0002
        );
    }

    #[test]
    fn test_user_variable_uses_callbacks() {
        let cell = Arc::new(Mutex::new(7i64));
        let read = cell.clone();
        let write = cell.clone();
        let v = Variable::user(
            "counter",
            0,
            DataType::S32,
            Some(Arc::new(move || *read.lock().unwrap())),
            Some(Arc::new(move |x| *write.lock().unwrap() = x)),
        );
        assert_eq!(v.get_value(), 7);
        v.set_value(42);
        assert_eq!(*cell.lock().unwrap(), 42);
    }

    #[test]
    fn test_external_variable_shares_storage() {
        let storage = Arc::new(AtomicI64::new(1));
        let v = Variable::external("ext", 0, DataType::U32, storage.clone());
        v.set_value(99);
        assert_eq!(storage.load(Ordering::Relaxed), 99);
        assert_eq!(v.get_value(), 99);
    }

    #[test]
    fn test_global_reads_initial_value() {
        let v = Variable::global("g", 0, DataType::U16, 12);
        assert_eq!(v.get_value(), 12);
        v.set_value(3);
        assert_eq!(v.get_value(), 12);
    }
}
