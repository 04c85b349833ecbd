use std::fmt::Display;

use crate::{
    error::{DbError, DbResult},
    field::Type,
};

#[derive(Clone, Debug)]
pub struct TdItem {
    pub field_type: Type,
    pub name: Option<String>,
}

/// The schema of a tuple: an ordered list of typed, optionally named fields.
///
/// Two descriptors are equal when their field types match position by position; names are
/// ignored, since they only matter to the operators that project or rename columns.
#[derive(Clone, Debug)]
pub struct TupleDesc {
    items: Vec<TdItem>,
}

impl TupleDesc {
    /// Create a descriptor of named fields.
    pub fn new(fields: &[(Type, &str)]) -> Self {
        Self {
            items: fields
                .iter()
                .map(|(t, n)| TdItem {
                    field_type: *t,
                    name: Some(n.to_string()),
                })
                .collect(),
        }
    }

    /// Create a descriptor with anonymous fields.
    pub fn from_types(types: &[Type]) -> Self {
        Self {
            items: types
                .iter()
                .map(|t| TdItem {
                    field_type: *t,
                    name: None,
                })
                .collect(),
        }
    }

    pub fn from_items(items: Vec<TdItem>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[TdItem] {
        &self.items
    }

    pub fn num_fields(&self) -> usize {
        self.items.len()
    }

    pub fn field_type(&self, i: usize) -> DbResult<Type> {
        self.items
            .get(i)
            .map(|item| item.field_type)
            .ok_or_else(|| DbError::NoSuchField(i.to_string()))
    }

    pub fn field_name(&self, i: usize) -> DbResult<Option<&str>> {
        self.items
            .get(i)
            .map(|item| item.name.as_deref())
            .ok_or_else(|| DbError::NoSuchField(i.to_string()))
    }

    pub fn index_of(&self, name: &str) -> DbResult<usize> {
        self.items
            .iter()
            .position(|item| item.name.as_deref() == Some(name))
            .ok_or_else(|| DbError::NoSuchField(name.to_string()))
    }

    /// Size in bytes of a tuple with this descriptor.
    pub fn byte_size(&self) -> usize {
        self.items.iter().map(|item| item.field_type.len()).sum()
    }

    /// Byte offset of field `i` within a tuple slot.
    pub fn offset(&self, i: usize) -> usize {
        self.items[..i].iter().map(|item| item.field_type.len()).sum()
    }

    /// Concatenate two descriptors.
    pub fn merge(a: &TupleDesc, b: &TupleDesc) -> TupleDesc {
        let mut items = a.items.clone();
        items.extend(b.items.iter().cloned());
        TupleDesc { items }
    }
}

impl PartialEq for TupleDesc {
    fn eq(&self, other: &Self) -> bool {
        self.items.len() == other.items.len()
            && self
                .items
                .iter()
                .zip(other.items.iter())
                .all(|(a, b)| a.field_type == b.field_type)
    }
}

impl Eq for TupleDesc {}

impl Display for TupleDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .items
            .iter()
            .map(|item| format!("{:?}({})", item.field_type, item.name.as_deref().unwrap_or("null")))
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}
