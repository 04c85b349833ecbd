use std::{fmt::Display, mem::size_of};

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::error::{DbError, DbResult};

/// Maximum number of bytes stored for a string field.
pub const STRING_LEN: usize = 128;

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum Type {
    Int,
    String,
}

impl Type {
    /// Number of bytes a field of this type occupies inside a slot.
    pub fn len(&self) -> usize {
        match self {
            Type::Int => size_of::<i32>(),
            Type::String => size_of::<u32>() + STRING_LEN,
        }
    }

    /// Decode a field of this type from the start of `buf`.
    pub fn parse(&self, buf: &[u8]) -> DbResult<Field> {
        match self {
            Type::Int => Ok(Field::Int(LittleEndian::read_i32(&buf[..size_of::<i32>()]))),
            Type::String => {
                let len = (LittleEndian::read_u32(&buf[..size_of::<u32>()]) as usize).min(STRING_LEN);
                let start = size_of::<u32>();
                let s = String::from_utf8(buf[start..start + len].to_vec())
                    .map_err(|e| DbError::TypeMismatch(e.to_string()))?;
                Ok(Field::Str(s))
            }
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum Field {
    Int(i32),
    Str(String),
}

impl Field {
    pub fn field_type(&self) -> Type {
        match self {
            Field::Int(_) => Type::Int,
            Field::Str(_) => Type::String,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Field::Int(i) => Some(*i),
            Field::Str(_) => None,
        }
    }

    /// The value as it reads back from disk: strings are cut to at most `STRING_LEN` bytes,
    /// on a char boundary.
    pub fn truncated(self) -> Self {
        match self {
            Field::Str(mut s) => {
                s.truncate(stored_len(&s));
                Field::Str(s)
            }
            int => int,
        }
    }

    /// Encode into the start of `buf`, which must hold at least `field_type().len()` bytes.
    /// Strings longer than `STRING_LEN` are truncated.
    pub fn serialize(&self, buf: &mut [u8]) {
        match self {
            Field::Int(i) => LittleEndian::write_i32(&mut buf[..size_of::<i32>()], *i),
            Field::Str(s) => {
                let bytes = s.as_bytes();
                let len = stored_len(s);
                let start = size_of::<u32>();
                LittleEndian::write_u32(&mut buf[..start], len as u32);
                buf[start..start + len].copy_from_slice(&bytes[..len]);
                buf[start + len..start + STRING_LEN].fill(0);
            }
        }
    }
}

fn stored_len(s: &str) -> usize {
    let mut len = s.len().min(STRING_LEN);
    while !s.is_char_boundary(len) {
        len -= 1;
    }
    len
}

impl Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{}", i),
            Self::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<i32> for Field {
    fn from(value: i32) -> Self {
        Field::Int(value)
    }
}

impl From<&str> for Field {
    fn from(value: &str) -> Self {
        Field::Str(value.to_string()).truncated()
    }
}
