//! Runtime field values

use crate::model::Model;
use crate::schema::{FieldDescriptor, FieldType};

/// Value of a set field
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    Message(Model),
    /// Elements of a repeated field
    List(Vec<Value>),
}

impl Value {
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::UInt(u) => Some(*u),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(d) => Some(*d),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_message(&self) -> Option<&Model> {
        match self {
            Self::Message(m) => Some(m),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Short name of the value's variant, for error messages
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int64",
            Self::UInt(_) => "uint64",
            Self::Double(_) => "double",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Message(_) => "message",
            Self::List(_) => "list",
        }
    }

    /// Render a scalar ID value as a string
    #[must_use]
    pub fn to_id_string(&self) -> Option<String> {
        match self {
            Self::String(s) => Some(s.clone()),
            Self::Int(i) => Some(i.to_string()),
            Self::UInt(u) => Some(u.to_string()),
            _ => None,
        }
    }

    /// Check that this value fits a singular field of type `ty`
    pub(crate) fn is_instance_of(&self, ty: &FieldType) -> bool {
        match (self, ty) {
            (Self::Bool(_), FieldType::Bool)
            | (Self::Int(_), FieldType::Int64)
            | (Self::UInt(_), FieldType::UInt64)
            | (Self::Double(_), FieldType::Double)
            | (Self::String(_), FieldType::String)
            | (Self::Bytes(_), FieldType::Bytes) => true,
            (Self::Message(m), FieldType::Message(schema)) => m.type_name() == schema.full_name(),
            _ => false,
        }
    }

    /// Check that this value fits the field, including repeated-ness
    pub(crate) fn fits(&self, field: &FieldDescriptor) -> bool {
        match self {
            Self::List(items) if field.is_repeated() => {
                items.iter().all(|item| item.is_instance_of(field.ty()))
            }
            _ if field.is_repeated() => false,
            value => value.is_instance_of(field.ty()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<u64> for Value {
    fn from(u: u64) -> Self {
        Self::UInt(u)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Self::Double(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(b)
    }
}

impl From<Model> for Value {
    fn from(m: Model) -> Self {
        Self::Message(m)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}
