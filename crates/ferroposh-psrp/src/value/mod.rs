mod deserialize;
mod escape;
mod serialize;

pub use deserialize::from_clixml;
pub use escape::{decode_ps_string, encode_ps_string};
pub use serialize::to_clixml;

use std::fmt::Display;

use uuid::Uuid;

/// A value in the PSRP serialization model.
///
/// This is a flattened form of the CLIXML object graph: primitives,
/// containers, and property-bag objects are all variants of one enum
/// instead of the layered primitive/complex split the full protocol
/// uses. Everything the server emits or parses round-trips through
/// this type.
#[derive(Debug, Clone, PartialEq)]
pub enum PsValue {
    Nil,
    Bool(bool),
    I32(i32),
    I64(i64),
    Str(String),
    Version(String),
    Guid(Uuid),
    List(Vec<PsValue>),
    Dict(Vec<(PsValue, PsValue)>),
    Object(Box<PsObject>),
}

/// A CLIXML `<Obj>`: optional type names, optional ToString, an optional
/// wrapped value (extended primitive or container), and named extended
/// properties.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PsObject {
    pub type_names: Vec<String>,
    pub to_string: Option<String>,
    pub value: Option<PsValue>,
    pub properties: Vec<PsProperty>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PsProperty {
    pub name: String,
    pub value: PsValue,
}

impl PsObject {
    pub fn with_type(type_names: &[&str]) -> Self {
        Self {
            type_names: type_names.iter().map(ToString::to_string).collect(),
            ..Self::default()
        }
    }

    pub fn push_property(&mut self, name: &str, value: PsValue) {
        self.properties.push(PsProperty {
            name: name.to_string(),
            value,
        });
    }

    pub fn property(&self, name: &str) -> Option<&PsValue> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.value)
    }
}

impl PsValue {
    pub fn object(obj: PsObject) -> Self {
        Self::Object(Box::new(obj))
    }

    pub fn str(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }

    pub fn as_object(&self) -> Option<&PsObject> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::I64(v) => Some(*v),
            Self::I32(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[PsValue]> {
        match self {
            Self::List(items) => Some(items),
            Self::Object(obj) => match &obj.value {
                Some(Self::List(items)) => Some(items),
                _ => None,
            },
            _ => None,
        }
    }

    /// .NET-flavored runtime type name, used when normalizing error
    /// category targets.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "Object",
            Self::Bool(_) => "Boolean",
            Self::I32(_) => "Int32",
            Self::I64(_) => "Int64",
            Self::Str(_) => "String",
            Self::Version(_) => "Version",
            Self::Guid(_) => "Guid",
            Self::List(_) => "ArrayList",
            Self::Dict(_) => "Hashtable",
            Self::Object(_) => "PSObject",
        }
    }
}

impl Display for PsValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            // PowerShell $null stringifies to the empty string
            Self::Nil => Ok(()),
            Self::Bool(b) => write!(f, "{b}"),
            Self::I32(v) => write!(f, "{v}"),
            Self::I64(v) => write!(f, "{v}"),
            Self::Str(s) | Self::Version(s) => write!(f, "{s}"),
            Self::Guid(g) => write!(f, "{g}"),
            Self::List(items) => {
                let rendered: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "{}", rendered.join(" "))
            }
            Self::Dict(_) => write!(f, "System.Collections.Hashtable"),
            Self::Object(obj) => match (&obj.to_string, &obj.value) {
                (Some(s), _) => write!(f, "{s}"),
                (None, Some(v)) => v.fmt(f),
                (None, None) => write!(
                    f,
                    "{}",
                    obj.type_names.first().map_or("PSObject", String::as_str)
                ),
            },
        }
    }
}

impl From<bool> for PsValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for PsValue {
    fn from(v: i32) -> Self {
        Self::I32(v)
    }
}

impl From<i64> for PsValue {
    fn from(v: i64) -> Self {
        Self::I64(v)
    }
}

impl From<&str> for PsValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for PsValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Uuid> for PsValue {
    fn from(v: Uuid) -> Self {
        Self::Guid(v)
    }
}
