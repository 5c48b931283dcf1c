//! Property values carried by nodes, edges, query parameters and records

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Property value type
///
/// Counts are stored as `Integer`, statistical weights as `Float`.
/// `List` and `Map` appear mostly in query parameters (`$batch` rows).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<PropertyValue>),
    Map(PropertyMap),
}

/// Ordered property map; iteration follows insertion order
pub type PropertyMap = IndexMap<String, PropertyValue>;

impl PropertyValue {
    pub fn is_null(&self) -> bool {
        matches!(self, PropertyValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            PropertyValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view: integers widen to `f64`
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Integer(i) => Some(*i as f64),
            PropertyValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[PropertyValue]> {
        match self {
            PropertyValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&PropertyMap> {
        match self {
            PropertyValue::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyValue::Null => "Null",
            PropertyValue::Boolean(_) => "Boolean",
            PropertyValue::Integer(_) => "Integer",
            PropertyValue::Float(_) => "Float",
            PropertyValue::String(_) => "String",
            PropertyValue::List(_) => "List",
            PropertyValue::Map(_) => "Map",
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            PropertyValue::Null => serde_json::Value::Null,
            PropertyValue::Boolean(b) => serde_json::Value::Bool(*b),
            PropertyValue::Integer(i) => serde_json::Value::from(*i),
            PropertyValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            PropertyValue::String(s) => serde_json::Value::String(s.clone()),
            PropertyValue::List(items) => {
                serde_json::Value::Array(items.iter().map(PropertyValue::to_json).collect())
            }
            PropertyValue::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join<T>(
            f: &mut fmt::Formatter<'_>,
            items: impl Iterator<Item = T>,
            mut each: impl FnMut(&mut fmt::Formatter<'_>, T) -> fmt::Result,
        ) -> fmt::Result {
            for (i, item) in items.enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                each(f, item)?;
            }
            Ok(())
        }

        match self {
            PropertyValue::Null => f.write_str("null"),
            PropertyValue::Boolean(b) => write!(f, "{}", b),
            PropertyValue::Integer(i) => write!(f, "{}", i),
            PropertyValue::Float(fl) => write!(f, "{}", fl),
            PropertyValue::String(s) => write!(f, "{:?}", s),
            PropertyValue::List(items) => {
                f.write_str("[")?;
                join(f, items.iter(), |f, v| write!(f, "{}", v))?;
                f.write_str("]")
            }
            PropertyValue::Map(map) => {
                f.write_str("{")?;
                join(f, map.iter(), |f, (k, v)| write!(f, "{}: {}", k, v))?;
                f.write_str("}")
            }
        }
    }
}

macro_rules! from_value {
    ($($ty:ty => |$v:ident| $build:expr),* $(,)?) => {
        $(
            impl From<$ty> for PropertyValue {
                fn from($v: $ty) -> Self {
                    $build
                }
            }
        )*
    };
}

from_value! {
    String => |s| PropertyValue::String(s),
    &str => |s| PropertyValue::String(s.to_string()),
    &String => |s| PropertyValue::String(s.clone()),
    i64 => |i| PropertyValue::Integer(i),
    u64 => |i| PropertyValue::Integer(i as i64),
    usize => |i| PropertyValue::Integer(i as i64),
    f64 => |x| PropertyValue::Float(x),
    bool => |b| PropertyValue::Boolean(b),
    Vec<PropertyValue> => |items| PropertyValue::List(items),
    PropertyMap => |map| PropertyValue::Map(map),
}
