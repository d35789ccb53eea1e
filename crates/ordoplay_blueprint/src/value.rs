// SPDX-License-Identifier: MIT OR Apache-2.0
//! Data types carried by ports and the values that flow through them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Data type that can flow through data ports
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// Boolean value
    Bool,
    /// Integer value
    Int,
    /// Floating point value
    Float,
    /// String value
    String,
    /// 2D vector
    Vector2,
    /// 3D vector
    Vector3,
    /// Any type (for generic nodes)
    Any,
    /// Ordered list of elements
    Array(Box<DataType>),
    /// Custom type
    Custom(String),
}

impl DataType {
    /// Array of the given element type
    pub fn array_of(element: DataType) -> Self {
        Self::Array(Box::new(element))
    }

    /// Whether this is an array type
    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }

    /// Element type if this is an array
    pub fn element_type(&self) -> Option<&DataType> {
        match self {
            Self::Array(element) => Some(element),
            _ => None,
        }
    }

    /// Check if this type can connect to another type
    pub fn can_connect_to(&self, other: &DataType) -> bool {
        if matches!(self, Self::Any) || matches!(other, Self::Any) {
            return true;
        }

        if self == other {
            return true;
        }

        match (self, other) {
            (Self::Int, Self::Float) | (Self::Float, Self::Int) => true,
            (Self::Float, Self::Vector2 | Self::Vector3) => true,
            (Self::Vector2, Self::Vector3) => true,
            (Self::Array(a), Self::Array(b)) => a.can_connect_to(b),
            _ => false,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => f.write_str("Bool"),
            Self::Int => f.write_str("Int"),
            Self::Float => f.write_str("Float"),
            Self::String => f.write_str("String"),
            Self::Vector2 => f.write_str("Vector2"),
            Self::Vector3 => f.write_str("Vector3"),
            Self::Any => f.write_str("Any"),
            Self::Array(element) => write!(f, "{element}[]"),
            Self::Custom(name) => f.write_str(name),
        }
    }
}

/// Value produced by an output port or held as a default
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    /// No value
    #[default]
    None,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i32),
    /// Float
    Float(f32),
    /// String
    String(String),
    /// 2D vector
    Vector2([f32; 2]),
    /// 3D vector
    Vector3([f32; 3]),
    /// List of values
    Array(Vec<Value>),
}

impl Value {
    /// Get the data type for this value.
    ///
    /// Arrays take their element type from the first element; empty arrays and
    /// `None` have no type.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Self::None => None,
            Self::Bool(_) => Some(DataType::Bool),
            Self::Int(_) => Some(DataType::Int),
            Self::Float(_) => Some(DataType::Float),
            Self::String(_) => Some(DataType::String),
            Self::Vector2(_) => Some(DataType::Vector2),
            Self::Vector3(_) => Some(DataType::Vector3),
            Self::Array(items) => items
                .first()
                .and_then(Value::data_type)
                .map(DataType::array_of),
        }
    }

    /// Whether this is [`Value::None`]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Elements if this is an array
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::Array(items.into_iter().map(Into::into).collect())
    }
}

/// Conversion from a port value into a concrete Rust type.
///
/// Returns `None` when the value cannot be coerced; readers then fall back to
/// the type's default.
pub trait FromValue: Sized {
    /// Coerce a value
    fn from_value(value: Value) -> Option<Self>;
}

impl FromValue for Value {
    fn from_value(value: Value) -> Option<Self> {
        Some(value)
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Bool(v) => Some(v),
            Value::Int(v) => Some(v != 0),
            _ => None,
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Int(v) => Some(v),
            Value::Float(v) => Some(v as i32),
            Value::Bool(v) => Some(i32::from(v)),
            _ => None,
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Float(v) => Some(v),
            Value::Int(v) => Some(v as f32),
            _ => None,
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::String(v) => Some(v),
            _ => None,
        }
    }
}

impl FromValue for [f32; 2] {
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Vector2(v) => Some(v),
            Value::Float(v) => Some([v; 2]),
            _ => None,
        }
    }
}

impl FromValue for [f32; 3] {
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Vector3(v) => Some(v),
            Value::Vector2([x, y]) => Some([x, y, 0.0]),
            Value::Float(v) => Some([v; 3]),
            _ => None,
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Array(items) => items.into_iter().map(T::from_value).collect(),
            _ => None,
        }
    }
}
