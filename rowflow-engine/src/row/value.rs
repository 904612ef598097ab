// Row Values
// Typed cell values and the positional row tuple

use super::schema::SchemaError;

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A row is positional: cell `i` is described by field `i` of the hop's schema
pub type Row = Vec<Value>;

/// Logical type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Integer,
    Number,
    String,
    Boolean,
    /// Milliseconds since the Unix epoch
    Date,
    Binary,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Integer => "integer",
            ValueType::Number => "number",
            ValueType::String => "string",
            ValueType::Boolean => "boolean",
            ValueType::Date => "date",
            ValueType::Binary => "binary",
        };
        write!(f, "{}", name)
    }
}

/// A single cell value
///
/// Numbers compare and hash by bit pattern so values can be used as lookup
/// and partition keys.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Integer(i64),
    Number(f64),
    String(String),
    Boolean(bool),
    Date(i64),
    Binary(Vec<u8>),
}

impl Value {
    /// Parse text into a value of the given type. Empty text becomes `Null`.
    pub fn parse(text: &str, value_type: ValueType) -> Result<Self, SchemaError> {
        if text.is_empty() {
            return Ok(Value::Null);
        }

        let invalid = || SchemaError::InvalidValue {
            value: text.to_string(),
            value_type,
        };

        let value = match value_type {
            ValueType::Integer => Value::Integer(text.trim().parse().map_err(|_| invalid())?),
            ValueType::Number => Value::Number(text.trim().parse().map_err(|_| invalid())?),
            ValueType::String => Value::String(text.to_string()),
            ValueType::Boolean => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "y" | "yes" | "1" => Value::Boolean(true),
                "false" | "n" | "no" | "0" => Value::Boolean(false),
                _ => return Err(invalid()),
            },
            ValueType::Date => Value::Date(text.trim().parse().map_err(|_| invalid())?),
            ValueType::Binary => Value::Binary(text.as_bytes().to_vec()),
        };

        Ok(value)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The logical type of this value, `None` for nulls
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Value::Null => None,
            Value::Integer(_) => Some(ValueType::Integer),
            Value::Number(_) => Some(ValueType::Number),
            Value::String(_) => Some(ValueType::String),
            Value::Boolean(_) => Some(ValueType::Boolean),
            Value::Date(_) => Some(ValueType::Date),
            Value::Binary(_) => Some(ValueType::Binary),
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) | Value::Date(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Stable hash used for hash partitioning
    pub fn partition_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Binary(a), Value::Binary(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Integer(i) | Value::Date(i) => i.hash(state),
            Value::Number(n) => n.to_bits().hash(state),
            Value::String(s) => s.hash(state),
            Value::Boolean(b) => b.hash(state),
            Value::Binary(b) => b.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Integer(i) | Value::Date(i) => write!(f, "{}", i),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Binary(b) => write!(f, "{}", String::from_utf8_lossy(b)),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_by_type() {
        assert_eq!(
            Value::parse("42", ValueType::Integer).unwrap(),
            Value::Integer(42)
        );
        assert_eq!(
            Value::parse("yes", ValueType::Boolean).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(Value::parse("", ValueType::Integer).unwrap(), Value::Null);
        assert!(Value::parse("abc", ValueType::Number).is_err());
    }

    #[test]
    fn test_numbers_hash_consistently() {
        let a = Value::Number(1.5);
        let b = Value::Number(1.5);
        assert_eq!(a, b);
        assert_eq!(a.partition_hash(), b.partition_hash());
        assert_ne!(Value::Integer(1), Value::Date(1));
    }

    #[test]
    fn test_display_null_is_empty() {
        assert_eq!(Value::Null.to_string(), "");
        assert_eq!(Value::from("abc").to_string(), "abc");
    }
}
