// Row Model
// Values, field descriptors and the ordered row schema travelling on every hop

pub mod schema;
pub mod value;

// Re-export key types
pub use schema::{FieldDescriptor, FieldFormat, RowSchema, SchemaError};
pub use value::{Row, Value, ValueType};

/// Field and step names compare case-insensitively throughout the engine
pub(crate) fn same_name(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b) || name_key(a) == name_key(b)
}

/// Normalized key for case-insensitive maps
pub(crate) fn name_key(name: &str) -> String {
    name.to_lowercase()
}
