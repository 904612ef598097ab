// Row Schema
// Ordered, named, typed field lists describing the rows on one hop

use super::value::ValueType;
use super::{name_key, same_name};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Errors raised by the row model
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("field '{0}' already exists in the row")]
    DuplicateField(String),

    #[error("field '{0}' not found in the row")]
    FieldNotFound(String),

    #[error("value '{value}' cannot be read as {value_type}")]
    InvalidValue { value: String, value_type: ValueType },

    #[error("no info stream arrives from step '{0}'")]
    MissingInfoStream(String),
}

/// Formatting metadata carried along with a field
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldFormat {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversion_mask: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimal_symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grouping_symbol: Option<String>,
}

/// Description of one field in a row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    /// Name of the step that introduced this field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "is_default_format")]
    pub format: FieldFormat,
}

fn is_default_format(format: &FieldFormat) -> bool {
    *format == FieldFormat::default()
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            length: None,
            precision: None,
            origin: None,
            format: FieldFormat::default(),
        }
    }

    pub fn with_length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = Some(precision);
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_format(mut self, format: FieldFormat) -> Self {
        self.format = format;
        self
    }

    /// Name of the first layout attribute that differs from `other`, if any
    pub fn layout_difference(&self, other: &FieldDescriptor) -> Option<&'static str> {
        if !same_name(&self.name, &other.name) {
            Some("name")
        } else if self.value_type != other.value_type {
            Some("type")
        } else if self.length != other.length {
            Some("length")
        } else if self.precision != other.precision {
            Some("precision")
        } else if self.origin != other.origin {
            Some("origin")
        } else if self.format.comments != other.format.comments {
            Some("comments")
        } else if self.format.conversion_mask != other.format.conversion_mask {
            Some("conversion mask")
        } else if self.format.encoding != other.format.encoding {
            Some("encoding")
        } else if self.format.decimal_symbol != other.format.decimal_symbol {
            Some("decimal symbol")
        } else if self.format.grouping_symbol != other.format.grouping_symbol {
            Some("grouping symbol")
        } else {
            None
        }
    }
}

/// Ordered list of fields; names are unique ignoring case
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowSchema {
    fields: Vec<FieldDescriptor>,
}

impl RowSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a schema from a field list, rejecting duplicate names
    pub fn from_fields(fields: Vec<FieldDescriptor>) -> Result<Self, SchemaError> {
        let mut schema = Self::new();
        for field in fields {
            schema.add_field(field)?;
        }
        Ok(schema)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter()
    }

    pub fn field(&self, index: usize) -> Option<&FieldDescriptor> {
        self.fields.get(index)
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// Position of a field, matching the name case-insensitively
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| same_name(&f.name, name))
    }

    pub fn search(&self, name: &str) -> Option<&FieldDescriptor> {
        self.index_of(name).map(|idx| &self.fields[idx])
    }

    /// Position of a field or a `FieldNotFound` error
    pub fn require(&self, name: &str) -> Result<usize, SchemaError> {
        self.index_of(name)
            .ok_or_else(|| SchemaError::FieldNotFound(name.to_string()))
    }

    /// Append a field; its name must not be present yet
    pub fn add_field(&mut self, field: FieldDescriptor) -> Result<(), SchemaError> {
        if self.index_of(&field.name).is_some() {
            return Err(SchemaError::DuplicateField(field.name));
        }
        self.fields.push(field);
        Ok(())
    }

    /// Append every field of `other`, rejecting names that already exist
    pub fn add_schema(&mut self, other: &RowSchema) -> Result<(), SchemaError> {
        for field in other.iter() {
            self.add_field(field.clone())?;
        }
        Ok(())
    }

    /// Append the fields of `other` whose names are not present yet
    ///
    /// This is the merge rule for steps with several main inputs: the first
    /// occurrence of a name wins and later duplicates are folded away.
    pub fn merge_first_seen(&mut self, other: &RowSchema) {
        for field in other.iter() {
            if self.index_of(&field.name).is_none() {
                self.fields.push(field.clone());
            }
        }
    }

    pub fn remove_field(&mut self, name: &str) -> Result<FieldDescriptor, SchemaError> {
        let idx = self.require(name)?;
        Ok(self.fields.remove(idx))
    }

    pub fn rename_field(&mut self, from: &str, to: &str) -> Result<(), SchemaError> {
        let idx = self.require(from)?;
        if let Some(existing) = self.index_of(to) {
            if existing != idx {
                return Err(SchemaError::DuplicateField(to.to_string()));
            }
        }
        self.fields[idx].name = to.to_string();
        Ok(())
    }

    /// Fields present in both schemas under the same name but with a different type
    pub fn merge_conflicts(&self, other: &RowSchema) -> Vec<(String, ValueType, ValueType)> {
        other
            .iter()
            .filter_map(|theirs| {
                self.search(&theirs.name).and_then(|ours| {
                    (ours.value_type != theirs.value_type).then(|| {
                        (ours.name.clone(), ours.value_type, theirs.value_type)
                    })
                })
            })
            .collect()
    }

    /// Human readable differences between two row layouts, empty when identical
    pub fn layout_differences(&self, other: &RowSchema) -> Vec<String> {
        let mut differences = Vec::new();

        if self.len() != other.len() {
            differences.push(format!(
                "field count differs: {} versus {}",
                self.len(),
                other.len()
            ));
        }

        for (idx, (ours, theirs)) in self.fields.iter().zip(other.fields.iter()).enumerate() {
            if let Some(attribute) = ours.layout_difference(theirs) {
                differences.push(format!(
                    "field #{} ('{}' versus '{}') differs in {}",
                    idx + 1,
                    ours.name,
                    theirs.name,
                    attribute
                ));
            }
        }

        differences
    }

    /// Names that appear more than once, ignoring case
    ///
    /// Schemas built through `add_field` never contain duplicates, but schemas
    /// produced by deserialization or by step transforms may.
    pub fn duplicate_names(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();
        for field in &self.fields {
            if !seen.insert(name_key(&field.name)) && !duplicates.contains(&field.name) {
                duplicates.push(field.name.clone());
            }
        }
        duplicates
    }

    /// Push without the uniqueness check; used when rebuilding deserialized layouts
    pub(crate) fn push_unchecked(&mut self, field: FieldDescriptor) {
        self.fields.push(field);
    }
}

impl From<Vec<FieldDescriptor>> for RowSchema {
    fn from(fields: Vec<FieldDescriptor>) -> Self {
        let mut schema = RowSchema::new();
        for field in fields {
            schema.push_unchecked(field);
        }
        schema
    }
}

impl<'a> IntoIterator for &'a RowSchema {
    type Item = &'a FieldDescriptor;
    type IntoIter = std::slice::Iter<'a, FieldDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}
