// Step Metadata
// Graph nodes: plugin reference, copies, partitioning and error handling

use crate::row::{same_name, FieldDescriptor, RowSchema, ValueType};
use crate::steps::StepPlugin;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How rows are spread over the copies of a partitioned step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionMethod {
    /// Integer field value modulo the number of copies
    Mod,
    /// Hash of the field value modulo the number of copies
    Hash,
}

/// Partitioning descriptor of a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partitioning {
    pub field: String,
    pub method: PartitionMethod,
}

/// Error handling descriptor: where rejected rows go and how they are annotated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorHandling {
    pub target_step: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nr_errors_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptions_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codes_field: Option<String>,
    /// Maximum number of rows that may be rejected before the step fails
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_errors: Option<u64>,
}

fn default_true() -> bool {
    true
}

impl ErrorHandling {
    pub fn new(target_step: impl Into<String>) -> Self {
        Self {
            target_step: target_step.into(),
            enabled: true,
            nr_errors_field: None,
            descriptions_field: None,
            fields_field: None,
            codes_field: None,
            max_errors: None,
        }
    }

    /// Fields appended to rejected rows, in declaration order
    pub fn error_fields(&self, origin: &str) -> RowSchema {
        let mut fields = Vec::new();
        if let Some(name) = &self.nr_errors_field {
            fields.push(FieldDescriptor::new(name, ValueType::Integer).with_origin(origin));
        }
        for name in [
            &self.descriptions_field,
            &self.fields_field,
            &self.codes_field,
        ]
        .into_iter()
        .flatten()
        {
            fields.push(FieldDescriptor::new(name, ValueType::String).with_origin(origin));
        }
        RowSchema::from(fields)
    }
}

/// A named processing node in the pipeline graph
#[derive(Debug, Clone)]
pub struct StepMeta {
    pub name: String,
    pub plugin: Arc<dyn StepPlugin>,
    pub description: Option<String>,
    /// Number of parallel worker copies, at least one
    pub copies: usize,
    /// Round-robin rows over target steps instead of copying them to each
    pub distribute: bool,
    pub partitioning: Option<Partitioning>,
    pub error_handling: Option<ErrorHandling>,
}

impl StepMeta {
    pub fn new(name: impl Into<String>, plugin: Arc<dyn StepPlugin>) -> Self {
        Self {
            name: name.into(),
            plugin,
            description: None,
            copies: 1,
            distribute: true,
            partitioning: None,
            error_handling: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_copies(mut self, copies: usize) -> Self {
        self.copies = copies.max(1);
        self
    }

    pub fn with_distribute(mut self, distribute: bool) -> Self {
        self.distribute = distribute;
        self
    }

    pub fn with_partitioning(mut self, field: impl Into<String>, method: PartitionMethod) -> Self {
        self.partitioning = Some(Partitioning {
            field: field.into(),
            method,
        });
        self
    }

    pub fn with_error_handling(mut self, error_handling: ErrorHandling) -> Self {
        self.error_handling = Some(error_handling);
        self
    }

    pub fn kind(&self) -> &str {
        self.plugin.kind()
    }

    pub fn is_partitioned(&self) -> bool {
        self.partitioning.is_some()
    }

    /// Whether rejected rows of this step are routed to `target`
    pub fn is_sending_error_rows_to(&self, target: &str) -> bool {
        self.error_handling
            .as_ref()
            .map(|eh| eh.enabled && same_name(&eh.target_step, target))
            .unwrap_or(false)
    }

    /// Error handling descriptor when it is switched on
    pub fn active_error_handling(&self) -> Option<&ErrorHandling> {
        self.error_handling.as_ref().filter(|eh| eh.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::pass_through::PassThroughPlugin;

    #[test]
    fn test_error_fields_order() {
        let mut eh = ErrorHandling::new("errors");
        eh.descriptions_field = Some("err_desc".to_string());
        eh.nr_errors_field = Some("err_count".to_string());
        eh.codes_field = Some("err_code".to_string());

        let fields = eh.error_fields("transform");
        assert_eq!(fields.field_names(), vec!["err_count", "err_desc", "err_code"]);
        assert_eq!(fields.field(0).unwrap().value_type, ValueType::Integer);
        assert_eq!(fields.field(1).unwrap().origin.as_deref(), Some("transform"));
    }

    #[test]
    fn test_sending_error_rows() {
        let step = StepMeta::new("transform", Arc::new(PassThroughPlugin))
            .with_error_handling(ErrorHandling::new("Errors"));
        assert!(step.is_sending_error_rows_to("errors"));
        assert!(!step.is_sending_error_rows_to("sink"));

        let mut disabled = step.clone();
        if let Some(eh) = disabled.error_handling.as_mut() {
            eh.enabled = false;
        }
        assert!(!disabled.is_sending_error_rows_to("errors"));
    }

    #[test]
    fn test_copies_at_least_one() {
        let step = StepMeta::new("s", Arc::new(PassThroughPlugin)).with_copies(0);
        assert_eq!(step.copies, 1);
    }
}
