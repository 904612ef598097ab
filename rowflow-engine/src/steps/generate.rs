// Generate Step
// Emits a fixed number of rows built from constants and an optional sequence

use super::{to_config, StepPlugin};
use crate::error::StepError;
use crate::graph::{CheckContext, CheckRemark, FieldsContext};
use crate::row::{FieldDescriptor, Row, RowSchema, SchemaError, Value, ValueType};
use crate::runtime::{InitContext, StepIo, StepWorker};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A constant column of the generated rows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateField {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    /// Textual value, parsed as `value_type`; empty means null
    #[serde(default)]
    pub value: String,
}

impl GenerateField {
    pub fn constant(name: impl Into<String>, value_type: ValueType, value: &str) -> Self {
        Self {
            name: name.into(),
            value_type,
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratePlugin {
    /// Number of rows to emit
    #[serde(default)]
    pub limit: u64,
    #[serde(default)]
    pub fields: Vec<GenerateField>,
    /// Integer field placed first, counting up from `sequence_start`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_field: Option<String>,
    #[serde(default = "default_sequence_start")]
    pub sequence_start: i64,
}

fn default_sequence_start() -> i64 {
    1
}

impl GeneratePlugin {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            fields: Vec::new(),
            sequence_field: None,
            sequence_start: default_sequence_start(),
        }
    }

    pub fn with_sequence(mut self, field: impl Into<String>, start: i64) -> Self {
        self.sequence_field = Some(field.into());
        self.sequence_start = start;
        self
    }

    pub fn with_field(mut self, field: GenerateField) -> Self {
        self.fields.push(field);
        self
    }

    fn template(&self) -> Result<Row, SchemaError> {
        self.fields
            .iter()
            .map(|f| Value::parse(&f.value, f.value_type))
            .collect()
    }
}

impl StepPlugin for GeneratePlugin {
    fn kind(&self) -> &'static str {
        "generate"
    }

    fn output_fields(
        &self,
        ctx: &FieldsContext<'_>,
        input: RowSchema,
    ) -> Result<RowSchema, SchemaError> {
        let mut out = input;
        if let Some(name) = &self.sequence_field {
            out.add_field(
                FieldDescriptor::new(name.clone(), ValueType::Integer).with_origin(ctx.step_name),
            )?;
        }
        for field in &self.fields {
            out.add_field(
                FieldDescriptor::new(field.name.clone(), field.value_type)
                    .with_origin(ctx.step_name),
            )?;
        }
        Ok(out)
    }

    fn check(&self, ctx: &CheckContext<'_>) -> Vec<CheckRemark> {
        let step = Some(ctx.step.name.as_str());
        let mut remarks = Vec::new();
        if let Err(e) = self.template() {
            remarks.push(CheckRemark::error(step, e.to_string()));
        }
        if self.fields.is_empty() && self.sequence_field.is_none() {
            remarks.push(CheckRemark::warning(step, "rows are generated without fields"));
        }
        if !ctx.input.is_empty() {
            remarks.push(CheckRemark::warning(
                step,
                "incoming rows are ignored, only generated rows are sent",
            ));
        }
        remarks
    }

    fn create_worker(&self, _copy: usize) -> Box<dyn StepWorker> {
        Box::new(GenerateWorker {
            plugin: self.clone(),
            template: Vec::new(),
            produced: 0,
        })
    }

    fn config(&self) -> serde_json::Value {
        to_config(self)
    }
}

struct GenerateWorker {
    plugin: GeneratePlugin,
    template: Row,
    produced: u64,
}

#[async_trait]
impl StepWorker for GenerateWorker {
    async fn init(&mut self, _ctx: &InitContext<'_>) -> Result<(), StepError> {
        self.template = self.plugin.template()?;
        Ok(())
    }

    async fn process_batch(&mut self, io: &mut StepIo) -> Result<bool, StepError> {
        if self.produced >= self.plugin.limit {
            return Ok(false);
        }

        let mut row = Vec::with_capacity(self.template.len() + 1);
        if self.plugin.sequence_field.is_some() {
            let offset = i64::try_from(self.produced).unwrap_or(i64::MAX);
            row.push(Value::Integer(self.plugin.sequence_start.saturating_add(offset)));
        }
        row.extend(self.template.iter().cloned());

        io.put_row(row).await?;
        self.produced += 1;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_comes_first() {
        let plugin = GeneratePlugin::new(3)
            .with_sequence("id", 1)
            .with_field(GenerateField::constant("name", ValueType::String, "x"));
        let ctx = FieldsContext {
            step_name: "gen",
            info: &[],
            next_step: None,
        };
        let out = plugin.output_fields(&ctx, RowSchema::new()).unwrap();
        assert_eq!(out.field_names(), vec!["id", "name"]);
        assert!(out.iter().all(|f| f.origin.as_deref() == Some("gen")));
    }

    #[test]
    fn test_bad_constant_fails_template() {
        let plugin = GeneratePlugin::new(1)
            .with_field(GenerateField::constant("n", ValueType::Integer, "many"));
        assert!(matches!(
            plugin.template(),
            Err(SchemaError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_config_round_trips() {
        let plugin = GeneratePlugin::new(10).with_sequence("id", 5);
        let back: GeneratePlugin = serde_json::from_value(plugin.config()).unwrap();
        assert_eq!(back, plugin);
    }
}
