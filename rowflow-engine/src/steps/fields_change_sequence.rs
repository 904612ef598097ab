// Fields Change Sequence Step
// Numbers rows, restarting the count whenever the watched fields change

use super::{to_config, StepPlugin};
use crate::error::StepError;
use crate::graph::{CheckContext, CheckRemark, FieldsContext};
use crate::row::{FieldDescriptor, RowSchema, SchemaError, Value, ValueType};
use crate::runtime::{InitContext, StepIo, StepWorker};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldsChangeSequencePlugin {
    pub result_field: String,
    /// Fields whose change restarts the sequence; empty means all fields
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default = "default_one")]
    pub start: i64,
    #[serde(default = "default_one")]
    pub increment: i64,
}

fn default_one() -> i64 {
    1
}

impl FieldsChangeSequencePlugin {
    pub fn new(result_field: impl Into<String>, fields: Vec<String>) -> Self {
        Self {
            result_field: result_field.into(),
            fields,
            start: 1,
            increment: 1,
        }
    }

    fn key_indexes(&self, input: &RowSchema) -> Result<Vec<usize>, SchemaError> {
        if self.fields.is_empty() {
            return Ok((0..input.len()).collect());
        }
        self.fields.iter().map(|f| input.require(f)).collect()
    }
}

impl StepPlugin for FieldsChangeSequencePlugin {
    fn kind(&self) -> &'static str {
        "fields_change_sequence"
    }

    fn output_fields(
        &self,
        ctx: &FieldsContext<'_>,
        input: RowSchema,
    ) -> Result<RowSchema, SchemaError> {
        let mut out = input;
        out.add_field(
            FieldDescriptor::new(self.result_field.clone(), ValueType::Integer)
                .with_origin(ctx.step_name),
        )?;
        Ok(out)
    }

    fn check(&self, ctx: &CheckContext<'_>) -> Vec<CheckRemark> {
        let step = Some(ctx.step.name.as_str());
        let mut remarks = Vec::new();
        if self.result_field.trim().is_empty() {
            remarks.push(CheckRemark::error(step, "result field name is missing"));
        }
        for field in &self.fields {
            if ctx.input.index_of(field).is_none() {
                remarks.push(CheckRemark::error(
                    step,
                    format!("field '{}' does not enter the step", field),
                ));
            }
        }
        if self.increment == 0 {
            remarks.push(CheckRemark::warning(step, "increment is zero"));
        }
        remarks
    }

    fn create_worker(&self, _copy: usize) -> Box<dyn StepWorker> {
        Box::new(ChangeSequenceWorker {
            plugin: self.clone(),
            keys: Vec::new(),
            previous: None,
            value: 0,
        })
    }

    fn config(&self) -> serde_json::Value {
        to_config(self)
    }
}

struct ChangeSequenceWorker {
    plugin: FieldsChangeSequencePlugin,
    keys: Vec<usize>,
    previous: Option<Vec<Value>>,
    value: i64,
}

#[async_trait]
impl StepWorker for ChangeSequenceWorker {
    async fn init(&mut self, ctx: &InitContext<'_>) -> Result<(), StepError> {
        self.keys = self.plugin.key_indexes(ctx.input_schema)?;
        Ok(())
    }

    async fn process_batch(&mut self, io: &mut StepIo) -> Result<bool, StepError> {
        let Some(mut row) = io.get_row().await? else {
            return Ok(false);
        };

        let key: Vec<Value> = self
            .keys
            .iter()
            .map(|&i| row.get(i).cloned().unwrap_or(Value::Null))
            .collect();

        if self.previous.as_ref() == Some(&key) {
            self.value = self.value.saturating_add(self.plugin.increment);
        } else {
            self.value = self.plugin.start;
            self.previous = Some(key);
        }

        row.push(Value::Integer(self.value));
        io.put_row(row).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> RowSchema {
        RowSchema::from(vec![
            FieldDescriptor::new("group", ValueType::String),
            FieldDescriptor::new("amount", ValueType::Integer),
        ])
    }

    #[test]
    fn test_key_indexes() {
        let plugin = FieldsChangeSequencePlugin::new("seq", vec!["AMOUNT".to_string()]);
        assert_eq!(plugin.key_indexes(&input()).unwrap(), vec![1]);

        let all = FieldsChangeSequencePlugin::new("seq", Vec::new());
        assert_eq!(all.key_indexes(&input()).unwrap(), vec![0, 1]);

        let missing = FieldsChangeSequencePlugin::new("seq", vec!["nope".to_string()]);
        assert!(missing.key_indexes(&input()).is_err());
    }

    #[test]
    fn test_defaults_from_config() {
        let plugin: FieldsChangeSequencePlugin =
            serde_json::from_value(serde_json::json!({ "result_field": "seq" })).unwrap();
        assert_eq!(plugin.start, 1);
        assert_eq!(plugin.increment, 1);
        assert!(plugin.fields.is_empty());
    }
}
