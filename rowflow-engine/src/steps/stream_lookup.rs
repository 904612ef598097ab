// Stream Lookup Step
// Enriches main rows with values looked up in an info stream held in memory

use super::{to_config, StepPlugin};
use crate::error::StepError;
use crate::graph::{CheckContext, CheckRemark, FieldsContext};
use crate::row::{same_name, FieldDescriptor, Row, RowSchema, SchemaError, Value, ValueType};
use crate::runtime::{InitContext, StepIo, StepWorker};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Pairs a main-stream field with the info-stream field it must equal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupKey {
    pub stream_field: String,
    pub lookup_field: String,
}

/// An info-stream field copied onto matching main rows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupValue {
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename: Option<String>,
    /// Text used when no info row matches; null otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl LookupValue {
    fn output_name(&self) -> &str {
        self.rename.as_deref().unwrap_or(&self.field)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamLookupPlugin {
    pub lookup_step: String,
    pub keys: Vec<LookupKey>,
    pub values: Vec<LookupValue>,
}

impl StreamLookupPlugin {
    fn value_fields(
        &self,
        step: &str,
        lookup: &RowSchema,
    ) -> Result<Vec<FieldDescriptor>, SchemaError> {
        self.values
            .iter()
            .map(|v| {
                let source = lookup
                    .search(&v.field)
                    .ok_or_else(|| SchemaError::FieldNotFound(v.field.clone()))?;
                let mut field = source.clone();
                field.name = v.output_name().to_string();
                field.origin = Some(step.to_string());
                Ok(field)
            })
            .collect()
    }
}

impl StepPlugin for StreamLookupPlugin {
    fn kind(&self) -> &'static str {
        "stream_lookup"
    }

    fn output_fields(
        &self,
        ctx: &FieldsContext<'_>,
        input: RowSchema,
    ) -> Result<RowSchema, SchemaError> {
        let lookup = ctx
            .info_schema(&self.lookup_step)
            .ok_or_else(|| SchemaError::MissingInfoStream(self.lookup_step.clone()))?;
        let mut out = input;
        for field in self.value_fields(ctx.step_name, lookup)? {
            out.add_field(field)?;
        }
        Ok(out)
    }

    fn check(&self, ctx: &CheckContext<'_>) -> Vec<CheckRemark> {
        let step = Some(ctx.step.name.as_str());
        let mut remarks = Vec::new();

        let Some((_, lookup)) = ctx
            .info
            .iter()
            .find(|(name, _)| same_name(name, &self.lookup_step))
        else {
            remarks.push(CheckRemark::error(
                step,
                format!("there is no info hop from lookup step '{}'", self.lookup_step),
            ));
            return remarks;
        };

        if self.keys.is_empty() {
            remarks.push(CheckRemark::error(step, "no lookup keys are defined"));
        }
        for key in &self.keys {
            let ours = ctx.input.search(&key.stream_field);
            let theirs = lookup.search(&key.lookup_field);
            match (ours, theirs) {
                (None, _) => remarks.push(CheckRemark::error(
                    step,
                    format!("key field '{}' does not enter the step", key.stream_field),
                )),
                (_, None) => remarks.push(CheckRemark::error(
                    step,
                    format!(
                        "key field '{}' is not in the rows of '{}'",
                        key.lookup_field, self.lookup_step
                    ),
                )),
                (Some(a), Some(b)) if a.value_type != b.value_type => {
                    remarks.push(CheckRemark::warning(
                        step,
                        format!(
                            "key '{}' is {} but lookup field '{}' is {}",
                            a.name, a.value_type, b.name, b.value_type
                        ),
                    ))
                }
                _ => {}
            }
        }
        for value in &self.values {
            if let Some(default) = &value.default {
                let value_type = lookup
                    .search(&value.field)
                    .map(|f| f.value_type)
                    .unwrap_or(ValueType::String);
                if let Err(e) = Value::parse(default, value_type) {
                    remarks.push(CheckRemark::error(step, e.to_string()));
                }
            }
        }
        remarks
    }

    fn create_worker(&self, _copy: usize) -> Box<dyn StepWorker> {
        Box::new(StreamLookupWorker {
            plugin: self.clone(),
            stream_keys: Vec::new(),
            lookup_keys: Vec::new(),
            value_indexes: Vec::new(),
            defaults: Vec::new(),
            table: None,
        })
    }

    fn config(&self) -> serde_json::Value {
        to_config(self)
    }
}

struct StreamLookupWorker {
    plugin: StreamLookupPlugin,
    stream_keys: Vec<usize>,
    lookup_keys: Vec<usize>,
    value_indexes: Vec<usize>,
    defaults: Vec<Value>,
    /// Loaded from the info stream before the first main row
    table: Option<HashMap<Vec<Value>, Vec<Value>>>,
}

impl StreamLookupWorker {
    async fn load(&mut self, io: &mut StepIo) -> Result<(), StepError> {
        let rows = io.info_rows(&self.plugin.lookup_step).await?;
        let mut table = HashMap::with_capacity(rows.len());
        for row in rows {
            let key = pick(&row, &self.lookup_keys);
            let values = pick(&row, &self.value_indexes);
            // first row wins on duplicate keys
            table.entry(key).or_insert(values);
        }
        debug!(step = %io.step_name(), copy = io.copy(), entries = table.len(), "lookup table loaded");
        self.table = Some(table);
        Ok(())
    }
}

fn pick(row: &Row, indexes: &[usize]) -> Vec<Value> {
    indexes
        .iter()
        .map(|&i| row.get(i).cloned().unwrap_or(Value::Null))
        .collect()
}

#[async_trait]
impl StepWorker for StreamLookupWorker {
    async fn init(&mut self, ctx: &InitContext<'_>) -> Result<(), StepError> {
        let lookup = ctx
            .info_schemas
            .iter()
            .find(|(name, _)| same_name(name, &self.plugin.lookup_step))
            .map(|(_, schema)| schema)
            .ok_or_else(|| SchemaError::MissingInfoStream(self.plugin.lookup_step.clone()))?;

        self.stream_keys = self
            .plugin
            .keys
            .iter()
            .map(|k| ctx.input_schema.require(&k.stream_field))
            .collect::<Result<_, _>>()?;
        self.lookup_keys = self
            .plugin
            .keys
            .iter()
            .map(|k| lookup.require(&k.lookup_field))
            .collect::<Result<_, _>>()?;
        self.value_indexes = self
            .plugin
            .values
            .iter()
            .map(|v| lookup.require(&v.field))
            .collect::<Result<_, _>>()?;
        self.defaults = self
            .plugin
            .values
            .iter()
            .zip(&self.value_indexes)
            .map(|(v, &i)| match (&v.default, lookup.field(i)) {
                (Some(text), Some(field)) => Value::parse(text, field.value_type),
                _ => Ok(Value::Null),
            })
            .collect::<Result<_, _>>()?;
        Ok(())
    }

    async fn process_batch(&mut self, io: &mut StepIo) -> Result<bool, StepError> {
        if self.table.is_none() {
            self.load(io).await?;
        }

        let Some(mut row) = io.get_row().await? else {
            return Ok(false);
        };

        let key = pick(&row, &self.stream_keys);
        let found = self.table.as_ref().and_then(|t| t.get(&key));
        match found {
            Some(values) => row.extend(values.iter().cloned()),
            None => row.extend(self.defaults.iter().cloned()),
        }

        io.put_row(row).await?;
        Ok(true)
    }
}
