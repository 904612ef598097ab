// Detect Last Row Step
// Appends a flag that is true only on the final row of the stream

use super::{to_config, StepPlugin};
use crate::error::StepError;
use crate::graph::{CheckContext, CheckRemark, FieldsContext};
use crate::row::{FieldDescriptor, Row, RowSchema, SchemaError, Value, ValueType};
use crate::runtime::{StepIo, StepWorker};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectLastRowPlugin {
    pub result_field: String,
}

impl DetectLastRowPlugin {
    pub fn new(result_field: impl Into<String>) -> Self {
        Self {
            result_field: result_field.into(),
        }
    }
}

impl StepPlugin for DetectLastRowPlugin {
    fn kind(&self) -> &'static str {
        "detect_last_row"
    }

    fn output_fields(
        &self,
        ctx: &FieldsContext<'_>,
        input: RowSchema,
    ) -> Result<RowSchema, SchemaError> {
        let mut out = input;
        out.add_field(
            FieldDescriptor::new(self.result_field.clone(), ValueType::Boolean)
                .with_origin(ctx.step_name),
        )?;
        Ok(out)
    }

    fn check(&self, ctx: &CheckContext<'_>) -> Vec<CheckRemark> {
        if self.result_field.trim().is_empty() {
            vec![CheckRemark::error(
                Some(&ctx.step.name),
                "result field name is missing",
            )]
        } else {
            Vec::new()
        }
    }

    fn create_worker(&self, _copy: usize) -> Box<dyn StepWorker> {
        Box::new(DetectLastRowWorker { previous: None })
    }

    fn config(&self) -> serde_json::Value {
        to_config(self)
    }
}

/// Sends each row one step late so the last one can be flagged
struct DetectLastRowWorker {
    previous: Option<Row>,
}

fn flagged(mut row: Row, last: bool) -> Row {
    row.push(Value::Boolean(last));
    row
}

#[async_trait]
impl StepWorker for DetectLastRowWorker {
    async fn process_batch(&mut self, io: &mut StepIo) -> Result<bool, StepError> {
        match io.get_row().await? {
            Some(row) => {
                if let Some(previous) = self.previous.replace(row) {
                    io.put_row(flagged(previous, false)).await?;
                }
                Ok(true)
            }
            None => {
                if let Some(last) = self.previous.take() {
                    io.put_row(flagged(last, true)).await?;
                }
                Ok(false)
            }
        }
    }
}
