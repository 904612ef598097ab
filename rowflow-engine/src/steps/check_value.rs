// Check Value Step
// Fails rows whose field holds one of a set of forbidden values

use super::{to_config, StepPlugin};
use crate::error::StepError;
use crate::graph::{CheckContext, CheckRemark};
use crate::runtime::{InitContext, StepIo, StepWorker};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Rows whose `field` renders as one of `rejected_values` raise a row error
///
/// With error handling on the step, such rows go down the error hop;
/// without it the first one fails the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckValuePlugin {
    pub field: String,
    pub rejected_values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl CheckValuePlugin {
    pub fn new(field: impl Into<String>, rejected_values: Vec<String>) -> Self {
        Self {
            field: field.into(),
            rejected_values,
            message: None,
            code: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    fn row_error(&self, value: &str) -> StepError {
        let message = self
            .message
            .clone()
            .unwrap_or_else(|| format!("value '{}' is not allowed in field '{}'", value, self.field));
        let err = StepError::row(message).with_field(self.field.clone());
        match &self.code {
            Some(code) => err.with_code(code.clone()),
            None => err,
        }
    }
}

impl StepPlugin for CheckValuePlugin {
    fn kind(&self) -> &'static str {
        "check_value"
    }

    fn check(&self, ctx: &CheckContext<'_>) -> Vec<CheckRemark> {
        if ctx.input.index_of(&self.field).is_none() {
            vec![CheckRemark::error(
                Some(&ctx.step.name),
                format!("field '{}' does not enter the step", self.field),
            )]
        } else {
            Vec::new()
        }
    }

    fn create_worker(&self, _copy: usize) -> Box<dyn StepWorker> {
        Box::new(CheckValueWorker {
            plugin: self.clone(),
            index: 0,
        })
    }

    fn config(&self) -> serde_json::Value {
        to_config(self)
    }
}

struct CheckValueWorker {
    plugin: CheckValuePlugin,
    index: usize,
}

#[async_trait]
impl StepWorker for CheckValueWorker {
    async fn init(&mut self, ctx: &InitContext<'_>) -> Result<(), StepError> {
        self.index = ctx.input_schema.require(&self.plugin.field)?;
        Ok(())
    }

    async fn process_batch(&mut self, io: &mut StepIo) -> Result<bool, StepError> {
        let Some(row) = io.get_row().await? else {
            return Ok(false);
        };

        let text = row.get(self.index).map(|v| v.to_string()).unwrap_or_default();
        if self.plugin.rejected_values.iter().any(|r| *r == text) {
            let err = self.plugin.row_error(&text);
            io.reject_row(row, err).await?;
        } else {
            io.put_row(row).await?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_error_annotations() {
        let plugin = CheckValuePlugin::new("id", vec!["13".to_string()]).with_code("E13");
        assert_eq!(
            plugin.row_error("13"),
            StepError::Row {
                message: "value '13' is not allowed in field 'id'".to_string(),
                field: Some("id".to_string()),
                code: Some("E13".to_string()),
            }
        );

        let custom = CheckValuePlugin::new("id", Vec::new()).with_message("unlucky");
        assert_eq!(custom.row_error("13").to_string(), "unlucky");
    }
}
