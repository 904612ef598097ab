// Text File Output Step
// Writes rows as delimited text lines to a VFS location and forwards them

use super::text_file_input::default_delimiter;
use super::{to_config, StepPlugin};
use crate::error::StepError;
use crate::graph::{CheckContext, CheckRemark};
use crate::row::{Row, RowSchema};
use crate::runtime::{InitContext, StepIo, StepWorker};
use crate::vfs::WriteStream;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextFileOutputPlugin {
    pub location: String,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    /// Write the field names as the first line
    #[serde(default = "default_true")]
    pub header: bool,
    /// Keep existing content; no header is written when appending
    #[serde(default)]
    pub append: bool,
    /// Fields to write, in order; empty means every field
    #[serde(default)]
    pub fields: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl TextFileOutputPlugin {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            delimiter: default_delimiter(),
            header: true,
            append: false,
            fields: Vec::new(),
        }
    }

    pub fn with_fields(mut self, fields: Vec<String>) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_header(mut self, header: bool) -> Self {
        self.header = header;
        self
    }

    pub fn with_append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    fn indexes(&self, input: &RowSchema) -> Result<Vec<usize>, StepError> {
        if self.fields.is_empty() {
            return Ok((0..input.len()).collect());
        }
        Ok(self
            .fields
            .iter()
            .map(|f| input.require(f))
            .collect::<Result<_, _>>()?)
    }

    fn format_row(&self, row: &Row, indexes: &[usize]) -> String {
        let mut line = indexes
            .iter()
            .map(|&i| row.get(i).map(|v| v.to_string()).unwrap_or_default())
            .collect::<Vec<_>>()
            .join(&self.delimiter);
        line.push('\n');
        line
    }
}

impl StepPlugin for TextFileOutputPlugin {
    fn kind(&self) -> &'static str {
        "text_file_output"
    }

    fn check(&self, ctx: &CheckContext<'_>) -> Vec<CheckRemark> {
        let step = Some(ctx.step.name.as_str());
        let mut remarks = Vec::new();
        if self.location.trim().is_empty() {
            remarks.push(CheckRemark::error(step, "no file location is set"));
        }
        for field in &self.fields {
            if ctx.input.index_of(field).is_none() {
                remarks.push(CheckRemark::error(
                    step,
                    format!("field '{}' does not enter the step", field),
                ));
            }
        }
        remarks
    }

    fn create_worker(&self, _copy: usize) -> Box<dyn StepWorker> {
        Box::new(TextOutputWorker {
            plugin: self.clone(),
            indexes: Vec::new(),
            header: String::new(),
            writer: None,
        })
    }

    fn config(&self) -> serde_json::Value {
        to_config(self)
    }
}

struct TextOutputWorker {
    plugin: TextFileOutputPlugin,
    indexes: Vec<usize>,
    header: String,
    writer: Option<BufWriter<WriteStream>>,
}

impl TextOutputWorker {
    async fn close(&mut self) -> Result<(), StepError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().await?;
            writer.shutdown().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl StepWorker for TextOutputWorker {
    async fn init(&mut self, ctx: &InitContext<'_>) -> Result<(), StepError> {
        self.indexes = self.plugin.indexes(ctx.input_schema)?;
        let names: Vec<String> = self
            .indexes
            .iter()
            .filter_map(|&i| ctx.input_schema.field(i).map(|f| f.name.clone()))
            .collect();
        self.header = format!("{}\n", names.join(&self.plugin.delimiter));
        Ok(())
    }

    async fn process_batch(&mut self, io: &mut StepIo) -> Result<bool, StepError> {
        if self.writer.is_none() {
            let stream = io
                .vfs()
                .open_write(&self.plugin.location, self.plugin.append)
                .await?;
            let mut writer = BufWriter::new(stream);
            if self.plugin.header && !self.plugin.append {
                writer.write_all(self.header.as_bytes()).await?;
            }
            debug!(step = %io.step_name(), location = %self.plugin.location, "opened text file for writing");
            self.writer = Some(writer);
        }

        let Some(row) = io.get_row().await? else {
            self.close().await?;
            return Ok(false);
        };

        let line = self.plugin.format_row(&row, &self.indexes);
        if let Some(writer) = self.writer.as_mut() {
            writer.write_all(line.as_bytes()).await?;
        }
        io.inc_output();
        io.put_row(row).await?;
        Ok(true)
    }

    async fn dispose(&mut self, io: &mut StepIo) {
        if let Err(e) = self.close().await {
            warn!(step = %io.step_name(), error = %e, "failed to close text file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::{FieldDescriptor, Value, ValueType};

    #[test]
    fn test_selected_fields_in_order() {
        let input = RowSchema::from(vec![
            FieldDescriptor::new("id", ValueType::Integer),
            FieldDescriptor::new("name", ValueType::String),
        ]);
        let plugin = TextFileOutputPlugin::new("out.txt")
            .with_fields(vec!["name".to_string(), "id".to_string()]);
        let indexes = plugin.indexes(&input).unwrap();
        assert_eq!(indexes, vec![1, 0]);

        let row = vec![Value::Integer(3), Value::Null];
        assert_eq!(plugin.format_row(&row, &indexes), ";3\n");
    }

    #[test]
    fn test_unknown_field_fails() {
        let plugin = TextFileOutputPlugin::new("out.txt").with_fields(vec!["x".to_string()]);
        assert!(matches!(
            plugin.indexes(&RowSchema::new()),
            Err(StepError::Schema(_))
        ));
    }
}
