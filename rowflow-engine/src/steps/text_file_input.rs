// Text File Input Step
// Reads delimited text lines from a VFS location into typed rows

use super::{to_config, StepPlugin};
use crate::error::StepError;
use crate::graph::{CheckContext, CheckRemark, FieldsContext};
use crate::row::{FieldDescriptor, Row, RowSchema, SchemaError, Value, ValueType};
use crate::runtime::{StepIo, StepWorker};
use crate::vfs::ReadStream;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tracing::debug;

/// A column of the text file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextField {
    pub name: String,
    #[serde(rename = "type", default = "default_type")]
    pub value_type: ValueType,
}

fn default_type() -> ValueType {
    ValueType::String
}

impl TextField {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextFileInputPlugin {
    pub location: String,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    /// Skip the first line
    #[serde(default)]
    pub header: bool,
    pub fields: Vec<TextField>,
}

pub(crate) fn default_delimiter() -> String {
    ";".to_string()
}

impl TextFileInputPlugin {
    pub fn new(location: impl Into<String>, fields: Vec<TextField>) -> Self {
        Self {
            location: location.into(),
            delimiter: default_delimiter(),
            header: false,
            fields,
        }
    }

    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    pub fn with_header(mut self, header: bool) -> Self {
        self.header = header;
        self
    }

    /// Split one line into typed values; missing columns become null
    fn parse_line(&self, line: &str) -> Result<Row, StepError> {
        let mut columns = line.split(self.delimiter.as_str());
        self.fields
            .iter()
            .map(|field| {
                let text = columns.next().unwrap_or("");
                Value::parse(text, field.value_type).map_err(|e| {
                    StepError::row(e.to_string()).with_field(field.name.clone())
                })
            })
            .collect()
    }
}

impl StepPlugin for TextFileInputPlugin {
    fn kind(&self) -> &'static str {
        "text_file_input"
    }

    fn output_fields(
        &self,
        ctx: &FieldsContext<'_>,
        input: RowSchema,
    ) -> Result<RowSchema, SchemaError> {
        let mut out = input;
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
        if self.location.trim().is_empty() {
            remarks.push(CheckRemark::error(step, "no file location is set"));
        }
        if self.delimiter.is_empty() {
            remarks.push(CheckRemark::error(step, "delimiter is empty"));
        }
        if self.fields.is_empty() {
            remarks.push(CheckRemark::warning(step, "no fields are read from the file"));
        }
        remarks
    }

    fn create_worker(&self, _copy: usize) -> Box<dyn StepWorker> {
        Box::new(TextInputWorker {
            plugin: self.clone(),
            lines: None,
            line_number: 0,
        })
    }

    fn config(&self) -> serde_json::Value {
        to_config(self)
    }
}

struct TextInputWorker {
    plugin: TextFileInputPlugin,
    lines: Option<Lines<BufReader<ReadStream>>>,
    line_number: u64,
}

#[async_trait]
impl StepWorker for TextInputWorker {
    async fn process_batch(&mut self, io: &mut StepIo) -> Result<bool, StepError> {
        if self.plugin.delimiter.is_empty() {
            return Err(StepError::config("delimiter is empty"));
        }

        if self.lines.is_none() {
            let stream = io.vfs().open_read(&self.plugin.location).await?;
            debug!(step = %io.step_name(), location = %self.plugin.location, "opened text file");
            self.lines = Some(BufReader::new(stream).lines());
        }
        let Some(lines) = self.lines.as_mut() else {
            return Ok(false);
        };

        let Some(line) = lines.next_line().await? else {
            return Ok(false);
        };
        self.line_number += 1;

        if self.plugin.header && self.line_number == 1 {
            return Ok(true);
        }
        if line.trim().is_empty() {
            return Ok(true);
        }
        io.inc_input();

        match self.plugin.parse_line(&line) {
            Ok(row) => io.put_row(row).await?,
            Err(e) => {
                debug!(step = %io.step_name(), line = self.line_number, error = %e, "unreadable line");
                io.reject_row(Vec::new(), e).await?
            }
        }
        Ok(true)
    }
}
