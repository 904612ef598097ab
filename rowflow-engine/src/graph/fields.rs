// Schema Propagation
// Memoized derivation of the row schema entering and leaving every step

use super::pipeline::{lock, PairKey, PipelineGraph};
use super::GraphError;
use crate::row::{name_key, RowSchema};

/// What a step plugin sees when asked for its output fields
#[derive(Debug, Clone, Copy)]
pub struct FieldsContext<'a> {
    /// Name of the step being resolved
    pub step_name: &'a str,
    /// Schemas of the info streams feeding the step, by source step
    pub info: &'a [(String, RowSchema)],
    /// The step the output travels to, when resolving a specific hop
    pub next_step: Option<&'a str>,
}

impl<'a> FieldsContext<'a> {
    /// Schema of the info stream coming from `step`
    pub fn info_schema(&self, step: &str) -> Option<&'a RowSchema> {
        let info: &'a [(String, RowSchema)] = self.info;
        info.iter()
            .find(|(name, _)| name_key(name) == name_key(step))
            .map(|(_, schema)| schema)
    }
}

impl PipelineGraph {
    /// Schema of the rows a step emits, optionally along the hop to `target`
    ///
    /// When the step routes its rejected rows to `target`, the result is the
    /// step's input schema followed by its error fields.
    pub fn schema_of(&self, step: &str, target: Option<&str>) -> Result<RowSchema, GraphError> {
        let mut stack = Vec::new();
        self.resolve_output(step, target, &mut stack)
    }

    /// Schema of the rows entering a step through its main and error hops
    pub fn input_schema_of(&self, step: &str) -> Result<RowSchema, GraphError> {
        self.require_step(step)?;
        let mut stack = Vec::new();
        self.resolve_input(step, &mut stack)
    }

    /// Schemas of the info streams feeding a step, by source step
    pub fn info_schemas_of(&self, step: &str) -> Result<Vec<(String, RowSchema)>, GraphError> {
        self.require_step(step)?;
        let mut stack = Vec::new();
        self.resolve_info(step, &mut stack)
    }

    /// Schema delivered by each main or error predecessor, unmerged
    pub fn predecessor_schemas(&self, step: &str) -> Result<Vec<(String, RowSchema)>, GraphError> {
        self.require_step(step)?;
        self.predecessors(step, false)
            .into_iter()
            .map(|prev| {
                let schema = self.schema_of(&prev, Some(step))?;
                Ok((prev, schema))
            })
            .collect()
    }

    fn resolve_output(
        &self,
        step: &str,
        target: Option<&str>,
        stack: &mut Vec<PairKey>,
    ) -> Result<RowSchema, GraphError> {
        let key: PairKey = (name_key(step), target.map(name_key));
        if let Some(cached) = lock(&self.caches.fields).get(&key) {
            return Ok(cached.clone());
        }

        let meta = self.require_step(step)?;
        if stack.iter().any(|k| k.0 == key.0) {
            return Err(GraphError::cyclic(format!(
                "cannot resolve fields of step '{}': it depends on itself",
                meta.name
            )));
        }
        stack.push(key.clone());
        let result = self.compute_output(step, target, stack);
        stack.pop();

        let schema = result?;
        lock(&self.caches.fields).insert(key, schema.clone());
        Ok(schema)
    }

    fn compute_output(
        &self,
        step: &str,
        target: Option<&str>,
        stack: &mut Vec<PairKey>,
    ) -> Result<RowSchema, GraphError> {
        let meta = self.require_step(step)?;
        let input = self.resolve_input(step, stack)?;

        if let Some(target) = target {
            if meta.is_sending_error_rows_to(target) {
                let mut schema = input;
                if let Some(eh) = meta.active_error_handling() {
                    schema.add_schema(&eh.error_fields(&meta.name)).map_err(|e| {
                        GraphError::invalid_structure(format!(
                            "error fields of step '{}': {}",
                            meta.name, e
                        ))
                    })?;
                }
                return Ok(schema);
            }
        }

        let info = self.resolve_info(step, stack)?;
        let context = FieldsContext {
            step_name: &meta.name,
            info: &info,
            next_step: target,
        };

        meta.plugin.output_fields(&context, input).map_err(|e| {
            GraphError::invalid_structure(format!("step '{}': {}", meta.name, e))
        })
    }

    fn resolve_input(&self, step: &str, stack: &mut Vec<PairKey>) -> Result<RowSchema, GraphError> {
        let mut merged: Option<RowSchema> = None;
        for prev in self.predecessors(step, false) {
            let schema = self.resolve_output(&prev, Some(step), stack)?;
            match merged.as_mut() {
                None => merged = Some(schema),
                Some(existing) => existing.merge_first_seen(&schema),
            }
        }
        Ok(merged.unwrap_or_default())
    }

    fn resolve_info(
        &self,
        step: &str,
        stack: &mut Vec<PairKey>,
    ) -> Result<Vec<(String, RowSchema)>, GraphError> {
        self.info_steps(step)
            .into_iter()
            .map(|source| {
                let schema = self.resolve_output(&source, Some(step), stack)?;
                Ok((source, schema))
            })
            .collect()
    }
}
