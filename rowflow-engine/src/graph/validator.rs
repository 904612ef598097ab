// Graph Validator
// Structural and schema checks run before a pipeline is prepared

use super::hop::HopKind;
use super::pipeline::PipelineGraph;
use super::step::StepMeta;
use super::GraphError;
use crate::row::{name_key, same_name, RowSchema};

use std::collections::HashSet;
use std::fmt;

/// Characters that make a field name awkward to reference downstream
const UNFRIENDLY_CHARS: &[char] = &[
    ' ', '.', ',', '-', '/', '+', '*', '\'', '\t', '"', '|', '@', '(', ')', '{', '}', '!', '^',
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RemarkSeverity {
    Ok,
    Warning,
    Error,
}

impl fmt::Display for RemarkSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemarkSeverity::Ok => write!(f, "ok"),
            RemarkSeverity::Warning => write!(f, "warning"),
            RemarkSeverity::Error => write!(f, "error"),
        }
    }
}

/// One finding of a validation run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRemark {
    pub severity: RemarkSeverity,
    /// Step the remark is about, `None` for graph-wide remarks
    pub step: Option<String>,
    pub message: String,
}

impl CheckRemark {
    pub fn ok(step: Option<&str>, message: impl Into<String>) -> Self {
        Self::new(RemarkSeverity::Ok, step, message)
    }

    pub fn warning(step: Option<&str>, message: impl Into<String>) -> Self {
        Self::new(RemarkSeverity::Warning, step, message)
    }

    pub fn error(step: Option<&str>, message: impl Into<String>) -> Self {
        Self::new(RemarkSeverity::Error, step, message)
    }

    fn new(severity: RemarkSeverity, step: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            severity,
            step: step.map(str::to_string),
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == RemarkSeverity::Error
    }
}

impl fmt::Display for CheckRemark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.step {
            Some(step) => write!(f, "[{}] {}: {}", self.severity, step, self.message),
            None => write!(f, "[{}] {}", self.severity, self.message),
        }
    }
}

/// Structural problems that prevent a pipeline from running
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub remarks: Vec<CheckRemark>,
}

impl ValidationError {
    pub fn single(remark: CheckRemark) -> Self {
        Self {
            remarks: vec![remark],
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.remarks.iter().map(|r| r.to_string()).collect();
        write!(f, "validation failed: {}", messages.join("; "))
    }
}

impl std::error::Error for ValidationError {}

impl From<GraphError> for ValidationError {
    fn from(err: GraphError) -> Self {
        Self::single(CheckRemark::error(None, err.message))
    }
}

/// What a step plugin sees when asked to check its own configuration
#[derive(Debug, Clone, Copy)]
pub struct CheckContext<'a> {
    pub graph: &'a PipelineGraph,
    pub step: &'a StepMeta,
    /// Merged schema entering the step
    pub input: &'a RowSchema,
    /// Schemas of the info streams feeding the step
    pub info: &'a [(String, RowSchema)],
}

/// Runs every check over a pipeline graph
pub struct GraphValidator<'a> {
    graph: &'a PipelineGraph,
}

impl<'a> GraphValidator<'a> {
    pub fn new(graph: &'a PipelineGraph) -> Self {
        Self { graph }
    }

    /// All remarks, in step natural order after the graph-wide ones
    pub fn check(&self) -> Vec<CheckRemark> {
        let mut remarks = Vec::new();

        self.check_names(&mut remarks);
        self.check_hops(&mut remarks);

        if let Some(cycle) = self.graph.cycle_path() {
            remarks.push(CheckRemark::error(
                None,
                format!("circular dependency detected: {}", cycle.join(" -> ")),
            ));
            // schemas cannot be resolved on a cyclic graph
            return remarks;
        }

        for name in self.graph.natural_order() {
            if let Some(step) = self.graph.find_step(&name) {
                self.check_step(step, &mut remarks);
            }
        }

        remarks
    }

    /// Warnings when the graph is valid, the list of errors otherwise
    pub fn validate(&self) -> Result<Vec<CheckRemark>, ValidationError> {
        let remarks = self.check();
        let (errors, rest): (Vec<_>, Vec<_>) = remarks.into_iter().partition(|r| r.is_error());
        if !errors.is_empty() {
            return Err(ValidationError { remarks: errors });
        }
        Ok(rest
            .into_iter()
            .filter(|r| r.severity == RemarkSeverity::Warning)
            .collect())
    }

    fn check_names(&self, remarks: &mut Vec<CheckRemark>) {
        let mut seen = HashSet::new();
        for step in self.graph.steps() {
            if step.name.trim().is_empty() {
                remarks.push(CheckRemark::error(None, "a step has an empty name"));
            }
            if !seen.insert(name_key(&step.name)) {
                remarks.push(CheckRemark::error(
                    Some(&step.name),
                    "step name is used more than once",
                ));
            }
        }
    }

    fn check_hops(&self, remarks: &mut Vec<CheckRemark>) {
        for hop in self.graph.hops() {
            for endpoint in [&hop.from, &hop.to] {
                if self.graph.find_step(endpoint).is_none() {
                    remarks.push(CheckRemark::error(
                        None,
                        format!("hop {} references unknown step '{}'", hop, endpoint),
                    ));
                }
            }
        }
    }

    fn check_step(&self, step: &StepMeta, remarks: &mut Vec<CheckRemark>) {
        let name = step.name.as_str();

        if self.graph.steps().len() > 1 && !self.graph.is_step_used_in_hops(name) {
            remarks.push(CheckRemark::warning(Some(name), "step is not used in any hop"));
        }

        self.check_error_handling(step, remarks);

        let predecessors = match self.graph.predecessor_schemas(name) {
            Ok(schemas) => schemas,
            Err(e) => {
                remarks.push(CheckRemark::error(Some(name), e.message));
                return;
            }
        };
        self.check_merge(name, &predecessors, remarks);

        let input = match self.graph.input_schema_of(name) {
            Ok(schema) => schema,
            Err(e) => {
                remarks.push(CheckRemark::error(Some(name), e.message));
                return;
            }
        };
        check_field_names(name, &input, remarks);

        if let Some(partitioning) = &step.partitioning {
            for (prev, schema) in &predecessors {
                if schema.index_of(&partitioning.field).is_none() {
                    remarks.push(CheckRemark::error(
                        Some(name),
                        format!(
                            "partitioning field '{}' is missing from the rows of '{}'",
                            partitioning.field, prev
                        ),
                    ));
                }
            }
        }

        let info = match self.graph.info_schemas_of(name) {
            Ok(info) => info,
            Err(e) => {
                remarks.push(CheckRemark::error(Some(name), e.message));
                return;
            }
        };

        if let Err(e) = self.graph.schema_of(name, None) {
            remarks.push(CheckRemark::error(Some(name), e.message));
        }

        let context = CheckContext {
            graph: self.graph,
            step,
            input: &input,
            info: &info,
        };
        remarks.extend(step.plugin.check(&context));
    }

    fn check_error_handling(&self, step: &StepMeta, remarks: &mut Vec<CheckRemark>) {
        let name = step.name.as_str();
        let error_hops: Vec<_> = self
            .graph
            .hops_from(name)
            .into_iter()
            .filter(|h| h.enabled && h.kind == HopKind::Error)
            .collect();

        match step.active_error_handling() {
            Some(eh) => {
                if !error_hops.iter().any(|h| same_name(&h.to, &eh.target_step)) {
                    remarks.push(CheckRemark::error(
                        Some(name),
                        format!(
                            "error handling targets '{}' but there is no error hop to it",
                            eh.target_step
                        ),
                    ));
                }
            }
            None => {
                for hop in error_hops {
                    remarks.push(CheckRemark::error(
                        Some(name),
                        format!(
                            "error hop to '{}' exists but error handling is not enabled",
                            hop.to
                        ),
                    ));
                }
            }
        }
    }

    fn check_merge(
        &self,
        name: &str,
        predecessors: &[(String, RowSchema)],
        remarks: &mut Vec<CheckRemark>,
    ) {
        let Some((first_name, first)) = predecessors.first() else {
            return;
        };

        for (other_name, other) in predecessors.iter().skip(1) {
            for (field, ours, theirs) in first.merge_conflicts(other) {
                remarks.push(CheckRemark::error(
                    Some(name),
                    format!(
                        "field '{}' is {} from '{}' but {} from '{}'",
                        field, ours, first_name, theirs, other_name
                    ),
                ));
            }

            let differences = first.layout_differences(other);
            if !differences.is_empty() {
                remarks.push(CheckRemark::warning(
                    Some(name),
                    format!(
                        "rows entering this step are not uniformly laid out ('{}' versus '{}'): {}",
                        first_name,
                        other_name,
                        differences.join(", ")
                    ),
                ));
            }
        }
    }
}

fn check_field_names(step: &str, input: &RowSchema, remarks: &mut Vec<CheckRemark>) {
    for duplicate in input.duplicate_names() {
        remarks.push(CheckRemark::error(
            Some(step),
            format!("field '{}' enters the step more than once", duplicate),
        ));
    }

    for field in input.iter() {
        if field.name.trim().is_empty() {
            remarks.push(CheckRemark::warning(Some(step), "a field has an empty name"));
        } else if field.name.contains(UNFRIENDLY_CHARS) {
            remarks.push(CheckRemark::warning(
                Some(step),
                format!("field name '{}' contains unfriendly characters", field.name),
            ));
        }
    }
}

impl PipelineGraph {
    /// Every remark produced by the validator
    pub fn validate_graph(&self) -> Vec<CheckRemark> {
        GraphValidator::new(self).check()
    }

    /// Warnings when the graph can run, a `ValidationError` otherwise
    pub fn validate(&self) -> Result<Vec<CheckRemark>, ValidationError> {
        GraphValidator::new(self).validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ErrorHandling, Hop};
    use crate::row::ValueType;
    use crate::steps::generate::{GenerateField, GeneratePlugin};
    use crate::steps::pass_through::PassThroughPlugin;

    use std::sync::Arc;

    fn pass(name: &str) -> StepMeta {
        StepMeta::new(name, Arc::new(PassThroughPlugin))
    }

    fn gen(name: &str, fields: &[(&str, ValueType)]) -> StepMeta {
        StepMeta::new(
            name,
            Arc::new(GeneratePlugin {
                limit: 1,
                fields: fields
                    .iter()
                    .map(|(n, t)| GenerateField::constant(*n, *t, ""))
                    .collect(),
                sequence_field: None,
                sequence_start: 1,
            }),
        )
    }

    #[test]
    fn test_valid_linear_graph() {
        let mut g = PipelineGraph::new("p");
        g.add_step(gen("gen", &[("id", ValueType::Integer)])).unwrap();
        g.add_step(pass("out")).unwrap();
        g.add_hop(Hop::new("gen", "out")).unwrap();

        assert!(g.validate().unwrap().is_empty());
    }

    #[test]
    fn test_cycle_is_error() {
        let mut g = PipelineGraph::new("p");
        g.add_step(pass("a")).unwrap();
        g.add_step(pass("b")).unwrap();
        g.add_hop(Hop::new("a", "b")).unwrap();
        g.add_hop(Hop::new("b", "a")).unwrap();

        let err = g.validate().unwrap_err();
        assert!(err.remarks[0].message.contains("circular dependency"));
    }

    #[test]
    fn test_incompatible_merge_is_error() {
        let mut g = PipelineGraph::new("p");
        g.add_step(gen("a", &[("id", ValueType::Integer)])).unwrap();
        g.add_step(gen("b", &[("id", ValueType::String)])).unwrap();
        g.add_step(pass("m")).unwrap();
        g.add_hop(Hop::new("a", "m")).unwrap();
        g.add_hop(Hop::new("b", "m")).unwrap();

        let err = g.validate().unwrap_err();
        assert_eq!(err.remarks.len(), 1);
        assert_eq!(err.remarks[0].step.as_deref(), Some("m"));
    }

    #[test]
    fn test_non_uniform_layout_is_warning() {
        let mut g = PipelineGraph::new("p");
        g.add_step(gen("a", &[("id", ValueType::Integer)])).unwrap();
        g.add_step(gen("b", &[("id", ValueType::Integer), ("x", ValueType::String)]))
            .unwrap();
        g.add_step(pass("m")).unwrap();
        g.add_hop(Hop::new("a", "m")).unwrap();
        g.add_hop(Hop::new("b", "m")).unwrap();

        let warnings = g.validate().unwrap();
        assert!(warnings
            .iter()
            .any(|w| w.message.contains("not uniformly laid out")));
    }

    #[test]
    fn test_unused_step_and_field_name_warnings() {
        let mut g = PipelineGraph::new("p");
        g.add_step(gen("gen", &[("first name", ValueType::String)])).unwrap();
        g.add_step(pass("out")).unwrap();
        g.add_step(pass("idle")).unwrap();
        g.add_hop(Hop::new("gen", "out")).unwrap();

        let warnings = g.validate().unwrap();
        assert!(warnings
            .iter()
            .any(|w| w.step.as_deref() == Some("idle") && w.message.contains("not used")));
        assert!(warnings
            .iter()
            .any(|w| w.message.contains("unfriendly characters")));
    }

    #[test]
    fn test_error_handling_without_hop_is_error() {
        let mut g = PipelineGraph::new("p");
        g.add_step(gen("gen", &[("id", ValueType::Integer)])).unwrap();
        g.add_step(pass("t").with_error_handling(ErrorHandling::new("errors")))
            .unwrap();
        g.add_step(pass("errors")).unwrap();
        g.add_hop(Hop::new("gen", "t")).unwrap();
        g.add_hop(Hop::new("t", "errors")).unwrap();

        let err = g.validate().unwrap_err();
        assert!(err.remarks[0].message.contains("no error hop"));
    }

    #[test]
    fn test_error_hop_without_handling_is_error() {
        let mut g = PipelineGraph::new("p");
        g.add_step(gen("gen", &[("id", ValueType::Integer)])).unwrap();
        g.add_step(pass("errors")).unwrap();
        g.add_hop(Hop::error("gen", "errors")).unwrap();

        assert!(g.validate().is_err());
    }

    #[test]
    fn test_partition_field_must_reach_step() {
        let mut g = PipelineGraph::new("p");
        g.add_step(gen("gen", &[("id", ValueType::Integer)])).unwrap();
        g.add_step(
            pass("split")
                .with_copies(2)
                .with_partitioning("customer", crate::graph::PartitionMethod::Hash),
        )
        .unwrap();
        g.add_hop(Hop::new("gen", "split")).unwrap();

        let err = g.validate().unwrap_err();
        assert!(err.remarks[0].message.contains("partitioning field 'customer'"));
    }

    #[test]
    fn test_graph_error_converts() {
        let err: ValidationError = GraphError::unknown_step("hop a -> b").into();
        assert!(err.to_string().contains("hop a -> b"));
    }
}
