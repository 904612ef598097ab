pub mod fields;
pub mod order;
pub mod run;
pub mod validate;

use crate::output;

use std::path::Path;

use color_eyre::eyre::{bail, WrapErr};
use color_eyre::Result;

use rowflow_engine::{PipelineDocument, PipelineGraph, PipelineParser, StepRegistry};

/// Read a pipeline document and build its graph with the built-in steps
pub fn load_pipeline(path: &Path) -> Result<(PipelineDocument, PipelineGraph)> {
    if !path.exists() {
        bail!("Pipeline file not found: {}", path.display());
    }

    output::status("Parsing", &format!("{}", path.display()));

    let document = PipelineParser::from_file(path)
        .wrap_err_with(|| format!("Failed to parse {}", path.display()))?;
    let graph = PipelineGraph::from_document(&document, &StepRegistry::with_builtin())
        .wrap_err_with(|| format!("Failed to build pipeline '{}'", document.name))?;

    Ok((document, graph))
}
