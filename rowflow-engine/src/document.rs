// Pipeline Documents
// Serializable form of a pipeline graph, stored as YAML or JSON

use crate::config::ExecutionConfig;
use crate::error::StepError;
use crate::graph::{ErrorHandling, GraphError, Hop, Partitioning, PipelineGraph, StepMeta};
use crate::steps::StepRegistry;

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Errors raised while loading or saving pipeline documents
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid YAML document: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid JSON document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("step '{step}': {source}")]
    Step {
        step: String,
        #[source]
        source: StepError,
    },

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// A pipeline as stored on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDocument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "ExecutionConfig::is_default")]
    pub settings: ExecutionConfig,
    #[serde(default)]
    pub steps: Vec<StepDocument>,
    #[serde(default)]
    pub hops: Vec<Hop>,
}

/// One step as stored on disk; `config` is handed to the kind's factory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDocument {
    pub name: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_copies", skip_serializing_if = "is_one")]
    pub copies: usize,
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub distribute: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partitioning: Option<Partitioning>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_handling: Option<ErrorHandling>,
    #[serde(default, skip_serializing_if = "is_empty_config")]
    pub config: serde_json::Value,
}

fn default_copies() -> usize {
    1
}

fn is_one(value: &usize) -> bool {
    *value == 1
}

fn default_true() -> bool {
    true
}

fn is_true(value: &bool) -> bool {
    *value
}

fn is_empty_config(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

impl StepDocument {
    fn from_meta(step: &StepMeta) -> Self {
        Self {
            name: step.name.clone(),
            kind: step.kind().to_string(),
            description: step.description.clone(),
            copies: step.copies,
            distribute: step.distribute,
            partitioning: step.partitioning.clone(),
            error_handling: step.error_handling.clone(),
            config: match step.plugin.config() {
                config if is_empty_config(&config) => serde_json::Value::Null,
                config => config,
            },
        }
    }

    fn to_meta(&self, registry: &StepRegistry) -> Result<StepMeta, PersistError> {
        let plugin = registry
            .create(&self.kind, &self.config)
            .map_err(|source| PersistError::Step {
                step: self.name.clone(),
                source,
            })?;

        let mut meta = StepMeta::new(self.name.clone(), plugin)
            .with_copies(self.copies)
            .with_distribute(self.distribute);
        meta.description = self.description.clone();
        meta.partitioning = self.partitioning.clone();
        meta.error_handling = self.error_handling.clone();
        Ok(meta)
    }
}

impl PipelineGraph {
    /// The storable form of this graph
    pub fn to_document(&self) -> PipelineDocument {
        PipelineDocument {
            name: self.name.clone(),
            description: self.description.clone(),
            settings: self.settings.clone(),
            steps: self.steps().iter().map(StepDocument::from_meta).collect(),
            hops: self.hops().to_vec(),
        }
    }

    /// Rebuild a graph, creating each step's plugin through `registry`
    pub fn from_document(
        doc: &PipelineDocument,
        registry: &StepRegistry,
    ) -> Result<Self, PersistError> {
        let mut graph = PipelineGraph::new(doc.name.clone()).with_settings(doc.settings.clone());
        graph.description = doc.description.clone();

        for step in &doc.steps {
            graph.add_step(step.to_meta(registry)?)?;
        }
        for hop in &doc.hops {
            graph.add_hop(hop.clone())?;
        }

        debug!(
            pipeline = %graph.name,
            steps = graph.steps().len(),
            hops = graph.hops().len(),
            "pipeline document loaded"
        );
        Ok(graph)
    }
}

/// Reads and writes pipeline documents
pub struct PipelineParser;

impl PipelineParser {
    pub fn from_yaml_str(content: &str) -> Result<PipelineDocument, PersistError> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_json_str(content: &str) -> Result<PipelineDocument, PersistError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Parse a document file; `.json` files are read as JSON, anything else as YAML
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<PipelineDocument, PersistError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| PersistError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        if is_json(path) {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        }
    }

    /// Parse a document file and build its graph
    pub fn load<P: AsRef<Path>>(
        path: P,
        registry: &StepRegistry,
    ) -> Result<PipelineGraph, PersistError> {
        let doc = Self::from_file(path)?;
        PipelineGraph::from_document(&doc, registry)
    }

    pub fn to_yaml(doc: &PipelineDocument) -> Result<String, PersistError> {
        Ok(serde_yaml::to_string(doc)?)
    }

    pub fn to_json(doc: &PipelineDocument) -> Result<String, PersistError> {
        Ok(serde_json::to_string_pretty(doc)?)
    }

    /// Write a document, choosing the format from the file extension
    pub fn to_file<P: AsRef<Path>>(doc: &PipelineDocument, path: P) -> Result<(), PersistError> {
        let path = path.as_ref();
        let content = if is_json(path) {
            Self::to_json(doc)?
        } else {
            Self::to_yaml(doc)?
        };
        fs::write(path, content).map_err(|source| PersistError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}
