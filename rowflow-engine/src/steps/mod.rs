// Steps Module
// Step plugin contract, the kind registry and the built-in step kinds

pub mod block_until_finished;
pub mod check_value;
pub mod collect;
pub mod delay;
pub mod detect_last_row;
pub mod fields_change_sequence;
pub mod generate;
pub mod pass_through;
pub mod stream_lookup;
pub mod text_file_input;
pub mod text_file_output;

// Re-export key types
pub use block_until_finished::{BlockUntilFinishedPlugin, WatchedStep};
pub use check_value::CheckValuePlugin;
pub use collect::{CollectPlugin, CollectedRow, RowCollector};
pub use delay::DelayPlugin;
pub use detect_last_row::DetectLastRowPlugin;
pub use fields_change_sequence::FieldsChangeSequencePlugin;
pub use generate::{GenerateField, GeneratePlugin};
pub use pass_through::PassThroughPlugin;
pub use stream_lookup::{LookupKey, LookupValue, StreamLookupPlugin};
pub use text_file_input::{TextField, TextFileInputPlugin};
pub use text_file_output::TextFileOutputPlugin;

use crate::error::StepError;
use crate::graph::validator::CheckContext;
use crate::graph::{CheckRemark, FieldsContext};
use crate::row::{RowSchema, SchemaError};
use crate::runtime::StepWorker;

use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A step kind: its schema transform, its checks and its worker factory
pub trait StepPlugin: Send + Sync + fmt::Debug {
    /// Registry identifier of this kind
    fn kind(&self) -> &'static str;

    /// Schema this step emits given the merged schema entering it
    fn output_fields(
        &self,
        _ctx: &FieldsContext<'_>,
        input: RowSchema,
    ) -> Result<RowSchema, SchemaError> {
        Ok(input)
    }

    /// Step-specific validation remarks
    fn check(&self, _ctx: &CheckContext<'_>) -> Vec<CheckRemark> {
        Vec::new()
    }

    /// A fresh worker for one copy of the step
    fn create_worker(&self, copy: usize) -> Box<dyn StepWorker>;

    /// Configuration as stored in pipeline documents
    fn config(&self) -> serde_json::Value;
}

/// Builds a plugin from its stored configuration
pub type PluginFactory =
    Arc<dyn Fn(&serde_json::Value) -> Result<Arc<dyn StepPlugin>, StepError> + Send + Sync>;

/// Step kinds known to a process, built once and passed where plugins are created
#[derive(Clone, Default)]
pub struct StepRegistry {
    factories: BTreeMap<String, PluginFactory>,
}

impl fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl StepRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in step kind
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("pass_through", |_| Ok(Arc::new(PassThroughPlugin)));
        registry.register("generate", from_config::<GeneratePlugin>);
        registry.register("collect", from_config::<CollectPlugin>);
        registry.register("block_until_finished", from_config::<BlockUntilFinishedPlugin>);
        registry.register("detect_last_row", from_config::<DetectLastRowPlugin>);
        registry.register("fields_change_sequence", from_config::<FieldsChangeSequencePlugin>);
        registry.register("delay", from_config::<DelayPlugin>);
        registry.register("stream_lookup", from_config::<StreamLookupPlugin>);
        registry.register("check_value", from_config::<CheckValuePlugin>);
        registry.register("text_file_input", from_config::<TextFileInputPlugin>);
        registry.register("text_file_output", from_config::<TextFileOutputPlugin>);
        registry
    }

    /// Register or replace a step kind
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&serde_json::Value) -> Result<Arc<dyn StepPlugin>, StepError> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
    }

    /// Build a plugin of the given kind from its configuration
    pub fn create(
        &self,
        kind: &str,
        config: &serde_json::Value,
    ) -> Result<Arc<dyn StepPlugin>, StepError> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| StepError::config(format!("unknown step kind '{}'", kind)))?;
        factory(config)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered kinds in sorted order
    pub fn kinds(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

/// Factory for plugins whose configuration deserializes into the plugin itself
pub fn from_config<T>(config: &serde_json::Value) -> Result<Arc<dyn StepPlugin>, StepError>
where
    T: StepPlugin + DeserializeOwned + 'static,
{
    let config = if config.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        config.clone()
    };
    let plugin: T = serde_json::from_value(config)
        .map_err(|e| StepError::config(format!("invalid step configuration: {}", e)))?;
    Ok(Arc::new(plugin))
}

/// Serialize a plugin's configuration, falling back to null
pub(crate) fn to_config<T: serde::Serialize>(plugin: &T) -> serde_json::Value {
    serde_json::to_value(plugin).unwrap_or(serde_json::Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_kinds() {
        let registry = StepRegistry::with_builtin();
        assert_eq!(registry.kinds().len(), 11);
        assert!(registry.contains("block_until_finished"));
        assert!(!registry.contains("sql"));
    }

    #[test]
    fn test_create_from_config() {
        let registry = StepRegistry::with_builtin();
        let plugin = registry
            .create("delay", &json!({ "delay_ms": 5 }))
            .unwrap();
        assert_eq!(plugin.kind(), "delay");
        assert_eq!(plugin.config(), json!({ "delay_ms": 5 }));

        let pass = registry.create("pass_through", &serde_json::Value::Null).unwrap();
        assert_eq!(pass.kind(), "pass_through");
    }

    #[test]
    fn test_unknown_kind_and_bad_config() {
        let registry = StepRegistry::with_builtin();
        assert!(matches!(
            registry.create("nope", &json!({})),
            Err(StepError::Config(_))
        ));
        assert!(registry
            .create("delay", &json!({ "delay_ms": "soon" }))
            .is_err());
    }

    #[test]
    fn test_custom_registration() {
        let mut registry = StepRegistry::new();
        registry.register("noop", |_| Ok(Arc::new(PassThroughPlugin)));
        assert_eq!(registry.kinds(), vec!["noop".to_string()]);
    }
}
