// Pass Through Step
// Forwards every row unchanged

use super::StepPlugin;
use crate::error::StepError;
use crate::runtime::{StepIo, StepWorker};

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughPlugin;

impl StepPlugin for PassThroughPlugin {
    fn kind(&self) -> &'static str {
        "pass_through"
    }

    fn create_worker(&self, _copy: usize) -> Box<dyn StepWorker> {
        Box::new(PassThroughWorker)
    }

    fn config(&self) -> serde_json::Value {
        serde_json::Value::Object(Default::default())
    }
}

struct PassThroughWorker;

#[async_trait]
impl StepWorker for PassThroughWorker {
    async fn process_batch(&mut self, io: &mut StepIo) -> Result<bool, StepError> {
        match io.get_row().await? {
            Some(row) => {
                io.put_row(row).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
