// Delay Step
// Forwards rows after a fixed pause each

use super::{to_config, StepPlugin};
use crate::error::StepError;
use crate::runtime::{StepIo, StepWorker};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayPlugin {
    /// Pause before each row is sent, in milliseconds
    pub delay_ms: u64,
}

impl DelayPlugin {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay_ms: delay.as_millis().min(u64::MAX as u128) as u64,
        }
    }
}

impl StepPlugin for DelayPlugin {
    fn kind(&self) -> &'static str {
        "delay"
    }

    fn create_worker(&self, _copy: usize) -> Box<dyn StepWorker> {
        Box::new(DelayWorker {
            delay: Duration::from_millis(self.delay_ms),
        })
    }

    fn config(&self) -> serde_json::Value {
        to_config(self)
    }
}

struct DelayWorker {
    delay: Duration,
}

#[async_trait]
impl StepWorker for DelayWorker {
    async fn process_batch(&mut self, io: &mut StepIo) -> Result<bool, StepError> {
        let Some(row) = io.get_row().await? else {
            return Ok(false);
        };
        io.sleep(self.delay).await?;
        io.put_row(row).await?;
        Ok(true)
    }
}
