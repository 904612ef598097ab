// Collect Step
// Keeps every row it sees in a shared in-memory buffer and forwards it

use super::StepPlugin;
use crate::error::StepError;
use crate::row::Row;
use crate::runtime::{StepIo, StepWorker};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// A row as captured by a collect step
#[derive(Debug, Clone)]
pub struct CollectedRow {
    pub row: Row,
    pub received_at: Instant,
    pub copy: usize,
}

/// Shared buffer filled by every copy of a collect step
#[derive(Debug, Clone, Default)]
pub struct RowCollector {
    rows: Arc<Mutex<Vec<CollectedRow>>>,
}

impl RowCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<CollectedRow>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, row: Row, copy: usize) {
        self.lock().push(CollectedRow {
            row,
            received_at: Instant::now(),
            copy,
        });
    }

    /// Captured rows in arrival order
    pub fn rows(&self) -> Vec<CollectedRow> {
        self.lock().clone()
    }

    /// Captured row values in arrival order
    pub fn values(&self) -> Vec<Row> {
        self.lock().iter().map(|c| c.row.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Arrival time of the first captured row
    pub fn first_received_at(&self) -> Option<Instant> {
        self.lock().first().map(|c| c.received_at)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

/// The buffer is not part of the stored configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectPlugin {
    #[serde(skip)]
    collector: RowCollector,
}

impl CollectPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    /// A plugin writing into an existing buffer
    pub fn with_collector(collector: RowCollector) -> Self {
        Self { collector }
    }

    pub fn collector(&self) -> &RowCollector {
        &self.collector
    }
}

impl StepPlugin for CollectPlugin {
    fn kind(&self) -> &'static str {
        "collect"
    }

    fn create_worker(&self, copy: usize) -> Box<dyn StepWorker> {
        Box::new(CollectWorker {
            collector: self.collector.clone(),
            copy,
        })
    }

    fn config(&self) -> serde_json::Value {
        serde_json::Value::Object(Default::default())
    }
}

struct CollectWorker {
    collector: RowCollector,
    copy: usize,
}

#[async_trait]
impl StepWorker for CollectWorker {
    async fn process_batch(&mut self, io: &mut StepIo) -> Result<bool, StepError> {
        let Some(row) = io.get_row().await? else {
            return Ok(false);
        };
        self.collector.push(row.clone(), self.copy);
        io.put_row(row).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::Value;

    #[test]
    fn test_collector_is_shared_between_clones() {
        let plugin = CollectPlugin::new();
        let handle = plugin.collector().clone();
        plugin.collector().push(vec![Value::Integer(1)], 0);
        plugin.collector().push(vec![Value::Integer(2)], 1);

        assert_eq!(handle.len(), 2);
        assert_eq!(handle.values()[1], vec![Value::Integer(2)]);
        assert_eq!(handle.rows()[1].copy, 1);
        assert!(handle.first_received_at().is_some());

        handle.clear();
        assert!(plugin.collector().is_empty());
    }
}
