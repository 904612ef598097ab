// Shared Graph
// A pipeline graph edited and queried from several threads

use super::pipeline::PipelineGraph;

use std::sync::{Arc, PoisonError, RwLock};

/// Graph behind a read/write lock: mutations take the write side, queries the
/// read side
#[derive(Debug, Clone, Default)]
pub struct SharedGraph {
    inner: Arc<RwLock<PipelineGraph>>,
}

impl SharedGraph {
    pub fn new(graph: PipelineGraph) -> Self {
        Self {
            inner: Arc::new(RwLock::new(graph)),
        }
    }

    /// Run a mutation under the write lock
    pub fn edit<R>(&self, f: impl FnOnce(&mut PipelineGraph) -> R) -> R {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Run a query under the read lock
    pub fn read<R>(&self, f: impl FnOnce(&PipelineGraph) -> R) -> R {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    /// An independent copy of the current graph, e.g. to hand to an execution
    pub fn snapshot(&self) -> PipelineGraph {
        self.read(|g| g.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Hop, StepMeta};
    use crate::steps::pass_through::PassThroughPlugin;

    use std::thread;

    #[test]
    fn test_concurrent_queries_and_edits() {
        let shared = SharedGraph::new(PipelineGraph::new("shared"));
        shared
            .edit(|g| {
                g.add_step(StepMeta::new("a", Arc::new(PassThroughPlugin)))?;
                g.add_step(StepMeta::new("b", Arc::new(PassThroughPlugin)))
            })
            .unwrap();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let shared = shared.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        let order = shared.read(|g| g.natural_order());
                        assert_eq!(order.len(), 2);
                    }
                })
            })
            .collect();

        shared.edit(|g| g.add_hop(Hop::new("b", "a"))).unwrap();

        for reader in readers {
            reader.join().unwrap();
        }

        assert_eq!(shared.read(|g| g.natural_order()), vec!["b", "a"]);
        assert_eq!(shared.snapshot().hops().len(), 1);
    }
}
