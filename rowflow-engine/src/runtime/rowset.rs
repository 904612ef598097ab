// Row Sets
// Bounded single-producer, single-consumer row queues between worker copies

use crate::graph::HopKind;
use crate::row::Row;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};

/// Identity of a row set: which worker copies and hop it connects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowSetMeta {
    pub origin_step: String,
    pub origin_copy: usize,
    pub target_step: String,
    pub target_copy: usize,
    pub kind: HopKind,
}

impl fmt::Display for RowSetMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} - {}.{}",
            self.origin_step, self.origin_copy, self.target_step, self.target_copy
        )
    }
}

/// Outcome of putting a row
#[derive(Debug, PartialEq)]
pub enum PutOutcome {
    Sent,
    /// The wait elapsed while the queue was full; the row is handed back
    Full(Row),
    /// The consumer is gone; the row is handed back
    Closed(Row),
}

/// Outcome of getting a row
#[derive(Debug, PartialEq)]
pub enum GetOutcome {
    Row(Row),
    /// Nothing arrived within the wait, the producer is still running
    Empty,
    /// The producer signalled end of stream and the queue is drained
    Done,
}

/// Create a row set with the given capacity (at least one row)
pub fn row_set(meta: RowSetMeta, capacity: usize) -> (RowSender, RowReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let meta = Arc::new(meta);
    (
        RowSender {
            meta: Arc::clone(&meta),
            tx: Some(tx),
        },
        RowReceiver { meta, rx },
    )
}

/// Write side of a row set, owned by the producing worker copy
#[derive(Debug)]
pub struct RowSender {
    meta: Arc<RowSetMeta>,
    tx: Option<mpsc::Sender<Row>>,
}

impl RowSender {
    pub fn meta(&self) -> &RowSetMeta {
        &self.meta
    }

    /// Put a row, waiting at most `wait` for room
    pub async fn put_wait(&self, row: Row, wait: Duration) -> PutOutcome {
        let Some(tx) = &self.tx else {
            return PutOutcome::Closed(row);
        };
        match tokio::time::timeout(wait, tx.reserve()).await {
            Ok(Ok(permit)) => {
                permit.send(row);
                PutOutcome::Sent
            }
            Ok(Err(_)) => PutOutcome::Closed(row),
            Err(_) => PutOutcome::Full(row),
        }
    }

    /// Put a row without waiting
    pub fn try_put(&self, row: Row) -> PutOutcome {
        let Some(tx) = &self.tx else {
            return PutOutcome::Closed(row);
        };
        match tx.try_send(row) {
            Ok(()) => PutOutcome::Sent,
            Err(TrySendError::Full(row)) => PutOutcome::Full(row),
            Err(TrySendError::Closed(row)) => PutOutcome::Closed(row),
        }
    }

    /// Signal end of stream; rows already queued stay readable
    pub fn set_done(&mut self) {
        self.tx = None;
    }

    pub fn is_done(&self) -> bool {
        self.tx.is_none()
    }

    /// Rows currently waiting in the queue
    pub fn size(&self) -> usize {
        self.tx
            .as_ref()
            .map(|tx| tx.max_capacity() - tx.capacity())
            .unwrap_or(0)
    }
}

/// Read side of a row set, owned by the consuming worker copy
#[derive(Debug)]
pub struct RowReceiver {
    meta: Arc<RowSetMeta>,
    rx: mpsc::Receiver<Row>,
}

impl RowReceiver {
    pub fn meta(&self) -> &RowSetMeta {
        &self.meta
    }

    /// Get a row, waiting at most `wait` for one to arrive
    pub async fn get_wait(&mut self, wait: Duration) -> GetOutcome {
        match tokio::time::timeout(wait, self.rx.recv()).await {
            Ok(Some(row)) => GetOutcome::Row(row),
            Ok(None) => GetOutcome::Done,
            Err(_) => GetOutcome::Empty,
        }
    }

    /// Get a row without waiting
    pub fn try_get(&mut self) -> GetOutcome {
        match self.rx.try_recv() {
            Ok(row) => GetOutcome::Row(row),
            Err(TryRecvError::Empty) => GetOutcome::Empty,
            Err(TryRecvError::Disconnected) => GetOutcome::Done,
        }
    }

    /// Stop accepting rows; the producer sees the queue as closed
    pub fn close(&mut self) {
        self.rx.close();
    }
}
