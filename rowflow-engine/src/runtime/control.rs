// Execution Control
// Cooperative stop, pause and safe-stop flags observed by every worker

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug)]
struct ControlInner {
    stop: watch::Sender<bool>,
    pause: watch::Sender<bool>,
    safe_stop: AtomicBool,
}

/// Flags shared between the coordinator and its workers
#[derive(Debug, Clone)]
pub struct ExecutionControl {
    inner: Arc<ControlInner>,
}

impl Default for ExecutionControl {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionControl {
    pub fn new() -> Self {
        let (stop, _) = watch::channel(false);
        let (pause, _) = watch::channel(false);
        Self {
            inner: Arc::new(ControlInner {
                stop,
                pause,
                safe_stop: AtomicBool::new(false),
            }),
        }
    }

    /// Ask every worker to stop; also wakes workers that wait on pause
    pub fn stop_all(&self) {
        self.inner.stop.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.stop.borrow()
    }

    /// Resolves once a stop was requested
    pub async fn stopped(&self) {
        let mut rx = self.inner.stop.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Set the pause flag; returns whether it changed
    pub fn set_paused(&self, paused: bool) -> bool {
        self.inner.pause.send_if_modified(|current| {
            if *current == paused {
                false
            } else {
                *current = paused;
                true
            }
        })
    }

    pub fn is_paused(&self) -> bool {
        *self.inner.pause.borrow()
    }

    /// Wait until the pipeline is resumed or stopped
    pub async fn wait_while_paused(&self) {
        if !self.is_paused() {
            return;
        }
        let mut pause = self.inner.pause.subscribe();
        let mut stop = self.inner.stop.subscribe();
        tokio::select! {
            _ = pause.wait_for(|paused| !*paused) => {}
            _ = stop.wait_for(|stopped| *stopped) => {}
        }
    }

    /// Ask input steps to stop reading new data and let the rest drain
    pub fn safe_stop(&self) {
        self.inner.safe_stop.store(true, Ordering::Release);
    }

    pub fn is_safe_stopping(&self) -> bool {
        self.inner.safe_stop.load(Ordering::Acquire)
    }
}
