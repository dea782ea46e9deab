//! Single-slot background task tracking.

use parking_lot::Mutex;
use std::future::Future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Holds at most one running task of a kind.
///
/// Starting a task cancels the previous one first; tasks of the same kind
/// never run side by side.
pub struct TaskSlot {
    kind: &'static str,
    current: Mutex<Slot>,
}

#[derive(Default)]
struct Slot {
    cancel: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

impl TaskSlot {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            current: Mutex::new(Slot::default()),
        }
    }

    /// Cancel the running task, if any, then spawn `task` with a fresh token.
    ///
    /// Returns the new task's token.
    pub fn spawn<F, Fut>(&self, task: F) -> CancellationToken
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.current.lock();
        if let Some(previous) = slot.cancel.take() {
            if !previous.is_cancelled() && slot.handle.as_ref().is_some_and(|h| !h.is_finished()) {
                tracing::debug!(kind = self.kind, "superseding running task");
            }
            previous.cancel();
        }

        let cancel = CancellationToken::new();
        slot.handle = Some(tokio::spawn(task(cancel.clone())));
        slot.cancel = Some(cancel.clone());
        cancel
    }

    /// Cancel the running task. Returns true if one was still running.
    pub fn cancel(&self) -> bool {
        let slot = self.current.lock();
        let running = Self::running(&slot);
        if let Some(cancel) = &slot.cancel {
            cancel.cancel();
        }
        if running {
            tracing::debug!(kind = self.kind, "task cancelled");
        }
        running
    }

    fn running(slot: &Slot) -> bool {
        let live_token = slot.cancel.as_ref().is_some_and(|c| !c.is_cancelled());
        let live_task = slot.handle.as_ref().is_some_and(|h| !h.is_finished());
        live_token && live_task
    }

    /// Wait for the current task to finish. Returns false if there was none.
    pub async fn settle(&self) -> bool {
        let handle = self.current.lock().handle.take();
        match handle {
            Some(handle) => {
                if let Err(e) = handle.await {
                    if e.is_panic() {
                        tracing::warn!(kind = self.kind, "task panicked: {}", e);
                    }
                }
                true
            }
            None => false,
        }
    }
}
