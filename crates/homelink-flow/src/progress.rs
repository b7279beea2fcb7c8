//! Background tasks for show-progress steps.
//!
//! A step that starts a long-running operation (add-on install, firmware
//! flash) wraps it in a [`ProgressTask`]. The task runs to completion on its
//! own; the step keeps the handle to pick up the result on re-entry, and the
//! manager gets a [`ProgressWatch`] so it can re-enter the step as soon as
//! the operation finishes.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::task::AbortHandle;

/// A spawned background operation with a retrievable result.
pub struct ProgressTask<T: Send + 'static> {
    result: Arc<Mutex<Option<T>>>,
    done_rx: watch::Receiver<bool>,
    abort: AbortHandle,
}

impl<T: Send + 'static> ProgressTask<T> {
    /// Spawn `fut` on the runtime and track its completion.
    pub fn spawn<F>(fut: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        let result = Arc::new(Mutex::new(None));
        let (done_tx, done_rx) = watch::channel(false);

        let result_slot = result.clone();
        let handle = tokio::spawn(async move {
            let out = fut.await;
            *result_slot.lock().await = Some(out);
            let _ = done_tx.send(true);
        });

        Self {
            result,
            done_rx,
            abort: handle.abort_handle(),
        }
    }

    /// Whether the operation has completed.
    pub fn is_finished(&self) -> bool {
        *self.done_rx.borrow()
    }

    /// Take the result of a finished operation.
    ///
    /// Returns `None` if the operation is still running or the result was
    /// already taken.
    pub async fn take_result(&self) -> Option<T> {
        self.result.lock().await.take()
    }

    /// A watch the flow manager uses to re-enter the step on completion.
    pub fn watch(&self) -> ProgressWatch {
        ProgressWatch {
            done_rx: self.done_rx.clone(),
        }
    }

    /// Attachment handed to the engine via
    /// [`crate::StepContext::attach_progress`].
    pub fn attachment(&self) -> ProgressAttachment {
        ProgressAttachment {
            watch: self.watch(),
            abort: self.abort.clone(),
        }
    }
}

/// Completion signal for a [`ProgressTask`].
#[derive(Clone)]
pub struct ProgressWatch {
    done_rx: watch::Receiver<bool>,
}

impl ProgressWatch {
    /// Wait until the tracked operation completes.
    pub async fn wait(mut self) {
        if *self.done_rx.borrow() {
            return;
        }
        while self.done_rx.changed().await.is_ok() {
            if *self.done_rx.borrow() {
                return;
            }
        }
    }
}

/// Completion watch plus abort handle, tracked by the flow manager for the
/// lifetime of the progress step.
pub struct ProgressAttachment {
    pub watch: ProgressWatch,
    pub abort: AbortHandle,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_result_available_after_completion() {
        let task = ProgressTask::spawn(async { 41 + 1 });
        task.watch().wait().await;

        assert!(task.is_finished());
        assert_eq!(task.take_result().await, Some(42));
        // A result can only be taken once.
        assert_eq!(task.take_result().await, None);
    }

    #[tokio::test]
    async fn test_watch_after_finish_returns_immediately() {
        let task = ProgressTask::spawn(async { "done" });
        task.watch().wait().await;

        // A watch taken after completion must not hang.
        tokio::time::timeout(Duration::from_secs(1), task.watch().wait())
            .await
            .expect("watch should resolve immediately");
    }

    #[tokio::test]
    async fn test_abort_drops_result() {
        let task = ProgressTask::spawn(async {
            tokio::time::sleep(Duration::from_secs(600)).await;
            "never"
        });
        task.attachment().abort.abort();

        // The watch never fires for an aborted task; the result stays empty.
        assert!(task.take_result().await.is_none());
    }
}
