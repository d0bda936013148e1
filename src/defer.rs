//! DeferQueue — the explicit apply-after-current-turn primitive.
//!
//! Store mutations triggered by live listeners are never applied inside the
//! callback that observed the remote change; they are scheduled here and run
//! when the owner drains the queue. Once scheduled, a task runs — draining
//! cannot be cancelled partway, matching queued-microtask semantics.

use std::future::Future;
use std::pin::Pin;

use parking_lot::Mutex;

type DeferredTask = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Default)]
pub struct DeferQueue {
    tasks: Mutex<Vec<DeferredTask>>,
}

impl DeferQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `task` for the next drain. Safe to call from inside a
    /// running task or a listener callback.
    pub fn schedule(&self, task: impl Future<Output = ()> + Send + 'static) {
        self.tasks.lock().push(Box::pin(task));
    }

    /// Number of tasks waiting for the next drain.
    pub fn pending(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Run scheduled tasks to a fixpoint. Tasks scheduled while draining
    /// run in the same drain, after the current batch.
    pub async fn drain(&self) {
        loop {
            let batch: Vec<DeferredTask> = {
                let mut tasks = self.tasks.lock();
                if tasks.is_empty() {
                    return;
                }
                tasks.drain(..).collect()
            };
            for task in batch {
                task.await;
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
