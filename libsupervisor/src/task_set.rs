use std::future::Future;
use std::sync::Arc;

use log::error;
use parking_lot::Mutex;
use tokio::task::JoinSet;

/// Receives the error of every background task that fails.
pub trait ErrorHandler: Send + Sync {
    fn task_failed(&self, error: anyhow::Error);
}

/// Default handler: log and carry on.
pub struct LogErrors;

impl ErrorHandler for LogErrors {
    fn task_failed(&self, error: anyhow::Error) {
        error!("background task failed: {error:?}");
    }
}

/// A group of fire-and-forget tasks sharing one failure handler.
///
/// A failing task never takes the process down. Panics reach the handler
/// too, once the set is next touched by `spawn`. Dropping the set aborts
/// whatever is still running.
pub struct TaskSet {
    tasks: Mutex<JoinSet<()>>,
    handler: Arc<dyn ErrorHandler>,
}

impl Default for TaskSet {
    fn default() -> Self {
        Self::new(Arc::new(LogErrors))
    }
}

impl TaskSet {
    pub fn new(handler: Arc<dyn ErrorHandler>) -> Self {
        Self {
            tasks: Mutex::new(JoinSet::new()),
            handler,
        }
    }

    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler = self.handler.clone();
        let mut tasks = self.tasks.lock();
        // reap finished tasks so the set does not grow without bound
        while let Some(finished) = tasks.try_join_next() {
            if let Err(e) = finished
                && e.is_panic()
            {
                self.handler
                    .task_failed(anyhow::Error::new(e).context("background task panicked"));
            }
        }
        tasks.spawn(async move {
            if let Err(e) = task.await {
                handler.task_failed(e);
            }
        });
    }

    /// Number of tasks not yet reaped.
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
