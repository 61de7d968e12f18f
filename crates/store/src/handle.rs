use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::StoreError;

/// Owns the store's dispatch task. Dropping the handle aborts the task.
#[derive(Debug)]
pub struct StoreHandle {
    task: Option<JoinHandle<Result<(), StoreError>>>,
}

impl StoreHandle {
    pub(crate) fn new(task: JoinHandle<Result<(), StoreError>>) -> Self {
        Self { task: Some(task) }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Abort the dispatch task and wait for it to wind down.
    pub async fn stop(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
            debug!("store dispatch stopped");
        }
    }
}

impl Drop for StoreHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
