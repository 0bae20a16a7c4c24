use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// A bounded fan-out pool: at most `limit` submitted tasks run at once, and
/// each task's typed result is kept until the caller drains the pool.
///
/// Results are only handed back after every task has finished, so callers see
/// a stable snapshot rather than a live stream.
pub struct TaskPool<T> {
    semaphore: Arc<Semaphore>,
    tasks: JoinSet<T>,
}

impl<T: Send + 'static> TaskPool<T> {
    pub fn new(limit: usize) -> Self {
        TaskPool {
            semaphore: Arc::new(Semaphore::new(limit)),
            tasks: JoinSet::new(),
        }
    }

    /// Queues a unit of work. The task is spawned immediately but does not
    /// begin until it is admitted by the pool's gate.
    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        let semaphore = self.semaphore.clone();
        self.tasks.spawn(async move {
            // The semaphore is never closed, so acquire can only fail if the
            // pool itself is gone.
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("task pool semaphore closed");
            task.await
        });
    }

    /// Waits for every queued task and returns their results, in completion
    /// order. Panics from tasks are propagated.
    pub async fn join_all(mut self) -> Vec<T> {
        let mut results = Vec::new();

        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                Err(_) => {}
            }
        }

        results
    }
}
