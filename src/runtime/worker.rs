use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::runtime::{Builder, Runtime};
use tokio::task::JoinHandle;

use crate::runtime::errors::{RuntimeError, RuntimeResult};

/// Threads running management work off the caller's thread.
pub(crate) struct WorkerPool {
    runtime: Mutex<Option<Runtime>>,
}

impl WorkerPool {
    pub(crate) fn new(workers: usize) -> RuntimeResult<Self> {
        let runtime = Builder::new_current_thread()
            .max_blocking_threads(workers.max(1))
            .thread_name("component-runtime-worker")
            .enable_all()
            .build()
            .map_err(|err| RuntimeError::WorkerPool {
                reason: err.to_string(),
            })?;
        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
        })
    }

    /// Runs `job` on a worker; the task resolves to the number of
    /// components it touched.
    pub(crate) fn submit<F>(&self, job: F) -> ManagementTask
    where
        F: FnOnce() -> usize + Send + 'static,
    {
        match self.runtime.lock().as_ref() {
            Some(runtime) => ManagementTask::running(runtime.spawn_blocking(job)),
            None => ManagementTask::failed(RuntimeError::Stopped),
        }
    }

    pub(crate) fn shutdown(&self) {
        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_background();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Completion handle of an asynchronous enable or disable request.
///
/// Await it, or call [`ManagementTask::wait`] from synchronous code.
#[must_use = "a management task does nothing observable unless awaited or waited on"]
pub struct ManagementTask {
    state: TaskState,
}

enum TaskState {
    Done(Option<RuntimeResult<usize>>),
    Running(JoinHandle<usize>),
}

impl ManagementTask {
    pub(crate) fn ready(count: usize) -> Self {
        Self {
            state: TaskState::Done(Some(Ok(count))),
        }
    }

    pub(crate) fn failed(err: RuntimeError) -> Self {
        Self {
            state: TaskState::Done(Some(Err(err))),
        }
    }

    fn running(handle: JoinHandle<usize>) -> Self {
        Self {
            state: TaskState::Running(handle),
        }
    }

    /// Blocks the current thread until the task finishes. Must not be
    /// called from inside an async task.
    pub fn wait(self) -> RuntimeResult<usize> {
        futures::executor::block_on(self)
    }
}

impl Future for ManagementTask {
    type Output = RuntimeResult<usize>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.state {
            TaskState::Done(result) => Poll::Ready(result.take().unwrap_or_else(|| {
                Err(RuntimeError::TaskFailed {
                    reason: "polled after completion".to_string(),
                })
            })),
            TaskState::Running(handle) => Pin::new(handle).poll(cx).map(|joined| {
                joined.map_err(|err| RuntimeError::TaskFailed {
                    reason: err.to_string(),
                })
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submitted_job_reports_its_count() {
        let pool = WorkerPool::new(1).unwrap();
        assert_eq!(pool.submit(|| 3).wait(), Ok(3));
    }

    #[test]
    fn panicking_job_fails_the_task() {
        let pool = WorkerPool::new(1).unwrap();
        let result = pool.submit(|| panic!("job exploded")).wait();
        assert!(matches!(result, Err(RuntimeError::TaskFailed { .. })));
    }

    #[test]
    fn shut_down_pool_refuses_work() {
        let pool = WorkerPool::new(1).unwrap();
        pool.shutdown();
        assert_eq!(pool.submit(|| 1).wait(), Err(RuntimeError::Stopped));
    }

    #[tokio::test]
    async fn tasks_can_be_awaited() {
        let pool = WorkerPool::new(2).unwrap();
        let first = pool.submit(|| 1);
        let second = pool.submit(|| 2);
        assert_eq!(first.await.unwrap() + second.await.unwrap(), 3);
        pool.shutdown();
    }
}
