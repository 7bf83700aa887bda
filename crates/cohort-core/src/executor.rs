// Serial task executor
// Runs submitted jobs one at a time, in submission order, on a dedicated tokio task

use std::{
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use futures::{FutureExt, future::BoxFuture};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

type Job = BoxFuture<'static, ()>;

enum Task {
    Run(Job),
    Close(Job, oneshot::Sender<()>),
}

/// Single-consumer FIFO executor.
///
/// Jobs never overlap. A job that panics is logged and does not stop the
/// worker. After [`SerialExecutor::close`] no new job is accepted and queued
/// jobs that have not started are dropped; the close job runs once the job in
/// progress, if any, has finished.
///
/// `close` must not be awaited from inside a job running on the same executor.
#[derive(Clone)]
pub struct SerialExecutor {
    name: Arc<str>,
    sender: mpsc::UnboundedSender<Task>,
    closed: Arc<AtomicBool>,
}

impl std::fmt::Debug for SerialExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialExecutor")
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl SerialExecutor {
    /// Spawn the worker task. Must be called from within a tokio runtime.
    pub fn new(name: impl Into<String>) -> Self {
        let name: Arc<str> = name.into().into();
        let (sender, receiver) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        tokio::spawn(Self::run(name.clone(), receiver, closed.clone()));
        Self {
            name,
            sender,
            closed,
        }
    }

    async fn run(
        name: Arc<str>,
        mut receiver: mpsc::UnboundedReceiver<Task>,
        closed: Arc<AtomicBool>,
    ) {
        let mut dropped = 0usize;
        while let Some(task) = receiver.recv().await {
            match task {
                Task::Run(_) if closed.load(Ordering::Acquire) => dropped += 1,
                Task::Run(job) => Self::run_job(&name, job).await,
                Task::Close(job, done) => {
                    Self::run_job(&name, job).await;
                    let _ = done.send(());
                    break;
                }
            }
        }
        debug!(executor = %name, dropped, "Serial executor stopped");
    }

    async fn run_job(name: &str, job: Job) {
        if AssertUnwindSafe(job).catch_unwind().await.is_err() {
            error!(executor = %name, "Job panicked");
        }
    }

    /// Queue a job. Returns `false` if the executor is closed and the job was
    /// discarded.
    pub fn execute<F>(&self, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_closed() {
            debug!(executor = %self.name, "Discarding job submitted after close");
            return false;
        }
        self.sender.send(Task::Run(job.boxed())).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop accepting jobs, drop the queued ones, then run `cleanup` once the
    /// job in progress has finished. Subsequent calls return immediately
    /// without running their cleanup.
    pub async fn close<F>(&self, cleanup: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let (done, wait) = oneshot::channel();
        match self.sender.send(Task::Close(cleanup.boxed(), done)) {
            Ok(()) => {
                let _ = wait.await;
            }
            Err(mpsc::error::SendError(Task::Close(job, _))) => {
                Self::run_job(&self.name, job).await;
            }
            Err(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn test_jobs_run_in_submission_order() {
        let executor = SerialExecutor::new("test");
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..10u64 {
            let seen = seen.clone();
            executor.execute(async move {
                // later jobs sleep less; serial execution still preserves order
                tokio::time::sleep(Duration::from_millis(10 - i)).await;
                seen.lock().push(i);
            });
        }
        let (done, finished) = oneshot::channel();
        executor.execute(async move {
            let _ = done.send(());
        });

        finished.await.unwrap();
        executor.close(async {}).await;
        assert_eq!(*seen.lock(), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_close_runs_cleanup_last_and_rejects_new_jobs() {
        let executor = SerialExecutor::new("test");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = seen.clone();
        let (done, finished) = oneshot::channel();
        executor.execute(async move {
            s.lock().push("job");
            let _ = done.send(());
        });
        finished.await.unwrap();
        let s = seen.clone();
        executor.close(async move { s.lock().push("cleanup") }).await;

        let s = seen.clone();
        assert!(!executor.execute(async move { s.lock().push("late") }));
        let s = seen.clone();
        executor.close(async move { s.lock().push("second cleanup") }).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*seen.lock(), vec!["job", "cleanup"]);
    }

    #[tokio::test]
    async fn test_close_drops_queued_jobs() {
        let executor = SerialExecutor::new("test");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let (started, running) = oneshot::channel();
        let s = seen.clone();
        executor.execute(async move {
            let _ = started.send(());
            tokio::time::sleep(Duration::from_millis(50)).await;
            s.lock().push("running");
        });
        for _ in 0..3 {
            let s = seen.clone();
            executor.execute(async move { s.lock().push("queued") });
        }

        running.await.unwrap();
        let s = seen.clone();
        executor.close(async move { s.lock().push("cleanup") }).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*seen.lock(), vec!["running", "cleanup"]);
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_stop_worker() {
        let executor = SerialExecutor::new("test");
        let ran = Arc::new(AtomicBool::new(false));

        let fail = true;
        executor.execute(async move {
            if fail {
                panic!("job failure");
            }
        });
        let r = ran.clone();
        let (done, finished) = oneshot::channel();
        executor.execute(async move {
            r.store(true, Ordering::SeqCst);
            let _ = done.send(());
        });
        finished.await.unwrap();
        executor.close(async {}).await;

        assert!(ran.load(Ordering::SeqCst));
    }
}
