use std::{future::Future, sync::Arc};

use log::debug;
use parking_lot::Mutex;
use tokio::{
    sync::{Semaphore, mpsc},
    task::JoinHandle,
};
use tokio_util::task::TaskTracker;

/// A fixed-size pool: at most `size` submitted futures make progress at a time.
#[derive(Debug)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
}

impl WorkerPool {
    /// Creates a new `WorkerPool`.
    ///
    /// # Arguments
    /// * `size` - The amount of concurrently running tasks, at least one.
    pub fn new(size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size.max(1))),
            tracker: TaskTracker::new(),
        }
    }

    /// Queues `fut`, it starts running once a slot frees up.
    ///
    /// # Returns
    /// A handle resolving to the future's output.
    pub fn submit<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permits = self.permits.clone();

        self.tracker.spawn(async move {
            // The semaphore is never closed, a failed acquire just runs unthrottled.
            let _permit = permits.acquire_owned().await.ok();
            fut.await
        })
    }

    /// Waits for every submitted task to finish.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

type Job = Box<dyn FnOnce() + Send>;

/// Runs jobs one at a time, in submission order.
#[derive(Debug)]
pub struct SerialExecutor {
    tx: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SerialExecutor {
    /// Creates a new `SerialExecutor`, must be called within a tokio runtime.
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job();
            }
        });

        Self {
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Queues `job` behind every previously queued one.
    ///
    /// # Returns
    /// `false` if the executor was drained and the job dropped.
    pub fn execute<F: FnOnce() + Send + 'static>(&self, job: F) -> bool {
        let sent = match self.tx.lock().as_ref() {
            Some(tx) => tx.send(Box::new(job)).is_ok(),
            None => false,
        };

        if !sent {
            debug!("serial executor is drained, dropping job");
        }

        sent
    }

    /// Runs the remaining queue and stops, later jobs are dropped.
    pub async fn drain(&self) {
        drop(self.tx.lock().take());

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pool_runs_everything() {
        let pool = WorkerPool::new(2);
        let done = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let done = done.clone();
                pool.submit(async move {
                    done.fetch_add(1, Ordering::SeqCst);
                    i * 2
                })
            })
            .collect();

        pool.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 8);

        let mut outputs = Vec::new();
        for handle in handles {
            outputs.push(handle.await.unwrap());
        }
        assert_eq!(outputs, (0..8).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_pool_bounds_concurrency() {
        let pool = WorkerPool::new(1);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..4 {
            let (running, peak) = (running.clone(), peak.clone());
            pool.submit(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                running.fetch_sub(1, Ordering::SeqCst);
            });
        }

        pool.drain().await;
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_serial_executor_keeps_order() {
        let executor = SerialExecutor::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..16 {
            let seen = seen.clone();
            assert!(executor.execute(move || seen.lock().push(i)));
        }

        executor.drain().await;
        assert_eq!(*seen.lock(), (0..16).collect::<Vec<_>>());
        assert!(!executor.execute(|| {}));
    }
}
