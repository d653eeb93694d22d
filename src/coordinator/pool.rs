//! Bounded worker pool for replica calls
//!
//! A fixed number of tokio tasks drain a bounded queue. When the queue is full
//! new work is rejected immediately; there is no other backpressure.

use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::common::{Error, Result, METRICS};

pub type Job = BoxFuture<'static, ()>;

pub struct WorkerPool {
    sender: mpsc::Sender<Job>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `workers` tasks on the current tokio runtime.
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>(queue_capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let handles = (0..workers.max(1))
            .map(|_| {
                let receiver = receiver.clone();
                tokio::spawn(async move {
                    loop {
                        let job = receiver.lock().await.recv().await;
                        match job {
                            Some(job) => job.await,
                            None => break,
                        }
                    }
                })
            })
            .collect();

        Self {
            sender,
            workers: Mutex::new(handles),
        }
    }

    /// Queue a job, or fail with [`Error::Overloaded`] if the backlog is full.
    pub fn try_submit(&self, job: Job) -> Result<()> {
        let result = match self.sender.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                METRICS.rejected_tasks.inc();
                Err(Error::Overloaded)
            }
            Err(TrySendError::Closed(_)) => {
                Err(Error::Internal("worker pool is shut down".into()))
            }
        };
        METRICS.queued_tasks.set(self.queued() as u64);
        result
    }

    /// Jobs waiting for a worker
    pub fn queued(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Stop all workers. Queued and running jobs are dropped.
    pub fn shutdown(&self) {
        if let Ok(mut workers) = self.workers.lock() {
            for handle in workers.drain(..) {
                handle.abort();
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_runs_jobs() {
        let pool = WorkerPool::new(2, 8);
        let done = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel();
        let tx = Arc::new(Mutex::new(Some(tx)));

        for _ in 0..4 {
            let done = done.clone();
            let tx = tx.clone();
            pool.try_submit(Box::pin(async move {
                if done.fetch_add(1, Ordering::SeqCst) + 1 == 4 {
                    if let Some(tx) = tx.lock().unwrap().take() {
                        let _ = tx.send(());
                    }
                }
            }))
            .unwrap();
        }

        tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_rejects_when_saturated() {
        let pool = WorkerPool::new(1, 1);
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let (started_tx, started_rx) = oneshot::channel::<()>();

        // Occupy the only worker until released.
        pool.try_submit(Box::pin(async move {
            let _ = started_tx.send(());
            let _ = release_rx.await;
        }))
        .unwrap();
        started_rx.await.unwrap();

        // Fill the single queue slot.
        pool.try_submit(Box::pin(async {})).unwrap();
        assert_eq!(pool.queued(), 1);

        assert!(matches!(
            pool.try_submit(Box::pin(async {})),
            Err(Error::Overloaded)
        ));

        let _ = release_tx.send(());
    }

    #[tokio::test]
    async fn test_shutdown_stops_workers() {
        let pool = WorkerPool::new(2, 4);
        pool.shutdown();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let ran = Arc::new(AtomicUsize::new(0));
        let flag = ran.clone();
        // Either rejected as closed or queued with nobody to run it.
        let _ = pool.try_submit(Box::pin(async move {
            flag.fetch_add(1, Ordering::SeqCst);
        }));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
