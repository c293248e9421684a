//! The serial waiter executor: a single background task that runs
//! reservation waiter jobs one at a time, strictly in submission order.
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Runs submitted jobs one at a time, in the order they were submitted.
///
/// This is what turns two fair-but-independent semaphores into a fair
/// *pair*: without a single worker, a later request could win its UDP
/// acquisition while an earlier request is still waiting on TCP, jumping
/// the earlier request in submission order. A single consumer awaiting
/// each job to completion before pulling the next rules that out.
///
/// Modeled the same way the reference codebase drains its key-expiration
/// background task: one task, spawned once, looping over a channel for
/// its lifetime.
#[derive(Debug)]
pub(crate) struct WaiterExecutor {
    tx: mpsc::UnboundedSender<Job>,
    pending: Arc<AtomicUsize>,
}

impl WaiterExecutor {
    pub(crate) fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let pending = Arc::new(AtomicUsize::new(0));

        let worker_pending = pending.clone();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                worker_pending.fetch_sub(1, Ordering::SeqCst);
                job.await;
            }
            debug!("waiter executor worker exiting: all senders dropped");
        });

        Self { tx, pending }
    }

    /// Enqueues `job` to run after every job already submitted.
    pub(crate) fn submit(&self, job: impl Future<Output = ()> + Send + 'static) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        // The worker task only exits once every `WaiterExecutor` (and thus
        // every sender clone) has been dropped, so send cannot fail while
        // `self` is alive.
        let _ = self.tx.send(Box::pin(job));
    }

    /// Number of jobs submitted but not yet picked up by the worker.
    pub(crate) fn pending_requests(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn jobs_run_in_submission_order() {
        let executor = WaiterExecutor::spawn();
        let order = Arc::new(Mutex::new(Vec::new()));

        let (release_tx, release_rx) = oneshot::channel::<()>();
        let release_rx = Arc::new(Mutex::new(Some(release_rx)));

        let o1 = order.clone();
        let rx1 = release_rx.clone();
        executor.submit(async move {
            let rx = rx1.lock().unwrap().take().unwrap();
            rx.await.ok();
            o1.lock().unwrap().push(1);
        });

        let o2 = order.clone();
        executor.submit(async move {
            o2.lock().unwrap().push(2);
        });

        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        // Job 2 must not run before job 1 even though job 1 is blocked.
        assert!(order.lock().unwrap().is_empty());

        release_tx.send(()).unwrap();
        // Give the worker a chance to run both jobs to completion.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn pending_requests_tracks_queue_depth() {
        let executor = WaiterExecutor::spawn();
        assert_eq!(executor.pending_requests(), 0);

        let (tx, rx) = oneshot::channel::<()>();
        let rx = Arc::new(Mutex::new(Some(rx)));
        executor.submit(async move {
            rx.lock().unwrap().take().unwrap().await.ok();
        });
        executor.submit(async {});

        assert_eq!(executor.pending_requests(), 2);
        tokio::task::yield_now().await;
        // First job dequeued (and now blocked); second still queued.
        assert_eq!(executor.pending_requests(), 1);

        tx.send(()).unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(executor.pending_requests(), 0);
    }
}
