//! Fixed-size worker pool pulling jobs from one shared queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;

/// Simultaneous fetches allowed by default.
pub const DEFAULT_WORKERS: usize = 3;

/// Runs `handler` on every submitted job across `worker_count` threads and
/// delivers outputs through a channel drained on the caller's thread.
pub(crate) struct WorkerPool<J, R> {
    job_sender: Option<crossbeam_channel::Sender<J>>,
    result_receiver: crossbeam_channel::Receiver<R>,
    worker_handles: Vec<JoinHandle<()>>,
    in_flight: Arc<AtomicUsize>,
}

impl<J, R> WorkerPool<J, R>
where
    J: Send + 'static,
    R: Send + 'static,
{
    pub(crate) fn new<F>(worker_count: usize, handler: F) -> Self
    where
        F: Fn(J) -> R + Send + Sync + 'static,
    {
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<J>();
        let (result_tx, result_rx) = crossbeam_channel::unbounded();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(handler);

        let handles = (0..worker_count.max(1))
            .map(|i| {
                let rx = job_rx.clone();
                let tx = result_tx.clone();
                let handler = Arc::clone(&handler);
                let flight = Arc::clone(&in_flight);
                std::thread::Builder::new()
                    .name(format!("keel-asset-{i}"))
                    .spawn(move || {
                        while let Ok(job) = rx.recv() {
                            let result = handler(job);
                            flight.fetch_sub(1, Ordering::Relaxed);
                            let _ = tx.send(result);
                        }
                    })
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(e) => {
                    log::error!("failed to spawn asset worker: {e}");
                    None
                }
            })
            .collect();

        Self {
            job_sender: Some(job_tx),
            result_receiver: result_rx,
            worker_handles: handles,
            in_flight,
        }
    }
}

impl<J, R> WorkerPool<J, R> {
    /// Queue a job. Returns `false` once the pool has been shut down.
    pub(crate) fn submit(&self, job: J) -> bool {
        let Some(sender) = &self.job_sender else {
            return false;
        };
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        if sender.send(job).is_err() {
            self.in_flight.fetch_sub(1, Ordering::Relaxed);
            return false;
        }
        true
    }

    /// Collect every finished result without blocking.
    pub(crate) fn drain_results(&self) -> Vec<R> {
        self.result_receiver.try_iter().collect()
    }

    /// Jobs queued or running.
    pub(crate) fn in_flight_count(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub(crate) fn worker_count(&self) -> usize {
        self.worker_handles.len()
    }

    /// Close the queue and join workers. Queued jobs still run to completion.
    pub(crate) fn shutdown(&mut self) {
        self.job_sender.take();
        for handle in self.worker_handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl<J, R> Drop for WorkerPool<J, R> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn wait_for<J: Send + 'static, R: Send + 'static>(pool: &WorkerPool<J, R>, n: usize) -> Vec<R> {
        let mut out = Vec::new();
        let start = Instant::now();
        while out.len() < n {
            out.extend(pool.drain_results());
            assert!(start.elapsed() < Duration::from_secs(5), "timed out");
            std::thread::sleep(Duration::from_millis(1));
        }
        out
    }

    #[test]
    fn test_all_jobs_complete() {
        let pool = WorkerPool::new(DEFAULT_WORKERS, |x: u32| x * 2);
        for i in 0..10 {
            assert!(pool.submit(i));
        }
        let mut results = wait_for(&pool, 10);
        results.sort();
        assert_eq!(results, (0..10).map(|i| i * 2).collect::<Vec<_>>());
        assert_eq!(pool.in_flight_count(), 0);
    }

    #[test]
    fn test_concurrency_bounded_by_worker_count() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (r, p) = (Arc::clone(&running), Arc::clone(&peak));
        let pool = WorkerPool::new(3, move |_: ()| {
            let now = r.fetch_add(1, Ordering::SeqCst) + 1;
            p.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(10));
            r.fetch_sub(1, Ordering::SeqCst);
        });
        assert_eq!(pool.worker_count(), 3);
        for _ in 0..12 {
            pool.submit(());
        }
        wait_for(&pool, 12);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let mut pool = WorkerPool::new(1, |x: u8| x);
        pool.shutdown();
        assert!(!pool.submit(1));
    }
}
