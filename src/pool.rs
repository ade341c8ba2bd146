//! Bounded worker pool shared by every scanning operation
//!
//! Exactly `concurrency` tokio tasks pull jobs from one shared queue. Each job
//! runs under its own deadline; an elapsed deadline turns into the job's
//! timeout result instead of holding a worker. Cancellation stops dispatch
//! only: in-flight jobs finish or time out and everything already collected
//! is returned.

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// A unit of work executed by exactly one worker
#[async_trait]
pub trait Job: Send + Sync + 'static {
    type Output: Send + 'static;

    /// Run the job to completion
    async fn execute(&self) -> Self::Output;

    /// Result reported when the per-job deadline elapses
    fn timed_out(&self) -> Self::Output;
}

/// Everything a pool run produced
#[derive(Debug)]
pub struct PoolReport<T> {
    /// One entry per started job, in completion order
    pub results: Vec<T>,
    pub submitted: usize,
    /// Jobs still queued when cancellation stopped dispatch
    pub not_started: usize,
    pub cancelled: bool,
}

impl<T> PoolReport<T> {
    pub fn started(&self) -> usize {
        self.submitted - self.not_started
    }
}

/// Fixed-size pool of async workers
#[derive(Debug, Clone)]
pub struct WorkerPool {
    concurrency: usize,
    job_timeout: Duration,
}

type Queue<J> = Arc<Mutex<VecDeque<J>>>;

impl WorkerPool {
    pub fn new(concurrency: usize, job_timeout: Duration) -> Self {
        Self {
            concurrency: concurrency.max(1),
            job_timeout,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn job_timeout(&self) -> Duration {
        self.job_timeout
    }

    /// Execute `jobs`, calling `on_result` as each one resolves.
    ///
    /// Results arrive in completion order; callers that need a stable order
    /// sort the returned vector.
    pub async fn run<J, F>(&self, jobs: Vec<J>, cancel: &CancellationToken, mut on_result: F) -> PoolReport<J::Output>
    where
        J: Job,
        F: FnMut(&J::Output),
    {
        let submitted = jobs.len();
        let queue: Queue<J> = Arc::new(Mutex::new(VecDeque::from(jobs)));
        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<J::Output>();

        log::debug!(
            "Starting pool: {} jobs, {} workers, {:?} per job",
            submitted,
            self.concurrency,
            self.job_timeout
        );

        let mut handles = Vec::with_capacity(self.concurrency);
        for worker_id in 0..self.concurrency {
            let queue = queue.clone();
            let result_tx = result_tx.clone();
            let cancel = cancel.clone();
            let job_timeout = self.job_timeout;

            handles.push(tokio::spawn(async move {
                worker_loop(worker_id, queue, result_tx, cancel, job_timeout).await;
            }));
        }

        // Workers hold the remaining senders; the channel closes when the last one exits.
        drop(result_tx);

        let mut results = Vec::with_capacity(submitted);
        while let Some(output) = result_rx.recv().await {
            on_result(&output);
            results.push(output);
        }

        for joined in join_all(handles).await {
            if let Err(e) = joined {
                log::error!("Pool worker failed: {}", e);
            }
        }

        let not_started = lock_queue(&queue).len();
        let cancelled = cancel.is_cancelled();
        if cancelled {
            log::info!(
                "Pool cancelled: {} results collected, {} jobs never started",
                results.len(),
                not_started
            );
        }

        PoolReport {
            results,
            submitted,
            not_started,
            cancelled,
        }
    }
}

async fn worker_loop<J: Job>(
    worker_id: usize,
    queue: Queue<J>,
    result_tx: mpsc::UnboundedSender<J::Output>,
    cancel: CancellationToken,
    job_timeout: Duration,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }

        // Guard is released before the job runs.
        let next = lock_queue(&queue).pop_front();
        let job = match next {
            Some(job) => job,
            None => break,
        };

        let output = match timeout(job_timeout, job.execute()).await {
            Ok(output) => output,
            Err(_) => job.timed_out(),
        };

        if result_tx.send(output).is_err() {
            break;
        }
    }

    log::trace!("Worker {} exiting", worker_id);
}

fn lock_queue<J>(queue: &Queue<J>) -> std::sync::MutexGuard<'_, VecDeque<J>> {
    queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SleepJob {
        id: usize,
        delay: Duration,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[derive(Debug, PartialEq)]
    enum Outcome {
        Done(usize),
        TimedOut(usize),
    }

    #[async_trait]
    impl Job for SleepJob {
        type Output = Outcome;

        async fn execute(&self) -> Outcome {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Outcome::Done(self.id)
        }

        fn timed_out(&self) -> Outcome {
            self.active.fetch_sub(1, Ordering::SeqCst);
            Outcome::TimedOut(self.id)
        }
    }

    fn jobs(count: usize, delay: Duration) -> (Vec<SleepJob>, Arc<AtomicUsize>) {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let jobs = (0..count)
            .map(|id| SleepJob {
                id,
                delay,
                active: active.clone(),
                peak: peak.clone(),
            })
            .collect();
        (jobs, peak)
    }

    #[tokio::test]
    async fn test_one_result_per_job() {
        let pool = WorkerPool::new(4, Duration::from_secs(1));
        let (jobs, peak) = jobs(25, Duration::from_millis(5));
        let mut seen = 0;

        let report = pool.run(jobs, &CancellationToken::new(), |_| seen += 1).await;

        assert_eq!(report.results.len(), 25);
        assert_eq!(report.submitted, 25);
        assert_eq!(report.not_started, 0);
        assert_eq!(seen, 25);
        assert!(!report.cancelled);
        assert!(peak.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded_and_used() {
        let pool = WorkerPool::new(3, Duration::from_secs(2));
        let (jobs, peak) = jobs(12, Duration::from_millis(40));

        pool.run(jobs, &CancellationToken::new(), |_| {}).await;

        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_slow_job_times_out_without_blocking_others() {
        let pool = WorkerPool::new(2, Duration::from_millis(50));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let jobs = vec![
            SleepJob { id: 0, delay: Duration::from_secs(10), active: active.clone(), peak: peak.clone() },
            SleepJob { id: 1, delay: Duration::from_millis(1), active: active.clone(), peak: peak.clone() },
            SleepJob { id: 2, delay: Duration::from_millis(1), active, peak },
        ];

        let started = std::time::Instant::now();
        let report = pool.run(jobs, &CancellationToken::new(), |_| {}).await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(report.results.len(), 3);
        assert!(report.results.contains(&Outcome::TimedOut(0)));
        assert!(report.results.contains(&Outcome::Done(1)));
        assert!(report.results.contains(&Outcome::Done(2)));
    }

    #[tokio::test]
    async fn test_cancellation_keeps_partial_results() {
        let pool = WorkerPool::new(2, Duration::from_secs(1));
        let (jobs, _) = jobs(40, Duration::from_millis(10));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let mut seen = 0;

        let report = pool
            .run(jobs, &cancel, |_| {
                seen += 1;
                if seen == 4 {
                    trigger.cancel();
                }
            })
            .await;

        assert!(report.cancelled);
        assert!(report.results.len() >= 4);
        assert!(report.not_started > 0);
        assert_eq!(report.results.len() + report.not_started, 40);
        assert_eq!(report.started(), report.results.len());
    }

    #[test]
    fn test_cancelled_before_start_runs_nothing() {
        let pool = WorkerPool::new(5, Duration::from_secs(1));
        let (jobs, _) = jobs(10, Duration::from_millis(1));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = tokio_test::block_on(pool.run(jobs, &cancel, |_| {}));

        assert!(report.results.is_empty());
        assert_eq!(report.not_started, 10);
    }

    #[tokio::test]
    async fn test_empty_job_list() {
        let pool = WorkerPool::new(15, Duration::from_secs(1));
        let report = pool.run(Vec::<SleepJob>::new(), &CancellationToken::new(), |_| {}).await;
        assert!(report.results.is_empty());
        assert_eq!(report.submitted, 0);
    }
}
