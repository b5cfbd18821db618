//! Job runner
//!
//! At-least-once execution of order processing jobs:
//! - bounded queue, one active job per order id
//! - start-rate cap per time window plus a worker concurrency limit
//! - retries with exponential backoff
//! - graceful shutdown that waits for in-flight jobs

use async_trait::async_trait;
use dashmap::DashSet;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use types::ids::OrderId;

use crate::config::RunnerConfig;
use crate::error::EngineError;

// ── Contracts ───────────────────────────────────────────────────────

/// Work a job performs for one order.
///
/// An error for which [`EngineError::is_terminal_failure`] holds ends the
/// job without a retry; any other error is retried with backoff.
#[async_trait]
pub trait OrderProcessor: Send + Sync {
    async fn process(&self, order_id: OrderId) -> Result<(), EngineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Accepted,
    /// A job for this order is already queued or running.
    Duplicate,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Job queue is full")]
    Full,

    #[error("Job queue is shutting down")]
    ShuttingDown,
}

/// Where the engine schedules processing.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, order_id: OrderId) -> Result<Enqueued, QueueError>;
}

// ── Stats ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerStats {
    pub queued: usize,
    pub running: usize,
    pub completed: u64,
    /// Jobs that exhausted their attempts
    pub failed: u64,
    pub retries: u64,
}

#[derive(Default)]
struct Shared {
    active: DashSet<OrderId>,
    accepting: AtomicBool,
    queued: AtomicUsize,
    running: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
}

impl Shared {
    fn stats(&self) -> RunnerStats {
        RunnerStats {
            queued: self.queued.load(Ordering::Relaxed),
            running: self.running.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

// ── Queue Handle ────────────────────────────────────────────────────

/// Producer side of the job queue.
#[derive(Clone)]
pub struct QueueHandle {
    sender: mpsc::Sender<OrderId>,
    shared: Arc<Shared>,
}

/// Consumer side, handed to [`JobRunner::start`].
pub struct JobReceiver {
    receiver: mpsc::Receiver<OrderId>,
    shared: Arc<Shared>,
}

/// Create a bounded job queue.
pub fn job_queue(config: &RunnerConfig) -> (QueueHandle, JobReceiver) {
    let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
    let shared = Arc::new(Shared {
        accepting: AtomicBool::new(true),
        ..Default::default()
    });
    (
        QueueHandle {
            sender,
            shared: shared.clone(),
        },
        JobReceiver { receiver, shared },
    )
}

impl QueueHandle {
    pub fn stats(&self) -> RunnerStats {
        self.shared.stats()
    }
}

#[async_trait]
impl JobQueue for QueueHandle {
    async fn enqueue(&self, order_id: OrderId) -> Result<Enqueued, QueueError> {
        if !self.shared.accepting.load(Ordering::Acquire) {
            return Err(QueueError::ShuttingDown);
        }
        if !self.shared.active.insert(order_id) {
            debug!(order_id = %order_id, "Job already active; not enqueued again");
            return Ok(Enqueued::Duplicate);
        }

        match self.sender.try_send(order_id) {
            Ok(()) => {
                self.shared.queued.fetch_add(1, Ordering::Relaxed);
                Ok(Enqueued::Accepted)
            }
            Err(err) => {
                self.shared.active.remove(&order_id);
                Err(match err {
                    mpsc::error::TrySendError::Full(_) => QueueError::Full,
                    mpsc::error::TrySendError::Closed(_) => QueueError::ShuttingDown,
                })
            }
        }
    }
}

// ── Runner ──────────────────────────────────────────────────────────

pub struct JobRunner {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl JobRunner {
    /// Spawn the dispatcher. Must be called inside a Tokio runtime.
    pub fn start(
        config: RunnerConfig,
        jobs: JobReceiver,
        processor: Arc<dyn OrderProcessor>,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let shared = jobs.shared.clone();
        info!(
            concurrency = config.concurrency,
            rate_limit = config.rate_limit,
            max_attempts = config.max_attempts,
            "Job runner started"
        );
        let dispatcher = tokio::spawn(dispatch(config, jobs, processor, shutdown_rx));
        Self {
            shared,
            shutdown,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    pub fn stats(&self) -> RunnerStats {
        self.shared.stats()
    }

    /// Stop accepting and dispatching, then wait for in-flight jobs.
    /// Jobs still queued are left for recovery on the next start.
    pub async fn shutdown(&self) {
        self.shared.accepting.store(false, Ordering::Release);
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.dispatcher.lock().await.take() {
            if let Err(err) = handle.await {
                error!(error = %err, "Job dispatcher panicked");
            }
        }
        info!(stats = ?self.shared.stats(), "Job runner stopped");
    }
}

async fn dispatch(
    config: RunnerConfig,
    mut jobs: JobReceiver,
    processor: Arc<dyn OrderProcessor>,
    mut shutdown: watch::Receiver<bool>,
) {
    let concurrency = config.concurrency.max(1);
    let workers = Arc::new(Semaphore::new(concurrency));
    let config = Arc::new(config);
    let mut window_start = Instant::now();
    let mut started_in_window: u32 = 0;

    loop {
        let order_id = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            next = jobs.receiver.recv() => match next {
                Some(id) => id,
                None => break,
            },
        };

        // Fixed-window start-rate cap.
        if config.rate_limit > 0 {
            if window_start.elapsed() >= config.rate_window() {
                window_start = Instant::now();
                started_in_window = 0;
            }
            if started_in_window >= config.rate_limit {
                let resume_at = window_start + config.rate_window();
                debug!(order_id = %order_id, "Rate cap reached; delaying job start");
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => {
                        jobs.shared.active.remove(&order_id);
                        break;
                    }
                    _ = tokio::time::sleep_until(resume_at) => {}
                }
                window_start = Instant::now();
                started_in_window = 0;
            }
        }

        let permit = tokio::select! {
            biased;
            _ = shutdown.changed() => {
                jobs.shared.active.remove(&order_id);
                break;
            }
            permit = workers.clone().acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => break,
            },
        };
        started_in_window += 1;

        jobs.shared.queued.fetch_sub(1, Ordering::Relaxed);
        jobs.shared.running.fetch_add(1, Ordering::Relaxed);
        let shared = jobs.shared.clone();
        let processor = processor.clone();
        let config = config.clone();
        tokio::spawn(async move {
            run_job(order_id, processor.as_ref(), &config, &shared).await;
            shared.active.remove(&order_id);
            shared.running.fetch_sub(1, Ordering::Relaxed);
            drop(permit);
        });
    }

    // Every permit back means every in-flight job finished.
    let _ = workers.acquire_many(concurrency as u32).await;
}

async fn run_job(
    order_id: OrderId,
    processor: &dyn OrderProcessor,
    config: &RunnerConfig,
    shared: &Shared,
) {
    let max_attempts = config.max_attempts.max(1);
    for attempt in 1..=max_attempts {
        match processor.process(order_id).await {
            Ok(()) => {
                shared.completed.fetch_add(1, Ordering::Relaxed);
                debug!(order_id = %order_id, attempt, "Job completed");
                return;
            }
            Err(err) if err.is_terminal_failure() => {
                shared.failed.fetch_add(1, Ordering::Relaxed);
                warn!(order_id = %order_id, attempt, error = %err, "Job ended with a failed order");
                return;
            }
            Err(err) if attempt < max_attempts => {
                let delay = config.backoff(attempt);
                warn!(
                    order_id = %order_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Job failed; retrying"
                );
                shared.retries.fetch_add(1, Ordering::Relaxed);
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                shared.failed.fetch_add(1, Ordering::Relaxed);
                error!(order_id = %order_id, attempts = attempt, error = %err, "Job failed permanently");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistence::StoreError;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Records calls; fails the first `failures` attempts per order with a
    /// retryable store error, or with a routing failure when `terminal`.
    #[derive(Default)]
    struct ScriptedProcessor {
        calls: StdMutex<HashMap<OrderId, u32>>,
        starts: StdMutex<Vec<Instant>>,
        failures: u32,
        terminal: bool,
        hold: Option<Arc<Notify>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedProcessor {
        fn calls(&self, id: OrderId) -> u32 {
            self.calls.lock().unwrap().get(&id).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl OrderProcessor for ScriptedProcessor {
        async fn process(&self, order_id: OrderId) -> Result<(), EngineError> {
            let attempt = {
                let mut calls = self.calls.lock().unwrap();
                let n = calls.entry(order_id).or_insert(0);
                *n += 1;
                *n
            };
            self.starts.lock().unwrap().push(Instant::now());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if let Some(hold) = &self.hold {
                hold.notified().await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if attempt <= self.failures && self.terminal {
                Err(EngineError::Routing("venue down".into()))
            } else if attempt <= self.failures {
                Err(EngineError::Store(StoreError::Unavailable("journal busy".into())))
            } else {
                Ok(())
            }
        }
    }

    fn config() -> RunnerConfig {
        RunnerConfig {
            concurrency: 4,
            rate_limit: 0,
            max_attempts: 3,
            backoff_base_ms: 100,
            backoff_max_ms: 1_000,
            queue_capacity: 16,
            ..Default::default()
        }
    }

    async fn settle(queue: &QueueHandle) {
        for _ in 0..1_000 {
            let stats = queue.stats();
            if stats.queued == 0 && stats.running == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("runner did not settle: {:?}", queue.stats());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_with_backoff_then_succeeds() {
        let processor = Arc::new(ScriptedProcessor {
            failures: 2,
            ..Default::default()
        });
        let (queue, jobs) = job_queue(&config());
        let runner = JobRunner::start(config(), jobs, processor.clone());

        let id = OrderId::new();
        assert_eq!(queue.enqueue(id).await.unwrap(), Enqueued::Accepted);
        settle(&queue).await;

        assert_eq!(processor.calls(id), 3);
        let starts = processor.starts.lock().unwrap().clone();
        assert!(starts[1] - starts[0] >= Duration::from_millis(100));
        assert!(starts[2] - starts[1] >= Duration::from_millis(200));

        let stats = runner.stats();
        assert_eq!((stats.completed, stats.failed, stats.retries), (1, 0, 2));
        runner.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let processor = Arc::new(ScriptedProcessor {
            failures: 10,
            ..Default::default()
        });
        let (queue, jobs) = job_queue(&config());
        let runner = JobRunner::start(config(), jobs, processor.clone());

        let id = OrderId::new();
        queue.enqueue(id).await.unwrap();
        settle(&queue).await;

        assert_eq!(processor.calls(id), 3);
        assert_eq!(runner.stats().failed, 1);
        runner.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_order_is_not_retried() {
        let processor = Arc::new(ScriptedProcessor {
            failures: 10,
            terminal: true,
            ..Default::default()
        });
        let (queue, jobs) = job_queue(&config());
        let runner = JobRunner::start(config(), jobs, processor.clone());

        let begin = Instant::now();
        let id = OrderId::new();
        queue.enqueue(id).await.unwrap();
        settle(&queue).await;

        assert_eq!(processor.calls(id), 1);
        let stats = runner.stats();
        assert_eq!((stats.completed, stats.failed, stats.retries), (0, 1, 0));
        // No backoff was slept
        assert!(begin.elapsed() < Duration::from_millis(100));
        runner.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_enqueue_while_active() {
        let hold = Arc::new(Notify::new());
        let processor = Arc::new(ScriptedProcessor {
            hold: Some(hold.clone()),
            ..Default::default()
        });
        let (queue, jobs) = job_queue(&config());
        let runner = JobRunner::start(config(), jobs, processor.clone());

        let id = OrderId::new();
        assert_eq!(queue.enqueue(id).await.unwrap(), Enqueued::Accepted);
        assert_eq!(queue.enqueue(id).await.unwrap(), Enqueued::Duplicate);
        while processor.calls(id) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(queue.enqueue(id).await.unwrap(), Enqueued::Duplicate);

        hold.notify_waiters();
        settle(&queue).await;
        assert_eq!(processor.calls(id), 1);

        // Finished jobs can be scheduled again.
        assert_eq!(queue.enqueue(id).await.unwrap(), Enqueued::Accepted);
        while runner.stats().completed < 2 {
            tokio::time::sleep(Duration::from_millis(1)).await;
            hold.notify_waiters();
        }
        assert_eq!(processor.calls(id), 2);
        runner.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_limit() {
        let hold = Arc::new(Notify::new());
        let processor = Arc::new(ScriptedProcessor {
            hold: Some(hold.clone()),
            ..Default::default()
        });
        let cfg = RunnerConfig {
            concurrency: 2,
            ..config()
        };
        let (queue, jobs) = job_queue(&cfg);
        let runner = JobRunner::start(cfg, jobs, processor.clone());

        for _ in 0..5 {
            queue.enqueue(OrderId::new()).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.stats().running, 2);
        assert_eq!(queue.stats().queued, 3);

        while runner.stats().completed < 5 {
            hold.notify_waiters();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(processor.max_in_flight.load(Ordering::SeqCst), 2);
        runner.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_cap_delays_starts() {
        let processor = Arc::new(ScriptedProcessor::default());
        let cfg = RunnerConfig {
            rate_limit: 2,
            rate_window_ms: 1_000,
            ..config()
        };
        let (queue, jobs) = job_queue(&cfg);
        let runner = JobRunner::start(cfg, jobs, processor.clone());

        let begin = Instant::now();
        for _ in 0..3 {
            queue.enqueue(OrderId::new()).await.unwrap();
        }
        settle(&queue).await;

        let starts = processor.starts.lock().unwrap().clone();
        assert_eq!(starts.len(), 3);
        assert!(starts[1] - begin < Duration::from_millis(1_000));
        assert!(starts[2] - begin >= Duration::from_millis(1_000));
        runner.shutdown().await;
    }

    #[tokio::test]
    async fn test_full_queue_rejects() {
        let cfg = RunnerConfig {
            queue_capacity: 1,
            ..config()
        };
        // No runner: nothing drains the queue.
        let (queue, _jobs) = job_queue(&cfg);
        queue.enqueue(OrderId::new()).await.unwrap();

        let id = OrderId::new();
        assert_eq!(queue.enqueue(id).await, Err(QueueError::Full));
        // A rejected id is not left marked active.
        assert!(!queue.shared.active.contains(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_in_flight_and_refuses_new_jobs() {
        let hold = Arc::new(Notify::new());
        let processor = Arc::new(ScriptedProcessor {
            hold: Some(hold.clone()),
            ..Default::default()
        });
        let (queue, jobs) = job_queue(&config());
        let runner = Arc::new(JobRunner::start(config(), jobs, processor.clone()));

        let id = OrderId::new();
        queue.enqueue(id).await.unwrap();
        while processor.calls(id) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let stopping = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.shutdown().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!stopping.is_finished());
        assert_eq!(
            queue.enqueue(OrderId::new()).await,
            Err(QueueError::ShuttingDown)
        );

        hold.notify_waiters();
        stopping.await.unwrap();
        assert_eq!(runner.stats().completed, 1);
    }
}
