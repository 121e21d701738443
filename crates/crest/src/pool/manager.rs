//! Fixed-size pool of ticking publish workers.
//!
//! [`WorkerPool::start`] spawns one task per configured worker. Workers are
//! independent and unordered with respect to each other; they share a
//! [`WorkSource`], a [`Publisher`] and the outcome channel to the aggregator,
//! and all of them observe the same [`Shutdown`].

use super::worker::{WorkerContext, worker_loop};
use crate::{Destination, Error, Outcome, PoolConfig, Publisher, Result, Shutdown, WorkSource, WorkerId};
use core::time::Duration;
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinHandle, time::timeout};

/// Handle to a running set of workers.
pub struct WorkerPool {
    workers: Vec<(WorkerId, JoinHandle<()>)>,
    shutdown: Shutdown,
}

impl WorkerPool {
    /// Spawns `config.worker_count()` workers.
    ///
    /// The pool keeps no copy of `outcomes`: once every worker has returned
    /// the aggregator sees its channel close.
    pub fn start<S, P>(
        config: &PoolConfig,
        destination: Destination,
        source: Arc<S>,
        publisher: Arc<P>,
        outcomes: mpsc::Sender<Outcome>,
        shutdown: Shutdown,
    ) -> Self
    where
        S: WorkSource,
        P: Publisher,
    {
        let ctx = WorkerContext {
            source,
            publisher,
            destination: Arc::new(destination),
            tick_interval: config.tick_interval(),
            initial_delay: config.initial_delay(),
        };

        let workers = (0..config.worker_count())
            .map(WorkerId)
            .map(|worker_id| {
                let handle = tokio::spawn(worker_loop(
                    worker_id,
                    ctx.clone(),
                    outcomes.clone(),
                    shutdown.clone(),
                ));
                (worker_id, handle)
            })
            .collect();

        tracing::debug!(
            workers = config.worker_count(),
            tick = ?config.tick_interval(),
            delay = ?config.initial_delay(),
            "Worker pool started"
        );

        Self { workers, shutdown }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Waits for every worker to return, giving each up to `per_worker`.
    ///
    /// Does not fire the stop condition; see [`WorkerPool::shutdown`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Join`] naming the first worker that panicked or did
    /// not stop in time. Every worker is still awaited (or aborted) first.
    pub async fn join(self, per_worker: Duration) -> Result<()> {
        let waits = self.workers.into_iter().map(|(worker_id, handle)| async move {
            let abort = handle.abort_handle();
            match timeout(per_worker, handle).await {
                Ok(Ok(())) => {
                    tracing::trace!("Worker {worker_id} shutdown acknowledged");
                    Ok(())
                }
                Ok(Err(e)) => {
                    tracing::error!("Worker {worker_id} returned error: {e}");
                    Err(Error::Join {
                        context: format!("worker {worker_id}: {e}"),
                    })
                }
                Err(_) => {
                    tracing::warn!("Worker {worker_id} shutdown timed out");
                    abort.abort();
                    Err(Error::Join {
                        context: format!("worker {worker_id} did not stop within {per_worker:?}"),
                    })
                }
            }
        });

        futures::future::join_all(waits)
            .await
            .into_iter()
            .collect::<Result<Vec<()>>>()
            .map(|_| ())
    }

    /// Fires the stop condition and waits for every worker.
    ///
    /// # Errors
    ///
    /// See [`WorkerPool::join`].
    pub async fn shutdown(self, per_worker: Duration) -> Result<()> {
        self.shutdown.trigger();
        self.join(per_worker).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, RandomText, WorkItem};
    use std::{
        collections::HashSet,
        sync::atomic::{AtomicU64, Ordering},
    };

    /// Counts attempts and records which worker produced each item.
    #[derive(Default)]
    struct Recorder {
        attempts: AtomicU64,
        ids: parking_lot::Mutex<Vec<String>>,
        fail_every: u64,
    }

    impl Publisher for Recorder {
        async fn publish(&self, destination: &Destination, item: &WorkItem) -> Result<()> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            self.ids.lock().push(item.id.clone());
            if self.fail_every > 0 && n % self.fail_every == 0 {
                return Err(Error::Publish {
                    destination: destination.to_string(),
                    reason: "injected".to_string(),
                });
            }
            Ok(())
        }
    }

    fn start_pool(
        workers: usize,
        tick: Duration,
        delay: Duration,
        publisher: Arc<Recorder>,
        shutdown: Shutdown,
    ) -> (WorkerPool, mpsc::Receiver<Outcome>) {
        let config = PoolConfig::new(workers, tick)
            .unwrap()
            .with_initial_delay(delay);
        let (tx, rx) = mpsc::channel(1024);
        let pool = WorkerPool::start(
            &config,
            Destination::new("pubsub", "topic"),
            Arc::new(RandomText::new(16)),
            publisher,
            tx,
            shutdown,
        );
        (pool, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Outcome>) -> Vec<Outcome> {
        let mut outcomes = Vec::new();
        while let Ok(outcome) = rx.try_recv() {
            outcomes.push(outcome);
        }
        outcomes
    }

    #[tokio::test(start_paused = true)]
    async fn every_attempt_yields_an_outcome() {
        let publisher = Arc::new(Recorder {
            fail_every: 3,
            ..Recorder::default()
        });
        let shutdown = Shutdown::new();
        let (pool, mut rx) = start_pool(
            4,
            Duration::from_millis(10),
            Duration::ZERO,
            Arc::clone(&publisher),
            shutdown.clone(),
        );
        assert_eq!(pool.len(), 4);

        tokio::time::sleep(Duration::from_millis(205)).await;
        pool.shutdown(Duration::from_secs(1)).await.unwrap();

        let outcomes = drain(&mut rx);
        let attempts = publisher.attempts.load(Ordering::SeqCst);
        let failures = outcomes.iter().filter(|o| !o.succeeded).count() as u64;

        assert!(attempts >= 4 * 20, "only {attempts} attempts");
        assert!(attempts - outcomes.len() as u64 <= 4);
        assert_eq!(failures, outcomes.len() as u64 / 3);
        assert!(rx.recv().await.is_none(), "workers kept a sender alive");
    }

    #[tokio::test(start_paused = true)]
    async fn item_ids_carry_worker_index() {
        let publisher = Arc::new(Recorder::default());
        let (pool, _rx) = start_pool(
            3,
            Duration::from_millis(10),
            Duration::ZERO,
            Arc::clone(&publisher),
            Shutdown::new(),
        );

        tokio::time::sleep(Duration::from_millis(35)).await;
        pool.shutdown(Duration::from_secs(1)).await.unwrap();

        let prefixes: HashSet<String> = publisher
            .ids
            .lock()
            .iter()
            .filter_map(|id| id.split('-').next().map(str::to_string))
            .collect();
        let expected: HashSet<String> = ["p0", "p1", "p2"].iter().map(|s| s.to_string()).collect();
        assert_eq!(prefixes, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn initial_delay_postpones_first_publish() {
        let publisher = Arc::new(Recorder::default());
        let (pool, _rx) = start_pool(
            2,
            Duration::from_millis(10),
            Duration::from_millis(100),
            Arc::clone(&publisher),
            Shutdown::new(),
        );

        tokio::time::sleep(Duration::from_millis(105)).await;
        assert_eq!(publisher.attempts.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(publisher.attempts.load(Ordering::SeqCst), 2);

        pool.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stops_during_initial_delay() {
        let publisher = Arc::new(Recorder::default());
        let shutdown = Shutdown::new();
        let (pool, _rx) = start_pool(
            2,
            Duration::from_millis(10),
            Duration::from_secs(3600),
            Arc::clone(&publisher),
            shutdown.clone(),
        );

        shutdown.trigger();
        pool.join(Duration::from_millis(1)).await.unwrap();
        assert_eq!(publisher.attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_within_one_tick() {
        let publisher = Arc::new(Recorder::default());
        let shutdown = Shutdown::new();
        let (pool, _rx) = start_pool(
            8,
            Duration::from_secs(1),
            Duration::ZERO,
            Arc::clone(&publisher),
            shutdown.clone(),
        );

        tokio::time::sleep(Duration::from_millis(2500)).await;
        shutdown.trigger();

        // Each worker gets strictly less than a tick to notice.
        pool.join(Duration::from_millis(999)).await.unwrap();
        assert_eq!(publisher.attempts.load(Ordering::SeqCst), 16);
    }

    /// Fires the stop condition from inside its first publish and counts
    /// the publishes started after that.
    struct StopOnFirst {
        shutdown: Shutdown,
        calls: AtomicU64,
        after_stop: AtomicU64,
    }

    impl Publisher for StopOnFirst {
        async fn publish(&self, _: &Destination, _: &WorkItem) -> Result<()> {
            if self.shutdown.is_triggered() {
                self.after_stop.fetch_add(1, Ordering::SeqCst);
            }
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                self.shutdown.trigger();
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn no_publish_starts_after_stop_on_a_shared_tick() {
        for _ in 0..50 {
            let shutdown = Shutdown::new();
            let publisher = Arc::new(StopOnFirst {
                shutdown: shutdown.clone(),
                calls: AtomicU64::new(0),
                after_stop: AtomicU64::new(0),
            });
            let config = PoolConfig::new(4, Duration::from_millis(10)).unwrap();
            let (tx, _rx) = mpsc::channel(1024);
            let pool = WorkerPool::start(
                &config,
                Destination::new("pubsub", "topic"),
                Arc::new(RandomText::new(8)),
                Arc::clone(&publisher),
                tx,
                shutdown,
            );

            pool.join(Duration::from_millis(20)).await.unwrap();
            assert_eq!(publisher.calls.load(Ordering::SeqCst), 1);
            assert_eq!(publisher.after_stop.load(Ordering::SeqCst), 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn full_outcome_channel_does_not_block_shutdown() {
        let publisher = Arc::new(Recorder::default());
        let shutdown = Shutdown::new();
        let config = PoolConfig::new(2, Duration::from_millis(1)).unwrap();
        let (tx, _rx) = mpsc::channel(1);
        let pool = WorkerPool::start(
            &config,
            Destination::new("pubsub", "topic"),
            Arc::new(RandomText::new(8)),
            publisher,
            tx,
            shutdown.clone(),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.trigger();
        pool.join(Duration::from_millis(1)).await.unwrap();
    }
}
