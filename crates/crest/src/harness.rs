//! Wires the worker pool to the aggregator under a single stop condition.

use crate::{
    Aggregator, Error, HarnessConfig, MetricsSnapshot, Publisher, Result, Shutdown, WorkSource,
    WorkerPool,
};
use core::time::Duration;
use std::sync::Arc;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::timeout,
};

/// A running publish harness.
///
/// Owns the worker tasks and the aggregator task. Both stop when the
/// [`Shutdown`] given to [`Harness::spawn`] fires, whether that comes from a
/// signal listener, a test, or [`Harness::stop`].
pub struct Harness {
    pool: WorkerPool,
    aggregator: JoinHandle<MetricsSnapshot>,
    snapshots: watch::Receiver<MetricsSnapshot>,
    shutdown: Shutdown,
    shutdown_timeout: Duration,
}

impl Harness {
    /// Spawns the aggregator and then the workers.
    ///
    /// Configuration has already been validated by the time a
    /// [`HarnessConfig`] exists, so spawning cannot fail.
    pub fn spawn<S, P>(
        config: HarnessConfig,
        source: Arc<S>,
        publisher: Arc<P>,
        shutdown: Shutdown,
    ) -> Self
    where
        S: WorkSource,
        P: Publisher,
    {
        let (outcome_tx, outcome_rx) = mpsc::channel(config.outcome_buffer());
        let (aggregator, snapshots) = Aggregator::new(config.report_interval());
        let aggregator = tokio::spawn(aggregator.run(outcome_rx, shutdown.clone()));

        let pool = WorkerPool::start(
            config.pool(),
            config.destination().clone(),
            source,
            publisher,
            outcome_tx,
            shutdown.clone(),
        );

        tracing::info!(
            workers = pool.len(),
            destination = %config.destination(),
            "Harness started"
        );

        Self {
            pool,
            aggregator,
            snapshots,
            shutdown,
            shutdown_timeout: config.shutdown_timeout(),
        }
    }

    /// Receiver for the snapshots published on every report tick.
    pub fn snapshots(&self) -> watch::Receiver<MetricsSnapshot> {
        self.snapshots.clone()
    }

    pub const fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Fires the stop condition, then behaves like [`Harness::wait`].
    ///
    /// # Errors
    ///
    /// See [`Harness::wait`].
    pub async fn stop(self) -> Result<MetricsSnapshot> {
        self.shutdown.trigger();
        self.wait().await
    }

    /// Waits for the stop condition, then for every task, and returns the
    /// final snapshot.
    ///
    /// Workers that do not stop within the shutdown timeout are aborted and
    /// logged; they do not prevent the final snapshot from being returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Join`] if the aggregator panicked or did not stop
    /// within the shutdown timeout.
    pub async fn wait(self) -> Result<MetricsSnapshot> {
        self.shutdown.triggered().await;
        tracing::debug!("Stop condition observed, waiting for tasks");

        if let Err(e) = self.pool.join(self.shutdown_timeout).await {
            tracing::warn!("Worker pool did not stop cleanly: {e}");
        }

        match timeout(self.shutdown_timeout, self.aggregator).await {
            Ok(Ok(snapshot)) => {
                tracing::info!(
                    published = snapshot.success_count,
                    errors = snapshot.error_count,
                    "Harness stopped: {snapshot}"
                );
                Ok(snapshot)
            }
            Ok(Err(e)) => Err(Error::Join {
                context: format!("aggregator: {e}"),
            }),
            Err(_) => Err(Error::Join {
                context: format!(
                    "aggregator did not stop within {:?}",
                    self.shutdown_timeout
                ),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Destination, PoolConfig, RandomText, WorkItem};
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct Counting {
        attempts: AtomicU64,
        fail: bool,
    }

    impl Publisher for Counting {
        async fn publish(&self, destination: &Destination, _item: &WorkItem) -> Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::Publish {
                    destination: destination.to_string(),
                    reason: "unavailable".to_string(),
                });
            }
            Ok(())
        }
    }

    fn config(workers: usize, tick: Duration, report: Duration) -> HarnessConfig {
        let pool = PoolConfig::new(workers, tick).unwrap();
        HarnessConfig::new(pool, Destination::new("pubsub", "topic"))
            .with_report_interval(report)
            .unwrap()
    }

    fn spawn(config: HarnessConfig, publisher: Arc<Counting>) -> Harness {
        Harness::spawn(
            config,
            Arc::new(RandomText::new(32)),
            publisher,
            Shutdown::new(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn three_workers_for_a_hundred_millis() {
        let publisher = Arc::new(Counting::default());
        let harness = spawn(
            config(3, Duration::from_millis(10), Duration::from_secs(3)),
            Arc::clone(&publisher),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        let snapshot = harness.stop().await.unwrap();

        assert!(
            (27..=30).contains(&snapshot.success_count),
            "got {} successes",
            snapshot.success_count
        );
        assert_eq!(snapshot.error_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_publishes_are_counted_as_errors() {
        let publisher = Arc::new(Counting {
            fail: true,
            ..Counting::default()
        });
        let harness = spawn(
            config(2, Duration::from_millis(10), Duration::from_secs(3)),
            Arc::clone(&publisher),
        );

        tokio::time::sleep(Duration::from_millis(55)).await;
        let snapshot = harness.stop().await.unwrap();

        assert_eq!(snapshot.success_count, 0);
        assert_eq!(snapshot.error_count, 10);
        assert_eq!(snapshot.avg_rate(), 0.0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn counts_match_attempts_within_one_per_worker() {
        let workers = 8;
        let publisher = Arc::new(Counting::default());
        let harness = spawn(
            config(workers, Duration::from_millis(1), Duration::from_millis(20)),
            Arc::clone(&publisher),
        );

        tokio::time::sleep(Duration::from_millis(150)).await;
        let snapshot = harness.stop().await.unwrap();
        let attempts = publisher.attempts.load(Ordering::SeqCst);

        assert!(snapshot.total() <= attempts);
        assert!(
            attempts - snapshot.total() <= workers as u64,
            "{attempts} attempts but {} outcomes",
            snapshot.total()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn snapshots_follow_report_ticks() {
        let publisher = Arc::new(Counting::default());
        let harness = spawn(
            config(1, Duration::from_millis(10), Duration::from_millis(50)),
            Arc::clone(&publisher),
        );
        let mut snapshots = harness.snapshots();

        snapshots.changed().await.unwrap();
        let first = *snapshots.borrow_and_update();
        snapshots.changed().await.unwrap();
        let second = *snapshots.borrow_and_update();

        assert!(second.success_count >= first.success_count);
        assert!(second.elapsed > first.elapsed);
        assert!(first.success_count >= 4);

        harness.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stops_within_one_tick_of_external_trigger() {
        let publisher = Arc::new(Counting::default());
        let shutdown = Shutdown::new();
        let harness = Harness::spawn(
            config(4, Duration::from_secs(1), Duration::from_secs(3)),
            Arc::new(RandomText::default()),
            Arc::clone(&publisher),
            shutdown.clone(),
        );

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            trigger.trigger();
        });

        let snapshot = timeout(Duration::from_millis(2500), harness.wait())
            .await
            .expect("harness did not stop within one tick")
            .unwrap();
        assert_eq!(snapshot.success_count, 4);
    }
}
