//! Throughput accounting for the worker pool.
//!
//! The [`Aggregator`] is the only owner of the success/error counters. Workers
//! never touch them: they send an [`Outcome`] per publish attempt over a
//! bounded channel and the aggregator folds it in. Readers get copies through
//! a [`watch`] channel, refreshed on every report tick, so there is one writer
//! and any number of readers without a lock.

use crate::{Outcome, Shutdown};
use core::{fmt, time::Duration};
use tokio::{
    sync::{mpsc, watch},
    time::{self, Instant, MissedTickBehavior},
};

/// Running counters at a point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    pub success_count: u64,
    pub error_count: u64,
    pub start_time: Instant,
    /// Time between `start_time` and when the snapshot was taken.
    pub elapsed: Duration,
}

impl MetricsSnapshot {
    fn started(start_time: Instant) -> Self {
        Self {
            success_count: 0,
            error_count: 0,
            start_time,
            elapsed: Duration::ZERO,
        }
    }

    /// Number of outcomes consumed so far.
    pub const fn total(&self) -> u64 {
        self.success_count + self.error_count
    }

    /// Successful publishes per second since start, or zero before the first
    /// success.
    pub fn avg_rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if self.success_count == 0 || secs <= 0.0 {
            return 0.0;
        }
        self.success_count as f64 / secs
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:10} published, {:3.0}/sec, {:3} errors",
            self.success_count,
            self.avg_rate(),
            self.error_count
        )
    }
}

/// Single consumer of [`Outcome`]s.
pub struct Aggregator {
    report_interval: Duration,
    snapshot: MetricsSnapshot,
    report_tx: watch::Sender<MetricsSnapshot>,
}

impl Aggregator {
    /// Creates an aggregator and a receiver for its periodic snapshots.
    pub fn new(report_interval: Duration) -> (Self, watch::Receiver<MetricsSnapshot>) {
        let snapshot = MetricsSnapshot::started(Instant::now());
        let (report_tx, report_rx) = watch::channel(snapshot);
        let aggregator = Self {
            report_interval,
            snapshot,
            report_tx,
        };
        (aggregator, report_rx)
    }

    /// Consumes outcomes until `shutdown` fires or every sender is dropped,
    /// reporting every `report_interval`.
    ///
    /// Outcomes already queued when shutdown fires are still counted; nothing
    /// is awaited after that. The final report is best-effort: the last
    /// snapshot is published on the watch channel and returned, but no report
    /// line is guaranteed.
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<Outcome>,
        shutdown: Shutdown,
    ) -> MetricsSnapshot {
        let start = self.snapshot.start_time;
        let mut ticker = time::interval_at(start + self.report_interval, self.report_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // No `biased;` here: outcomes and report ticks get a fair,
            // randomized pick when both are ready.
            tokio::select! {
                () = shutdown.triggered() => {
                    while let Ok(outcome) = inbound.try_recv() {
                        self.record(&outcome);
                    }
                    break;
                }
                next = inbound.recv() => match next {
                    Some(outcome) => self.record(&outcome),
                    None => {
                        tracing::debug!("All outcome senders dropped");
                        break;
                    }
                },
                _ = ticker.tick() => self.report(),
            }
        }

        self.refresh();
        self.snapshot
    }

    fn record(&mut self, outcome: &Outcome) {
        if outcome.succeeded {
            self.snapshot.success_count += 1;
        } else {
            self.snapshot.error_count += 1;
        }
    }

    fn refresh(&mut self) {
        self.snapshot.elapsed = self.snapshot.start_time.elapsed();
        self.report_tx.send_replace(self.snapshot);
    }

    fn report(&mut self) {
        self.refresh();
        tracing::info!(
            published = self.snapshot.success_count,
            errors = self.snapshot.error_count,
            "{}",
            self.snapshot
        );
    }
}
