use crate::{Destination, Outcome, Publisher, Shutdown, WorkSource, WorkerId};
use core::time::Duration;
use std::sync::Arc;
use tokio::{
    sync::mpsc,
    time::{self, Instant, MissedTickBehavior},
};

/// Everything a worker needs, shared by all workers of a pool.
pub(crate) struct WorkerContext<S, P> {
    pub source: Arc<S>,
    pub publisher: Arc<P>,
    pub destination: Arc<Destination>,
    pub tick_interval: Duration,
    pub initial_delay: Duration,
}

impl<S, P> Clone for WorkerContext<S, P> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            publisher: Arc::clone(&self.publisher),
            destination: Arc::clone(&self.destination),
            tick_interval: self.tick_interval,
            initial_delay: self.initial_delay,
        }
    }
}

/// Worker task publishing one [`WorkItem`](crate::WorkItem) per tick.
///
/// The worker waits `initial_delay` once, then on every `tick_interval`
/// builds an item, publishes it and sends the resulting [`Outcome`] to the
/// aggregator. The first publish happens one full tick after the delay.
///
/// Every wait (the delay, the tick, the publish call and the outcome send)
/// races `shutdown`, so the worker returns within one tick of the stop
/// condition firing. Each race polls `shutdown` first: once it has fired no
/// new publish is started, even when a tick is ready at the same time. A
/// publish interrupted by shutdown is abandoned and produces no outcome.
///
/// # Arguments
///
/// - `worker_id`: Stable index of this worker, embedded in item IDs.
/// - `ctx`: Shared source, publisher, destination and timing.
/// - `outcomes`: Bounded sender to the aggregator. A full channel suspends
///   the worker (backpressure) instead of dropping outcomes.
/// - `shutdown`: Shared stop condition.
pub(crate) async fn worker_loop<S, P>(
    worker_id: WorkerId,
    ctx: WorkerContext<S, P>,
    outcomes: mpsc::Sender<Outcome>,
    shutdown: Shutdown,
) where
    S: WorkSource,
    P: Publisher,
{
    tracing::trace!("Worker {worker_id} started");

    if !ctx.initial_delay.is_zero() {
        tokio::select! {
            () = shutdown.triggered() => {
                tracing::trace!("Worker {worker_id} stopped during initial delay");
                return;
            }
            () = time::sleep(ctx.initial_delay) => {}
        }
    }

    let mut ticker = time::interval_at(Instant::now() + ctx.tick_interval, ctx.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = shutdown.triggered() => break,
            _ = ticker.tick() => {}
        }
        if shutdown.is_triggered() {
            break;
        }

        let item = ctx.source.next_item(worker_id);
        let succeeded = tokio::select! {
            biased;
            () = shutdown.triggered() => break,
            result = ctx.publisher.publish(&ctx.destination, &item) => match result {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!(worker = %worker_id, id = %item.id, "Publish failed: {e}");
                    false
                }
            },
        };
        drop(item);

        tokio::select! {
            biased;
            () = shutdown.triggered() => break,
            sent = outcomes.send(Outcome::new(worker_id, succeeded)) => {
                if sent.is_err() {
                    tracing::warn!("Worker {worker_id} lost its aggregator, stopping");
                    break;
                }
            }
        }
    }

    tracing::trace!("Worker {worker_id} stopped");
}
