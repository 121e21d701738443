//! Producer-side sources and the in-process subscriber.
//!
//! In loopback mode the harness publishes onto a [`ChannelPublisher`] and a
//! subscriber task feeds every received item into a [`MaxRegister`] backed
//! by a [`MemoryStore`], the same path a remote subscriber would take behind
//! a real broker.

use super::{config::LoopbackConfig, config::RegisterMode, telemetry};
use crest::{
    ChannelPublisher, ConsumeStats, Derive, Destination, Error, Harness, HarnessConfig,
    HighestPrime, Increment, MaxRegister, MemoryStore, MetricsSnapshot, PrimeRequest, Publisher,
    RandomText, Result, Shutdown, StoredRecord, WorkItem, WorkSource, WorkerId, consume,
};
use rand::Rng;
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinHandle, time::Instant};
use tokio_stream::{StreamExt, wrappers::ReceiverStream};

/// Produces prime requests with a uniformly random `max` in
/// `2..=max_bound`.
#[derive(Debug, Clone, Copy)]
pub struct PrimeRequests {
    max_bound: u64,
}

impl PrimeRequests {
    pub const fn new(max_bound: u64) -> Self {
        Self {
            max_bound: if max_bound < 2 { 2 } else { max_bound },
        }
    }
}

impl WorkSource for PrimeRequests {
    fn next_item(&self, worker: WorkerId) -> WorkItem {
        let max = rand::rng().random_range(2..=self.max_bound);
        WorkItem::with_data(worker, |id, time| {
            serde_json::json!({ "id": id, "max": max, "time": time }).to_string()
        })
    }
}

/// Checks an item's content hash and decodes the prime request it carries.
///
/// # Errors
///
/// - [`Error::Integrity`] if the hash does not match the payload.
/// - [`Error::InvalidEvent`] if the payload is not a prime request or names
///   another item.
pub fn prime_request(item: WorkItem) -> Result<PrimeRequest> {
    let item = verified(item)?;
    let request: PrimeRequest =
        serde_json::from_str(&item.data).map_err(|e| Error::InvalidEvent {
            reason: format!("item {}: {e}", item.id),
        })?;
    if request.id != item.id {
        return Err(Error::InvalidEvent {
            reason: format!("item {} carries request {}", item.id, request.id),
        });
    }
    Ok(request)
}

/// Passes through items whose content hash matches their payload.
///
/// # Errors
///
/// Returns [`Error::Integrity`] otherwise.
pub fn verified(item: WorkItem) -> Result<WorkItem> {
    if item.verify() {
        Ok(item)
    } else {
        Err(Error::Integrity { id: item.id })
    }
}

/// Records publish counts and latency around another publisher.
#[derive(Debug, Clone)]
pub struct InstrumentedPublisher<P> {
    inner: P,
}

impl<P> InstrumentedPublisher<P> {
    pub const fn new(inner: P) -> Self {
        Self { inner }
    }
}

impl<P: Publisher> Publisher for InstrumentedPublisher<P> {
    async fn publish(&self, destination: &Destination, item: &WorkItem) -> Result<()> {
        let start = Instant::now();
        let result = self.inner.publish(destination, item).await;
        telemetry::record_publish_duration(start.elapsed().as_secs_f64() * 1000.0);
        match &result {
            Ok(()) => telemetry::increment_published(),
            Err(_) => telemetry::increment_publish_errors(),
        }
        result
    }
}

/// What a loopback run ends with.
#[derive(Debug, Clone)]
pub struct LoopbackReport {
    pub snapshot: MetricsSnapshot,
    pub stats: ConsumeStats,
    pub record: Option<StoredRecord<u64>>,
}

/// Runs the harness against the in-process subscriber until `shutdown`
/// fires.
///
/// # Errors
///
/// Fails if the harness or the subscriber task cannot be joined, or if the
/// final register value cannot be read.
pub async fn run_loopback(
    harness: HarnessConfig,
    loopback: LoopbackConfig,
    shutdown: Shutdown,
) -> Result<LoopbackReport> {
    let store = Arc::new(MemoryStore::new());
    match loopback.register_mode {
        RegisterMode::HighestPrime => {
            let register = MaxRegister::new(store, HighestPrime, loopback.register).with_floor(0);
            let source = PrimeRequests::new(loopback.prime_max);
            run_with(harness, loopback.bus_buffer, source, register, prime_request, shutdown).await
        }
        RegisterMode::Counter => {
            let register = MaxRegister::new(store, Increment::<WorkItem>::new(), loopback.register);
            let source = RandomText::default();
            run_with(harness, loopback.bus_buffer, source, register, verified, shutdown).await
        }
    }
}

async fn run_with<S, D, F>(
    harness: HarnessConfig,
    bus_buffer: usize,
    source: S,
    register: MaxRegister<MemoryStore, D>,
    decode: F,
    shutdown: Shutdown,
) -> Result<LoopbackReport>
where
    S: WorkSource,
    D: Derive<Value = u64> + 'static,
    F: Fn(WorkItem) -> Result<D::Event> + Send + 'static,
{
    let (bus, inbox) = ChannelPublisher::channel(bus_buffer);
    let register = Arc::new(register);
    let subscriber = spawn_subscriber(inbox, Arc::clone(&register), decode, shutdown.clone());

    let harness = Harness::spawn(
        harness,
        Arc::new(source),
        Arc::new(InstrumentedPublisher::new(bus)),
        shutdown,
    );
    let snapshot = harness.wait().await?;

    let stats = subscriber.await.map_err(|e| Error::Join {
        context: format!("subscriber: {e}"),
    })?;
    let record = register.current().await?.map(|(record, _)| record);

    Ok(LoopbackReport {
        snapshot,
        stats,
        record,
    })
}

/// Spawns the task that applies every received item to `register`.
pub fn spawn_subscriber<D, F>(
    inbox: mpsc::Receiver<WorkItem>,
    register: Arc<MaxRegister<MemoryStore, D>>,
    decode: F,
    shutdown: Shutdown,
) -> JoinHandle<ConsumeStats>
where
    D: Derive<Value = u64> + 'static,
    F: Fn(WorkItem) -> Result<D::Event> + Send + 'static,
{
    tokio::spawn(async move {
        let events = ReceiverStream::new(inbox).map(decode);
        let stats = consume(events, &*register, &shutdown, |update| {
            telemetry::record_register_update(update.kind());
        })
        .await;
        tracing::debug!(
            applied = stats.applied,
            skipped = stats.skipped,
            conflicts = stats.conflicts,
            failed = stats.failed,
            "Subscriber stopped"
        );
        stats
    })
}
