use core::fmt;
use rand::{Rng, distr::Alphanumeric};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

/// Stable index of a worker within its pool.
///
/// Displayed as `p{index}` and embedded in every item the worker produces so
/// that items can be traced back to their producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerId(pub usize);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// A unit of work produced by a worker on every tick.
///
/// The `sha` field is the hex-encoded SHA-256 of `data` and lets downstream
/// consumers check the payload with [`WorkItem::verify`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub data: String,
    pub sha: String,
    /// Generation time in milliseconds since the unix epoch.
    pub time: u64,
}

impl WorkItem {
    /// Builds an item for `worker` with a fresh time-ordered identifier.
    pub fn new(worker: WorkerId, data: impl Into<String>) -> Self {
        let data = data.into();
        Self::with_data(worker, |_, _| data)
    }

    /// Like [`WorkItem::new`], but the payload is built from the item's own
    /// identifier and generation time.
    pub fn with_data(worker: WorkerId, data: impl FnOnce(&str, u64) -> String) -> Self {
        let id = format!("{worker}-{}", uuid::Uuid::now_v7());
        let time = unix_millis();
        let data = data(&id, time);
        Self {
            sha: content_hash(&data),
            id,
            data,
            time,
        }
    }

    /// Returns `true` if `sha` matches the payload.
    pub fn verify(&self) -> bool {
        content_hash(&self.data) == self.sha
    }

    /// Serializes the item as JSON, the format handed to publishers.
    ///
    /// # Errors
    ///
    /// Fails only if serialization itself fails, which does not happen for
    /// string fields.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Result of one publish attempt, sent from a worker to the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub worker: WorkerId,
    pub succeeded: bool,
    pub at: Instant,
}

impl Outcome {
    pub fn new(worker: WorkerId, succeeded: bool) -> Self {
        Self {
            worker,
            succeeded,
            at: Instant::now(),
        }
    }
}

/// Produces the item a worker publishes on each tick.
///
/// Implementations are shared by all workers of a pool and must be cheap;
/// they are called on the tick path.
pub trait WorkSource: Send + Sync + 'static {
    fn next_item(&self, worker: WorkerId) -> WorkItem;
}

/// Random alphanumeric payloads of a fixed length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RandomText {
    len: usize,
}

impl RandomText {
    pub const DEFAULT_LEN: usize = 256;

    pub const fn new(len: usize) -> Self {
        Self { len }
    }
}

impl Default for RandomText {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LEN)
    }
}

impl WorkSource for RandomText {
    fn next_item(&self, worker: WorkerId) -> WorkItem {
        let data: String = rand::rng()
            .sample_iter(Alphanumeric)
            .take(self.len)
            .map(char::from)
            .collect();
        WorkItem::new(worker, data)
    }
}

/// Hex-encoded SHA-256 of `data`.
pub fn content_hash(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}

/// Milliseconds since the unix epoch, or zero if the clock is before it.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}
