use super::{Derive, Improves, MaxRegister, StateStore, Update};
use crate::{Result, Shutdown};
use core::fmt;
use serde::{Serialize, de::DeserializeOwned};
use tokio_stream::{Stream, StreamExt};

/// Per-kind totals of the updates produced by [`consume`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeStats {
    pub applied: u64,
    pub skipped: u64,
    pub conflicts: u64,
    pub failed: u64,
}

impl ConsumeStats {
    pub const fn total(&self) -> u64 {
        self.applied + self.skipped + self.conflicts + self.failed
    }

    fn record<V>(&mut self, update: &Update<V>) {
        match update {
            Update::Applied { .. } => self.applied += 1,
            Update::Skipped { .. } => self.skipped += 1,
            Update::Conflict { .. } => self.conflicts += 1,
            Update::Failed(_) => self.failed += 1,
        }
    }
}

/// Feeds every event of `events` to `register`, one at a time, until the
/// stream ends or `shutdown` fires.
///
/// Items that are already errors (undecodable payloads, failed integrity
/// checks) are reported to `observe` as [`Update::Failed`] and counted like
/// any other failure. An event whose update has started is finished even if
/// `shutdown` fires meanwhile.
pub async fn consume<St, S, D, C, F>(
    mut events: St,
    register: &MaxRegister<S, D, C>,
    shutdown: &Shutdown,
    mut observe: F,
) -> ConsumeStats
where
    St: Stream<Item = Result<D::Event>> + Unpin,
    S: StateStore,
    D: Derive,
    D::Value: Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync,
    C: Improves<D::Value>,
    F: FnMut(&Update<D::Value>),
{
    let mut stats = ConsumeStats::default();

    loop {
        let next = tokio::select! {
            () = shutdown.triggered() => break,
            next = events.next() => next,
        };
        let Some(event) = next else {
            tracing::debug!(key = register.key(), "Event stream ended");
            break;
        };

        let update = match event {
            Ok(event) => register.on_event(&event).await,
            Err(e) => Update::Failed(e),
        };
        if let Update::Failed(e) = &update {
            tracing::warn!(
                key = register.key(),
                transient = e.is_transient(),
                "Event dropped: {e}"
            );
        }

        stats.record(&update);
        observe(&update);
    }

    stats
}
