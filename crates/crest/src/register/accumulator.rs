//! Optimistic "keep the best value seen" register.
//!
//! Every event goes through read → derive → compare → conditional write.
//! The token read in an attempt is the one the write is conditioned on, and
//! it is never kept across events. When the write loses to a concurrent
//! writer the register either abandons the event or starts a fresh attempt,
//! depending on its [`ConflictPolicy`](crate::ConflictPolicy).

use super::{Derive, SourceEvent, StateStore, StoredRecord, Token};
use crate::{Error, RegisterConfig, Result, SetError};
use bytes::Bytes;
use core::fmt;
use serde::{Serialize, de::DeserializeOwned};
use std::sync::Arc;

/// Decides whether a candidate should replace the stored value.
pub trait Improves<V>: Send + Sync {
    /// Returns `true` only if `candidate` is strictly better than `current`.
    fn improves(&self, candidate: &V, current: &V) -> bool;
}

/// Larger is better.
#[derive(Debug, Clone, Copy, Default)]
pub struct GreaterThan;

impl<V: PartialOrd> Improves<V> for GreaterThan {
    fn improves(&self, candidate: &V, current: &V) -> bool {
        candidate > current
    }
}

/// Smaller is better.
#[derive(Debug, Clone, Copy, Default)]
pub struct LessThan;

impl<V: PartialOrd> Improves<V> for LessThan {
    fn improves(&self, candidate: &V, current: &V) -> bool {
        candidate < current
    }
}

/// What happened to a single event.
#[derive(Debug, Clone)]
pub enum Update<V> {
    /// The candidate was written; `token` is the store's new token.
    Applied {
        record: StoredRecord<V>,
        token: Token,
        attempts: u32,
    },
    /// Nothing was written: there was no candidate, or it did not improve
    /// on the stored value (or the floor).
    Skipped {
        candidate: Option<V>,
        current: Option<V>,
    },
    /// Every allowed attempt lost to a concurrent writer.
    Conflict { candidate: V, attempts: u32 },
    /// The event was dropped because of a read, write or codec failure.
    Failed(Error),
}

impl<V> Update<V> {
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }

    /// Short label used in logs and metrics.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Applied { .. } => "applied",
            Self::Skipped { .. } => "skipped",
            Self::Conflict { .. } => "conflict",
            Self::Failed(_) => "failed",
        }
    }
}

/// A max-register over one key of a [`StateStore`].
pub struct MaxRegister<S, D: Derive, C = GreaterThan> {
    store: Arc<S>,
    derive: D,
    comparator: C,
    floor: Option<D::Value>,
    config: RegisterConfig,
}

impl<S, D: Derive> MaxRegister<S, D, GreaterThan> {
    pub fn new(store: Arc<S>, derive: D, config: RegisterConfig) -> Self {
        Self {
            store,
            derive,
            comparator: GreaterThan,
            floor: None,
            config,
        }
    }
}

impl<S, D: Derive, C> MaxRegister<S, D, C> {
    /// Replaces the comparison used to decide whether a candidate improves.
    pub fn with_comparator<C2>(self, comparator: C2) -> MaxRegister<S, D, C2> {
        MaxRegister {
            store: self.store,
            derive: self.derive,
            comparator,
            floor: self.floor,
            config: self.config,
        }
    }

    /// Sets the value candidates are compared against while the key is
    /// absent. Without a floor the first candidate is always written.
    #[must_use]
    pub fn with_floor(mut self, floor: D::Value) -> Self {
        self.floor = Some(floor);
        self
    }

    pub fn key(&self) -> &str {
        self.config.key()
    }

    pub const fn store(&self) -> &Arc<S> {
        &self.store
    }
}

impl<S, D, C> MaxRegister<S, D, C>
where
    S: StateStore,
    D: Derive,
    D::Value: Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync,
    C: Improves<D::Value>,
{
    /// Reads the stored record and its token, or `None` if the key is
    /// absent.
    ///
    /// # Errors
    ///
    /// - [`Error::StateRead`] if the store fails the read.
    /// - [`Error::Codec`] if the stored bytes are not a record.
    pub async fn current(&self) -> Result<Option<(StoredRecord<D::Value>, Token)>> {
        let key = self.config.key();
        let stored = self
            .store
            .get(key)
            .await
            .map_err(|source| Error::StateRead {
                key: key.to_string(),
                source,
            })?;

        let Some(stored) = stored else {
            return Ok(None);
        };
        let record = serde_json::from_slice(&stored.value).map_err(|e| Error::Codec {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Some((record, stored.token)))
    }

    /// Applies one event.
    ///
    /// Never returns an error: failures are reported as
    /// [`Update::Failed`] so the caller can count them and move on.
    #[tracing::instrument(level = "trace", skip_all, fields(key = self.config.key(), event = event.id()))]
    pub async fn on_event(&self, event: &D::Event) -> Update<D::Value> {
        let key = self.config.key();
        let max_attempts = self.config.policy().max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let current = match self.current().await {
                Ok(current) => current,
                Err(e) => return Update::Failed(e),
            };
            let current_value = current.as_ref().map(|(record, _)| &record.value);

            let Some(candidate) = self.derive.candidate(event, current_value) else {
                tracing::trace!("No candidate for event");
                return Update::Skipped {
                    candidate: None,
                    current: current_value.cloned(),
                };
            };

            if let Some(baseline) = current_value.or(self.floor.as_ref()) {
                if !self.comparator.improves(&candidate, baseline) {
                    tracing::trace!(?candidate, current = ?baseline, "Candidate does not improve");
                    return Update::Skipped {
                        candidate: Some(candidate),
                        current: current_value.cloned(),
                    };
                }
            }

            let record = StoredRecord {
                id: event.id().to_string(),
                value: candidate,
                source_timestamp: event.timestamp(),
            };
            let encoded = match serde_json::to_vec(&record) {
                Ok(encoded) => Bytes::from(encoded),
                Err(e) => {
                    return Update::Failed(Error::Codec {
                        key: key.to_string(),
                        reason: e.to_string(),
                    });
                }
            };

            let expected = current.as_ref().map(|(_, token)| token);
            match self.store.set_if(key, encoded, expected).await {
                Ok(token) => {
                    tracing::debug!(
                        key,
                        candidate = ?record.value,
                        %token,
                        attempt,
                        "Stored improved value"
                    );
                    return Update::Applied {
                        record,
                        token,
                        attempts: attempt,
                    };
                }
                Err(SetError::Conflict) if attempt < max_attempts => {
                    tracing::debug!(key, attempt, "Token went stale, retrying");
                }
                Err(SetError::Conflict) => {
                    tracing::warn!(
                        key,
                        candidate = ?record.value,
                        attempts = attempt,
                        "Update abandoned after losing to a concurrent writer"
                    );
                    return Update::Conflict {
                        candidate: record.value,
                        attempts: attempt,
                    };
                }
                Err(SetError::Store(source)) => {
                    return Update::Failed(Error::StateWrite {
                        key: key.to_string(),
                        source,
                    });
                }
            }
        }
    }
}
