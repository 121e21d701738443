//! Error types for the publish harness and the max-register.
//!
//! [`Error`] captures every reportable failure in the crate. Only
//! [`Error::Config`] is fatal: it is raised while building configuration,
//! before any task is spawned. Everything else is scoped to a single publish
//! attempt or a single register event and never stops the harness.
//!
//! ## Error Cases
//! - `Config`: invalid configuration detected at startup.
//! - `Publish`: the publish collaborator rejected or failed a work item.
//! - `Join`: a spawned task panicked or was aborted.
//! - `StateRead` / `StateWrite`: the state store failed a read or a
//!   non-conflict write.
//! - `Codec`: a stored record could not be encoded or decoded.
//! - `Integrity`: a work item's content hash does not match its payload.
//! - `InvalidEvent`: an event payload could not be interpreted.
//!
//! Conflicting writes are not errors; they are reported as
//! [`Update::Conflict`](crate::Update::Conflict).

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the harness and the register.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// Configuration was rejected before startup.
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    /// The publish collaborator did not accept the work item.
    #[error("Publish to {destination} failed: {reason}")]
    Publish { destination: String, reason: String },

    /// A spawned task did not complete normally.
    #[error("Task error: {context}")]
    Join { context: String },

    /// Reading the current record failed.
    #[error("State read failed for key {key}: {source}")]
    StateRead {
        key: String,
        #[source]
        source: StoreError,
    },

    /// A conditional write failed for a reason other than a stale token.
    #[error("State write failed for key {key}: {source}")]
    StateWrite {
        key: String,
        #[source]
        source: StoreError,
    },

    /// The stored bytes are not a valid record (or the record could not be
    /// encoded).
    #[error("Codec error for key {key}: {reason}")]
    Codec { key: String, reason: String },

    /// The content hash carried by a work item does not match its payload.
    #[error("Integrity check failed for item {id}")]
    Integrity { id: String },

    /// The event payload could not be interpreted.
    #[error("Invalid event: {reason}")]
    InvalidEvent { reason: String },
}

impl Error {
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Returns `true` when retrying the same operation later may succeed.
    ///
    /// Only store failures classified as [`StoreError::Unavailable`] and
    /// publish failures are considered transient.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::StateRead { source, .. } | Self::StateWrite { source, .. } => {
                source.is_transient()
            }
            Self::Publish { .. } => true,
            _ => false,
        }
    }
}

/// Failure reported by a [`StateStore`](crate::StateStore).
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached or timed out.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store refused the request and will keep refusing it.
    #[error("store rejected request: {0}")]
    Rejected(String),
}

impl StoreError {
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Failure of a conditional write.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum SetError {
    /// The expected token no longer matches the stored one.
    #[error("concurrency token is stale")]
    Conflict,

    #[error(transparent)]
    Store(#[from] StoreError),
}
