use serde::{Deserialize, Serialize};

/// The record persisted under a register's key.
///
/// `id` and `source_timestamp` identify the event that produced `value`;
/// the whole record is replaced on every successful write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord<V> {
    pub id: String,
    pub value: V,
    /// Milliseconds since the unix epoch, as carried by the source event.
    pub source_timestamp: u64,
}
