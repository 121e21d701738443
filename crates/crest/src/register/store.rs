//! The versioned key-value seam used by [`MaxRegister`](crate::MaxRegister).

use crate::{SetError, StoreError};
use bytes::Bytes;
use core::fmt;
use parking_lot::Mutex;
use std::{collections::HashMap, future::Future};

/// Opaque optimistic-concurrency token (an ETag).
///
/// Only ever compared for equality. A new token is issued on every successful
/// write.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token(String);

impl Token {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored value together with the token of the write that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub value: Bytes,
    pub token: Token,
}

/// A key-value store with conditional writes.
pub trait StateStore: Send + Sync {
    /// Returns the current value and token, or `None` if the key was never
    /// written.
    fn get(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<Versioned>, StoreError>> + Send;

    /// Writes `value` only if the stored token still equals `expected`.
    ///
    /// `expected = None` means "only if the key is absent". On success the
    /// new token is returned. A stale `expected` yields
    /// [`SetError::Conflict`] and leaves the store untouched.
    fn set_if(
        &self,
        key: &str,
        value: Bytes,
        expected: Option<&Token>,
    ) -> impl Future<Output = Result<Token, SetError>> + Send;
}

/// In-process [`StateStore`].
///
/// Tokens come from a store-wide counter, so a token is never reused even
/// across keys.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Versioned>,
    version: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }
}

impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Versioned>, StoreError> {
        Ok(self.inner.lock().entries.get(key).cloned())
    }

    async fn set_if(
        &self,
        key: &str,
        value: Bytes,
        expected: Option<&Token>,
    ) -> Result<Token, SetError> {
        let mut inner = self.inner.lock();
        let current = inner.entries.get(key).map(|v| &v.token);
        if current != expected {
            return Err(SetError::Conflict);
        }

        inner.version += 1;
        let token = Token(inner.version.to_string());
        inner.entries.insert(
            key.to_string(),
            Versioned {
                value,
                token: token.clone(),
            },
        );
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn absent_key_reads_as_none() {
        let store = MemoryStore::new();
        assert_eq!(store.get("missing").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn null_token_only_creates() {
        let store = MemoryStore::new();
        let t1 = store
            .set_if("k", Bytes::from_static(b"1"), None)
            .await
            .unwrap();

        let err = store
            .set_if("k", Bytes::from_static(b"2"), None)
            .await
            .unwrap_err();
        assert_eq!(err, SetError::Conflict);

        let stored = store.get("k").await.unwrap().unwrap();
        assert_eq!(stored.value, Bytes::from_static(b"1"));
        assert_eq!(stored.token, t1);
    }

    #[tokio::test]
    async fn stale_token_is_rejected() {
        let store = MemoryStore::new();
        let t1 = store
            .set_if("k", Bytes::from_static(b"1"), None)
            .await
            .unwrap();
        let t2 = store
            .set_if("k", Bytes::from_static(b"2"), Some(&t1))
            .await
            .unwrap();
        assert_ne!(t1, t2);

        let err = store
            .set_if("k", Bytes::from_static(b"3"), Some(&t1))
            .await
            .unwrap_err();
        assert_eq!(err, SetError::Conflict);
        assert_eq!(store.get("k").await.unwrap().unwrap().token, t2);
    }

    #[tokio::test]
    async fn tokens_are_unique_across_keys() {
        let store = MemoryStore::new();
        let a = store.set_if("a", Bytes::new(), None).await.unwrap();
        let b = store.set_if("b", Bytes::new(), None).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);

        let err = store
            .set_if("b", Bytes::new(), Some(&a))
            .await
            .unwrap_err();
        assert_eq!(err, SetError::Conflict);
    }
}
