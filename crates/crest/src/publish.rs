//! The publish seam between the worker pool and a message bus.
//!
//! The harness never talks to a broker directly. Each worker hands its
//! [`WorkItem`] to a [`Publisher`] and records whether the call succeeded.
//! Two publishers ship with the crate:
//!
//! - [`ConsolePublisher`] logs every item and always succeeds.
//! - [`ChannelPublisher`] forwards items over a bounded in-process channel,
//!   which lets a consumer in the same process play the subscriber.

use crate::{Error, Result, WorkItem};
use core::{fmt, future::Future};
use tokio::sync::mpsc;

/// Where items are published: a pub/sub component and a topic within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    pub pubsub: String,
    pub topic: String,
}

impl Destination {
    pub fn new(pubsub: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            pubsub: pubsub.into(),
            topic: topic.into(),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pubsub, self.topic)
    }
}

/// A client able to publish work items to a destination.
///
/// Failures are reported as [`Error::Publish`]; the harness counts them and
/// moves on. Implementations must not retry on the harness's behalf.
pub trait Publisher: Send + Sync + 'static {
    fn publish(
        &self,
        destination: &Destination,
        item: &WorkItem,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Logs each item instead of sending it anywhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsolePublisher;

impl Publisher for ConsolePublisher {
    async fn publish(&self, destination: &Destination, item: &WorkItem) -> Result<()> {
        tracing::info!(%destination, id = %item.id, sha = %item.sha, "{}", item.data);
        Ok(())
    }
}

/// Publishes onto a bounded in-process channel.
///
/// A full channel applies backpressure to the worker; a closed channel (the
/// receiving side was dropped) is a publish failure.
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    tx: mpsc::Sender<WorkItem>,
}

impl ChannelPublisher {
    /// Creates a publisher and the receiving end of its channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<WorkItem>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl Publisher for ChannelPublisher {
    async fn publish(&self, destination: &Destination, item: &WorkItem) -> Result<()> {
        self.tx
            .send(item.clone())
            .await
            .map_err(|_| Error::Publish {
                destination: destination.to_string(),
                reason: "subscriber channel closed".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WorkerId;

    #[tokio::test]
    async fn channel_publisher_delivers_items() {
        let (publisher, mut rx) = ChannelPublisher::channel(4);
        let destination = Destination::new("pubsub", "primes");
        let item = WorkItem::new(WorkerId(0), "data");

        publisher.publish(&destination, &item).await.unwrap();
        assert_eq!(rx.recv().await, Some(item));
    }

    #[tokio::test]
    async fn channel_publisher_fails_once_closed() {
        let (publisher, rx) = ChannelPublisher::channel(4);
        drop(rx);

        let destination = Destination::new("pubsub", "primes");
        let err = publisher
            .publish(&destination, &WorkItem::new(WorkerId(0), "data"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Publish { ref destination, .. } if destination == "pubsub/primes"));
    }

    #[tokio::test]
    async fn console_publisher_always_succeeds() {
        let destination = Destination::new("pubsub", "metrics");
        let item = WorkItem::new(WorkerId(3), "data");
        assert!(ConsolePublisher.publish(&destination, &item).await.is_ok());
    }
}
