//! Process-wide stop condition.
//!
//! [`Shutdown`] wraps a [`CancellationToken`]: triggering it is a broadcast
//! that every clone observes, any number of times, and triggering it again is
//! a no-op. Workers and the aggregator race every suspension point against
//! [`Shutdown::triggered`], so teardown is bounded by one tick.
//!
//! Shutdown is fast and best-effort. Nothing in flight is flushed or retried.

use core::fmt;
use tokio::{signal, task::JoinHandle};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Termination signal that triggered a shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => write!(f, "SIGINT"),
            Self::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Cloneable handle to the shared stop condition.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing token, e.g. a child of a wider application token.
    pub const fn from_token(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Fires the stop condition. Idempotent.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the stop condition has fired (immediately if it already
    /// has).
    pub fn triggered(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Spawns a task that fires the stop condition on SIGINT or SIGTERM.
    ///
    /// The task also ends, without doing anything, if the stop condition is
    /// fired from elsewhere first.
    pub fn listen_for_signals(&self) -> JoinHandle<Option<Signal>> {
        let shutdown = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = shutdown.triggered() => None,
                signal = wait_for_signal() => {
                    tracing::info!("Received {signal}, shutting down");
                    shutdown.trigger();
                    Some(signal)
                }
            }
        })
    }
}

/// Waits for the first of SIGINT (Ctrl+C) or SIGTERM.
///
/// A handler that cannot be installed is logged and never fires; the other
/// one still works.
pub async fn wait_for_signal() -> Signal {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                core::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = core::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            core::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => Signal::Interrupt,
        () = terminate => Signal::Terminate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;

    #[tokio::test]
    async fn every_clone_observes_the_trigger() {
        let shutdown = Shutdown::new();
        let listeners: Vec<_> = (0..4)
            .map(|_| {
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    shutdown.triggered().await;
                    shutdown.is_triggered()
                })
            })
            .collect();

        assert!(!shutdown.is_triggered());
        shutdown.trigger();

        for listener in listeners {
            assert!(listener.await.unwrap());
        }
    }

    #[tokio::test]
    async fn trigger_is_idempotent() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        shutdown.trigger();

        assert!(shutdown.is_triggered());
        shutdown.triggered().await;
        shutdown.triggered().await;
    }

    #[tokio::test]
    async fn signal_listener_exits_when_triggered_elsewhere() {
        let shutdown = Shutdown::new();
        let listener = shutdown.listen_for_signals();
        shutdown.trigger();

        let signal = tokio::time::timeout(Duration::from_secs(1), listener)
            .await
            .expect("listener did not stop")
            .unwrap();
        assert_eq!(signal, None);
    }
}
