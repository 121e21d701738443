use crate::WorkItem;
use core::marker::PhantomData;
use serde::{Deserialize, Serialize};

/// An event a register can consume.
pub trait SourceEvent: Send + Sync {
    /// Identifier recorded alongside the value it produced.
    fn id(&self) -> &str;

    /// Event time in milliseconds since the unix epoch.
    fn timestamp(&self) -> u64;
}

impl SourceEvent for WorkItem {
    fn id(&self) -> &str {
        &self.id
    }

    fn timestamp(&self) -> u64 {
        self.time
    }
}

/// Computes the candidate value for an event.
///
/// `current` is the value read from the store for this attempt, so a
/// derivation may depend on it (see [`Increment`]). Returning `None` means
/// the event has nothing to store.
pub trait Derive: Send + Sync {
    type Event: SourceEvent;
    type Value;

    fn candidate(&self, event: &Self::Event, current: Option<&Self::Value>) -> Option<Self::Value>;
}

/// Asks for the highest prime not greater than `max`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimeRequest {
    pub id: String,
    pub max: u64,
    pub time: u64,
}

impl SourceEvent for PrimeRequest {
    fn id(&self) -> &str {
        &self.id
    }

    fn timestamp(&self) -> u64 {
        self.time
    }
}

/// Candidate is the highest prime `<= max`; requests with `max < 2` yield
/// nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct HighestPrime;

impl Derive for HighestPrime {
    type Event = PrimeRequest;
    type Value = u64;

    fn candidate(&self, event: &PrimeRequest, _current: Option<&u64>) -> Option<u64> {
        highest_prime_at_most(event.max)
    }
}

/// Candidate is the current value plus one, starting at one.
///
/// Paired with [`GreaterThan`](crate::GreaterThan) every event improves on
/// what it read, so the register behaves as a counter whose lost updates
/// show up as conflicts.
#[derive(Debug)]
pub struct Increment<E>(PhantomData<fn(&E)>);

impl<E> Increment<E> {
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<E> Default for Increment<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for Increment<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for Increment<E> {}

impl<E: SourceEvent> Derive for Increment<E> {
    type Event = E;
    type Value = u64;

    fn candidate(&self, _event: &E, current: Option<&u64>) -> Option<u64> {
        Some(current.map_or(1, |n| n.saturating_add(1)))
    }
}

/// Largest prime `<= n`, by trial division counting down from `n`.
pub fn highest_prime_at_most(n: u64) -> Option<u64> {
    (2..=n).rev().find(|&candidate| is_prime(candidate))
}

fn is_prime(n: u64) -> bool {
    match n {
        0 | 1 => false,
        2 | 3 => true,
        _ if n % 2 == 0 || n % 3 == 0 => false,
        _ => {
            let mut i = 5u64;
            while i.saturating_mul(i) <= n {
                if n % i == 0 || n % (i + 2) == 0 {
                    return false;
                }
                i += 6;
            }
            true
        }
    }
}
