//! Validated configuration for the harness and the register.
//!
//! Every struct here is built once at startup and passed by value to the
//! component that needs it. Constructors reject values that would make the
//! harness misbehave ([`Error::Config`]) and clamp values that only need a
//! floor (worker count, outcome buffer).

use crate::{Destination, Error, Result};
use core::time::Duration;

/// Smallest capacity allowed for the outcome channel between workers and the
/// aggregator.
pub const MIN_OUTCOME_BUFFER: usize = 100;

/// Default period between throughput reports.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(3);

/// Default time allowed for each task to stop once shutdown fires.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

/// Worker pool settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    worker_count: usize,
    tick_interval: Duration,
    initial_delay: Duration,
}

impl PoolConfig {
    /// Creates a pool configuration.
    ///
    /// A `worker_count` of zero is raised to one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `tick_interval` is zero.
    pub fn new(worker_count: usize, tick_interval: Duration) -> Result<Self> {
        if tick_interval.is_zero() {
            return Err(Error::config("tick interval must be greater than 0"));
        }
        Ok(Self {
            worker_count: worker_count.max(1),
            tick_interval,
            initial_delay: Duration::ZERO,
        })
    }

    /// Sets the delay each worker waits once before its first tick.
    #[must_use]
    pub const fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    pub const fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub const fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    pub const fn initial_delay(&self) -> Duration {
        self.initial_delay
    }
}

/// Settings for a full harness run: pool, aggregator and shutdown.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pool: PoolConfig,
    destination: Destination,
    report_interval: Duration,
    outcome_buffer: usize,
    shutdown_timeout: Duration,
}

impl HarnessConfig {
    pub fn new(pool: PoolConfig, destination: Destination) -> Self {
        Self {
            pool,
            destination,
            report_interval: DEFAULT_REPORT_INTERVAL,
            outcome_buffer: MIN_OUTCOME_BUFFER,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Sets the throughput report period.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `report_interval` is zero.
    pub fn with_report_interval(mut self, report_interval: Duration) -> Result<Self> {
        if report_interval.is_zero() {
            return Err(Error::config("report interval must be greater than 0"));
        }
        self.report_interval = report_interval;
        Ok(self)
    }

    /// Sets the outcome channel capacity, never below
    /// [`MIN_OUTCOME_BUFFER`].
    #[must_use]
    pub fn with_outcome_buffer(mut self, outcome_buffer: usize) -> Self {
        self.outcome_buffer = outcome_buffer.max(MIN_OUTCOME_BUFFER);
        self
    }

    #[must_use]
    pub const fn with_shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    pub const fn pool(&self) -> &PoolConfig {
        &self.pool
    }

    pub const fn destination(&self) -> &Destination {
        &self.destination
    }

    pub const fn report_interval(&self) -> Duration {
        self.report_interval
    }

    pub const fn outcome_buffer(&self) -> usize {
        self.outcome_buffer
    }

    pub const fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }
}

/// What a register does when its conditional write loses to a concurrent
/// writer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Drop the update for this event. A strictly better candidate can be
    /// lost when it races a write made from a now-stale read.
    #[default]
    Abandon,
    /// Re-read, re-derive and re-write, up to `max_attempts` conditional
    /// writes in total.
    Retry { max_attempts: u32 },
}

impl ConflictPolicy {
    /// Builds a policy from a number of extra attempts; zero means
    /// [`ConflictPolicy::Abandon`].
    pub const fn from_retries(retries: u32) -> Self {
        if retries == 0 {
            Self::Abandon
        } else {
            Self::Retry {
                max_attempts: retries.saturating_add(1),
            }
        }
    }

    /// Total number of conditional writes allowed per event.
    pub const fn max_attempts(&self) -> u32 {
        match self {
            Self::Abandon => 1,
            Self::Retry { max_attempts } if *max_attempts == 0 => 1,
            Self::Retry { max_attempts } => *max_attempts,
        }
    }
}

/// Max-register settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterConfig {
    key: String,
    policy: ConflictPolicy,
}

impl RegisterConfig {
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `key` is empty or only whitespace.
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(Error::config("state key must not be empty"));
        }
        Ok(Self {
            key,
            policy: ConflictPolicy::Abandon,
        })
    }

    #[must_use]
    pub const fn with_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub const fn policy(&self) -> ConflictPolicy {
        self.policy
    }
}

/// Parses a Go-style duration such as `250ms`, `1s`, `1m30s` or `1.5h`.
///
/// Accepted units are `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`. A bare
/// `0` is accepted; any other number needs a unit. Signs are not accepted.
///
/// # Errors
///
/// Returns a human-readable message suitable for a CLI parser.
pub fn parse_duration(input: &str) -> core::result::Result<Duration, String> {
    let raw = input.trim();
    if raw.is_empty() {
        return Err("empty duration".to_string());
    }
    if raw == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    let mut rest = raw;
    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in duration {input:?}"))?;
        if num_end == 0 {
            return Err(format!("invalid duration {input:?}"));
        }
        let value: f64 = rest[..num_end]
            .parse()
            .map_err(|_| format!("invalid number in duration {input:?}"))?;

        let after = &rest[num_end..];
        let unit_end = after
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(after.len());
        let nanos_per_unit = match &after[..unit_end] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            unit => return Err(format!("unknown unit {unit:?} in duration {input:?}")),
        };

        let nanos = (value * nanos_per_unit).round();
        if !nanos.is_finite() || nanos >= u64::MAX as f64 {
            return Err(format!("duration {input:?} is out of range"));
        }
        total = total
            .checked_add(Duration::from_nanos(nanos as u64))
            .ok_or_else(|| format!("duration {input:?} is out of range"))?;
        rest = &after[unit_end..];
    }

    Ok(total)
}
