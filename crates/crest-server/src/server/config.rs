use anyhow::bail;
use clap::{Parser, ValueEnum};
use core::time::Duration;
use crest::{
    ConflictPolicy, Destination, HarnessConfig, PoolConfig, RandomText, RegisterConfig,
    parse_duration,
};

/// Runtime configuration for the `crest-server` binary.
///
/// Every value can be given as a flag or through the environment variable
/// named in its description. A `.env` file in the working directory is loaded
/// first. Durations use Go-style units: `250ms`, `1s`, `1m30s`.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "crest-server",
    version,
    about = "Publishes work items on a fixed tick and keeps the best value seen in a max-register"
)]
pub struct CliArgs {
    /// Number of concurrent publishing workers. Zero is raised to one.
    ///
    /// Environment variable: `NUMBER_OF_PUBLISHERS`
    #[arg(long, env = "NUMBER_OF_PUBLISHERS", default_value_t = 1)]
    pub workers: usize,

    /// Interval between two publishes of the same worker.
    ///
    /// Environment variable: `PUBLISHERS_FREQ`
    #[arg(long, env = "PUBLISHERS_FREQ", default_value = "1s", value_parser = parse_duration)]
    pub tick: Duration,

    /// Delay each worker waits once before its first tick.
    ///
    /// Environment variable: `PUBLISHERS_DELAY`
    #[arg(long, env = "PUBLISHERS_DELAY", default_value = "0s", value_parser = parse_duration)]
    pub delay: Duration,

    /// Interval between two throughput reports.
    ///
    /// Environment variable: `LOG_FREQ`
    #[arg(long, env = "LOG_FREQ", default_value = "3s", value_parser = parse_duration)]
    pub report: Duration,

    /// Log items instead of publishing them; disables the register.
    ///
    /// Environment variable: `PUBLISH_TO_CONSOLE`
    #[arg(long, env = "PUBLISH_TO_CONSOLE", default_value_t = false)]
    pub console: bool,

    /// Name of the pub/sub component items are published to.
    ///
    /// Environment variable: `PUBSUB_NAME`
    #[arg(long, env = "PUBSUB_NAME", default_value_t = String::from("autoscaling-pubsub"))]
    pub pubsub: String,

    /// Topic items are published to.
    ///
    /// Environment variable: `TOPIC_NAME`
    #[arg(long, env = "TOPIC_NAME", default_value_t = String::from("primes"))]
    pub topic: String,

    /// Key the max-register stores its record under.
    ///
    /// Environment variable: `STATE_KEY`
    #[arg(long, env = "STATE_KEY", default_value_t = String::from("high-prime"))]
    pub state_key: String,

    /// What the subscriber keeps in the register.
    ///
    /// Environment variable: `REGISTER_MODE`
    #[arg(long, env = "REGISTER_MODE", value_enum, default_value_t = RegisterMode::HighestPrime)]
    pub register_mode: RegisterMode,

    /// Upper bound of the random `max` carried by prime requests.
    ///
    /// Environment variable: `PRIME_MAX`
    #[arg(long, env = "PRIME_MAX", default_value_t = 100_000)]
    pub prime_max: u64,

    /// Extra conditional writes allowed after losing a race; 0 abandons the
    /// event on the first conflict.
    ///
    /// Environment variable: `CONFLICT_RETRIES`
    #[arg(long, env = "CONFLICT_RETRIES", default_value_t = 0)]
    pub conflict_retries: u32,

    /// Capacity of the outcome channel between workers and the aggregator.
    /// Values below 100 are raised to 100.
    ///
    /// Environment variable: `OUTCOME_BUFFER`
    #[arg(long, env = "OUTCOME_BUFFER", default_value_t = 100)]
    pub outcome_buffer: usize,

    /// Capacity of the in-process bus between publisher and subscriber.
    ///
    /// Environment variable: `BUS_BUFFER`
    #[arg(long, env = "BUS_BUFFER", default_value_t = 1024)]
    pub bus_buffer: usize,

    /// Length of the random payload in console mode.
    ///
    /// Environment variable: `PAYLOAD_LEN`
    #[arg(long, env = "PAYLOAD_LEN", default_value_t = RandomText::DEFAULT_LEN)]
    pub payload_len: usize,

    /// Time each task gets to stop once shutdown fires.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value = "3s", value_parser = parse_duration)]
    pub shutdown_timeout: Duration,
}

/// Value kept by the subscriber's register.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterMode {
    /// Highest prime below the `max` of each request.
    HighestPrime,
    /// Number of items received, as an etag-guarded counter.
    Counter,
}

/// How published items are consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Console { payload_len: usize },
    Loopback(LoopbackConfig),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopbackConfig {
    pub register_mode: RegisterMode,
    pub register: RegisterConfig,
    pub prime_max: u64,
    pub bus_buffer: usize,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub harness: HarnessConfig,
    pub mode: Mode,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.pubsub.trim().is_empty() {
            bail!("PUBSUB_NAME must not be empty");
        }
        if args.topic.trim().is_empty() {
            bail!("TOPIC_NAME must not be empty");
        }

        let pool = PoolConfig::new(args.workers, args.tick)?.with_initial_delay(args.delay);
        let harness = HarnessConfig::new(pool, Destination::new(args.pubsub, args.topic))
            .with_report_interval(args.report)?
            .with_outcome_buffer(args.outcome_buffer)
            .with_shutdown_timeout(args.shutdown_timeout);

        let mode = if args.console {
            if args.payload_len == 0 {
                bail!("PAYLOAD_LEN must be greater than 0");
            }
            Mode::Console {
                payload_len: args.payload_len,
            }
        } else {
            if args.bus_buffer == 0 {
                bail!("BUS_BUFFER must be greater than 0");
            }
            if args.register_mode == RegisterMode::HighestPrime && args.prime_max < 2 {
                bail!("PRIME_MAX ({}) must be at least 2", args.prime_max);
            }
            let register = RegisterConfig::new(args.state_key)?
                .with_policy(ConflictPolicy::from_retries(args.conflict_retries));
            Mode::Loopback(LoopbackConfig {
                register_mode: args.register_mode,
                register,
                prime_max: args.prime_max,
                bus_buffer: args.bus_buffer,
            })
        };

        Ok(Self { harness, mode })
    }
}
