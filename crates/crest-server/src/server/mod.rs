//! Process wiring for `crest-server`.
//!
//! ## Structure
//!
//! - [`config`] - CLI/env arguments and their validation.
//! - [`pipeline`] - Work sources, the instrumented publisher and the
//!   in-process subscriber.
//! - [`telemetry`] - Console logging and optional OpenTelemetry export.

pub mod config;
pub mod pipeline;
pub mod telemetry;
