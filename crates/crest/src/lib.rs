#![doc = include_str!("../README.md")]

mod config;
mod error;
mod harness;
mod metrics;
mod pool;
mod publish;
mod register;
mod shutdown;
mod work;

pub use crate::config::*;
pub use crate::error::*;
pub use crate::harness::*;
pub use crate::metrics::*;
pub use crate::pool::*;
pub use crate::publish::*;
pub use crate::register::*;
pub use crate::shutdown::*;
pub use crate::work::*;
// Re-exported so `StateStore` implementations can build `Versioned` values
// without adding their own dependency.
pub use bytes;
