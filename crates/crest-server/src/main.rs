#![doc = include_str!("../README.md")]

mod server;

use clap::Parser;
use crest::{ConsolePublisher, Harness, RandomText, Shutdown};
use server::config::{CliArgs, Mode, ServerConfig};
use server::pipeline::{InstrumentedPublisher, run_loopback};
use server::telemetry::{init_telemetry, shutdown_telemetry};
use std::sync::Arc;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;
    log_startup_info(&config);

    let shutdown = Shutdown::new();
    let signals = shutdown.listen_for_signals();

    let result = run(config, shutdown.clone()).await;

    // Stop the listener if the run ended on its own.
    shutdown.trigger();
    if let Ok(Some(signal)) = signals.await {
        tracing::debug!("Stopped by {signal}");
    }

    match &result {
        Ok(()) => tracing::info!("Service shut down successfully"),
        Err(e) => tracing::error!("Service stopped with error: {e:#}"),
    }
    shutdown_telemetry(providers);
    result
}

async fn run(config: ServerConfig, shutdown: Shutdown) -> anyhow::Result<()> {
    match config.mode {
        Mode::Console { payload_len } => {
            let harness = Harness::spawn(
                config.harness,
                Arc::new(RandomText::new(payload_len)),
                Arc::new(InstrumentedPublisher::new(ConsolePublisher)),
                shutdown,
            );
            harness.wait().await?;
        }
        Mode::Loopback(loopback) => {
            let key = loopback.register.key().to_string();
            let report = run_loopback(config.harness, loopback, shutdown).await?;
            tracing::info!(
                applied = report.stats.applied,
                skipped = report.stats.skipped,
                conflicts = report.stats.conflicts,
                failed = report.stats.failed,
                "Subscriber consumed {} events",
                report.stats.total()
            );
            match report.record {
                Some(record) => tracing::info!(
                    key = %key,
                    id = %record.id,
                    source_timestamp = record.source_timestamp,
                    "Final register value: {}",
                    record.value
                ),
                None => tracing::info!(key = %key, "Register is still empty"),
            }
        }
    }
    Ok(())
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting publisher with full config: {config:#?}");
    } else {
        tracing::info!(
            "Starting {} publishers to {} every {:?}",
            config.harness.pool().worker_count(),
            config.harness.destination(),
            config.harness.pool().tick_interval()
        );
    }
}
