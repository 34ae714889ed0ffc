//! # Structured Logging
//!
//! Installs the global `tracing` subscriber from the logging configuration.
//!
//! ## Key Features
//! - JSON or human-readable text output
//! - `RUST_LOG` overrides the configured level when set
//! - Output to stdout or appended to a file

use std::fs::OpenOptions;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{
    fmt::{self, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

use crate::core::config::{LogFormat, LogOutput, LoggingConfig};
use crate::core::error::{GatewayError, GatewayResult};

/// Build the level filter: `RUST_LOG` first, then the configured level
pub fn build_env_filter(config: &LoggingConfig) -> GatewayResult<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    EnvFilter::try_new(&config.level)
        .map_err(|e| GatewayError::config(format!("Invalid log level '{}': {}", config.level, e)))
}

fn build_writer(output: &LogOutput) -> GatewayResult<BoxMakeWriter> {
    match output {
        LogOutput::Stdout => Ok(BoxMakeWriter::new(std::io::stdout)),
        LogOutput::File { path } => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| GatewayError::config(format!("Failed to open log file {}: {}", path, e)))?;
            Ok(BoxMakeWriter::new(Arc::new(file)))
        }
    }
}

/// Initialize the global tracing subscriber
///
/// Calling this twice is harmless: the second call logs a warning and leaves
/// the first subscriber in place.
pub fn init_logging(config: &LoggingConfig) -> GatewayResult<()> {
    let env_filter = build_env_filter(config)?;
    let writer = build_writer(&config.output)?;

    let result = match config.format {
        LogFormat::Json => Registry::default()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_writer(writer),
            )
            .try_init(),
        LogFormat::Text => Registry::default()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_writer(writer),
            )
            .try_init(),
    };

    if result.is_err() {
        warn!("Tracing subscriber already initialized, skipping initialization");
        return Ok(());
    }

    info!(
        level = %config.level,
        format = ?config.format,
        "Structured logging initialized"
    );
    Ok(())
}
