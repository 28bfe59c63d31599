//! Structured logging setup for keysync services

use keysync_config::{KeysyncConfig, LogFormat};
use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter,
};

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialize logging from the loaded service configuration
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_from_config(service_name: &str, config: &KeysyncConfig) -> Result<(), TryInitError> {
    match config.log_format {
        LogFormat::Json => init_logging(service_name, config.log_level()),
        LogFormat::Console => init_console_logging(service_name, config.log_level()),
    }
}

/// Initialize JSON structured logging (for production)
pub fn init_logging(service_name: &str, default_level: &str) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(false)
                .with_span_list(false),
        )
        .try_init()?;

    tracing::info!(service = service_name, "Logging initialized");
    Ok(())
}

/// Initialize human-readable console logging (for development)
pub fn init_console_logging(service_name: &str, default_level: &str) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(fmt::layer().with_target(true).with_file(true).with_line_number(true))
        .try_init()?;

    tracing::info!(service = service_name, "Console logging initialized");
    Ok(())
}
