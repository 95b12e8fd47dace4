use tracing_subscriber::EnvFilter;

use crate::error::{AppError, AppResult};

/// Build the log filter: `RUST_LOG` wins over the configured level
pub fn build_filter(level: &str) -> AppResult<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level).map_err(|e| {
            AppError::Configuration(format!("Invalid log level '{}': {}", level, e))
        }),
    }
}

/// Install the global fmt subscriber
pub fn init_tracing(level: &str) -> AppResult<()> {
    let filter = build_filter(level)?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| AppError::Internal(format!("Failed to initialize logging: {}", e)))
}
