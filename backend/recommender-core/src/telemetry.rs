use crate::config::ServiceConfig;
use tracing::info;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Installs the global tracing subscriber for hosts embedding the core.
///
/// Filtering follows `RUST_LOG` (default `info`); `log_json` switches the
/// output to one JSON object per line.
pub fn init_tracing(config: &ServiceConfig) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(config.log_json.then(|| fmt::layer().json()))
        .with((!config.log_json).then(fmt::layer))
        .try_init()?;

    info!(json = config.log_json, "Starting {} tracing", config.service_name);
    Ok(())
}
