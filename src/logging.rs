//! Log subscriber setup

use stratus_core::{Error, LoggingConfig, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Install a global `fmt` subscriber configured from `config`
///
/// `RUST_LOG`, when set to a valid filter, takes precedence over
/// `config.level`.
///
/// # Errors
///
/// Returns [`Error::Config`] for an unparsable filter or when a global
/// subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = build_filter(env.as_deref(), config)?;
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| Error::Config(format!("failed to install log subscriber: {}", e)))
}

fn build_filter(env: Option<&str>, config: &LoggingConfig) -> Result<EnvFilter> {
    if let Some(filter) = env.and_then(|directives| EnvFilter::try_new(directives).ok()) {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level)
        .map_err(|e| Error::Config(format!("invalid logging.level '{}': {}", config.level, e)))
}
