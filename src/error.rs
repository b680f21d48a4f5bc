use crate::config::ConfigError;
use crate::logger::LoggerError;
use thiserror::Error;

/// Top-level error type for the ember-fnd library.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("logger error: {0}")]
    Logger(#[from] LoggerError),

    #[error("application context requires a configuration")]
    MissingConfig,
}
