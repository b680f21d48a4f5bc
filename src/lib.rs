pub mod config;
pub mod context;
mod error;
pub mod helpers;
pub mod logger;

pub use config::{ConfigError, ConfigStore};
pub use context::AppContext;
pub use error::Error;
pub use logger::{Field, Logger, LoggerConfig, LoggerError};
