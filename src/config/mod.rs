//! Layered, hot-reloadable configuration.

mod builder;
pub mod coerce;
mod env;
mod error;
mod file;
mod source;
mod store;
mod watcher;

pub use builder::{ConfigBuilder, DEFAULT_ENV_PREFIX, DEFAULT_FILE_NAME};
pub use coerce::Coerce;
pub use error::ConfigError;
pub use store::{ConfigStore, SectionFn};
