//! Application context bundling the shared configuration and logger.

use std::time::Duration;

use crate::config::ConfigStore;
use crate::logger::query::{QueryLoggingAdapter, DEFAULT_SLOW_THRESHOLD};
use crate::logger::{Logger, LoggerConfig};
use crate::Error;

/// Config key holding the slow-statement threshold in milliseconds.
pub const SLOW_THRESHOLD_KEY: &str = "db.slow_threshold_ms";

/// Central application context holding the configuration store and logger.
///
/// Both handles are cheap to clone and safe to share across threads.
///
/// ## Example
///
/// ```no_run
/// use ember_fnd::{AppContext, ConfigStore, Field};
///
/// let ctx = AppContext::builder()
///     .with_config(ConfigStore::builder().init("production")?)
///     .build()?;
///
/// ctx.logger().info("started", &[Field::new("port", ctx.config().get_int_or("app.port", 8080))]);
/// # Ok::<(), ember_fnd::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct AppContext {
    config: ConfigStore,
    logger: Logger,
}

impl AppContext {
    /// Creates a new builder for constructing an `AppContext`.
    pub fn builder() -> AppContextBuilder {
        AppContextBuilder::default()
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// A query logging adapter writing through this context's logger.
    ///
    /// The slow threshold comes from `db.slow_threshold_ms`, 200ms when unset.
    pub fn query_logger(&self) -> QueryLoggingAdapter {
        let default_ms = DEFAULT_SLOW_THRESHOLD.as_millis() as u64;
        let threshold = self.config.get_uint_or(SLOW_THRESHOLD_KEY, default_ms);

        QueryLoggingAdapter::new(self.logger.named("db"))
            .with_slow_threshold(Duration::from_millis(threshold))
    }
}

/// Builder for constructing an [`AppContext`].
#[derive(Debug, Default)]
#[must_use = "builders do nothing until .build() is called"]
pub struct AppContextBuilder {
    config: Option<ConfigStore>,
    logger: Option<Logger>,
}

impl AppContextBuilder {
    /// Attaches the configuration store, usually the result of
    /// [`ConfigBuilder::init`](crate::config::ConfigBuilder::init).
    pub fn with_config(mut self, config: ConfigStore) -> Self {
        self.config = Some(config);
        self
    }

    /// Uses `logger` instead of one built from the configuration.
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Builds the `AppContext`.
    ///
    /// Without an explicit logger, one is built from the store's `log.*`
    /// keys. Returns an error if no configuration was provided.
    pub fn build(self) -> Result<AppContext, Error> {
        let config = self.config.ok_or(Error::MissingConfig)?;
        let logger = match self.logger {
            Some(logger) => logger,
            None => Logger::init(&LoggerConfig::from_store(&config)),
        };

        Ok(AppContext { config, logger })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::JsonEncoder;
    use crate::logger::tests::SharedBuffer;
    use tempfile::TempDir;
    use tracing::level_filters::LevelFilter;

    fn store(dir: &TempDir, contents: &str) -> ConfigStore {
        std::fs::write(dir.path().join(".env"), contents).unwrap();
        ConfigStore::builder()
            .with_dir(dir.path())
            .with_env_prefix("EMBER_CONTEXT_TEST")
            .watch(false)
            .init("")
            .unwrap()
    }

    #[test]
    fn test_build_requires_config() {
        let result = AppContext::builder().build();
        assert!(matches!(result, Err(Error::MissingConfig)));
    }

    #[test]
    fn test_logger_built_from_store() {
        let dir = TempDir::new().unwrap();
        let log_file = dir.path().join("logs/app.log");
        let config = store(
            &dir,
            &format!("LOG.FILENAME={}\nLOG.LEVEL=error\n", log_file.display()),
        );

        let ctx = AppContext::builder().with_config(config).build().unwrap();
        assert_eq!(ctx.logger().level(), LevelFilter::ERROR);

        ctx.logger().error("failed", &[]);
        assert!(std::fs::read_to_string(log_file).unwrap().contains("failed"));
    }

    #[test]
    fn test_query_logger_threshold() {
        let dir = TempDir::new().unwrap();
        let buffer = SharedBuffer::default();
        let logger = Logger::new(LevelFilter::DEBUG, JsonEncoder, buffer.sink());

        let ctx = AppContext::builder()
            .with_config(store(&dir, "DB.SLOW_THRESHOLD_MS=750\n"))
            .with_logger(logger)
            .build()
            .unwrap();
        assert_eq!(ctx.query_logger().slow_threshold(), Duration::from_millis(750));

        let ctx = AppContext::builder()
            .with_config(store(&dir, "APP.NAME=demo\n"))
            .with_logger(ctx.logger().clone())
            .build()
            .unwrap();
        assert_eq!(ctx.query_logger().slow_threshold(), DEFAULT_SLOW_THRESHOLD);
    }
}
