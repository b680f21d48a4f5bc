//! Structured logging with a rotating file sink.
//!
//! A [`Logger`] encodes records itself so every entry carries the true call
//! site, and can also sit under `tracing` through [`Logger::layer`] or
//! [`Logger::install`].

pub mod caller;
pub mod encoder;
mod error;
pub mod layer;
pub mod query;
pub mod record;
pub mod sink;

use std::backtrace::Backtrace;
use std::fmt;
use std::io::Write;
use std::panic::Location;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use tracing::level_filters::LevelFilter;
use tracing::Level;

use crate::config::ConfigStore;

pub use caller::{Caller, CallerResolver};
pub use encoder::{ConsoleEncoder, Encoder, JsonEncoder};
pub use error::LoggerError;
pub use layer::LoggerLayer;
pub use query::{QueryLogger, QueryLoggingAdapter, QueryOutcome, RecordNotFound};
pub use record::{Field, FieldValue, Record};
pub use sink::{Rotation, RotatingFile, Sink};

/// Where the process runs; decides the encoder and outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeployMode {
    /// Colored console lines to the log file and stdout.
    Local,
    /// JSON lines to the log file only.
    #[default]
    Production,
}

/// Logger settings.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggerConfig {
    pub filename: PathBuf,
    pub max_size_mb: u64,
    pub max_backups: usize,
    pub max_age_days: u64,
    pub compress: bool,
    pub rotation: Rotation,
    pub level: String,
    pub mode: DeployMode,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            filename: PathBuf::from("storage/logs/logs.log"),
            max_size_mb: 64,
            max_backups: 5,
            max_age_days: 30,
            compress: false,
            rotation: Rotation::Size,
            level: "debug".to_string(),
            mode: DeployMode::Production,
        }
    }
}

impl LoggerConfig {
    /// Reads the `log.*` keys and `app.env` from a store.
    pub fn from_store(store: &ConfigStore) -> Self {
        let defaults = Self::default();
        let filename = store.get_string_or("log.filename", &defaults.filename.to_string_lossy());

        Self {
            filename: PathBuf::from(filename),
            max_size_mb: store.get_uint_or("log.max_size", defaults.max_size_mb),
            max_backups: store.get_uint_or("log.max_backup", defaults.max_backups as u64) as usize,
            max_age_days: store.get_uint_or("log.max_age", defaults.max_age_days),
            compress: store.get_bool_or("log.compress", defaults.compress),
            rotation: if store.get("log.type").eq_ignore_ascii_case("daily") {
                Rotation::Daily
            } else {
                Rotation::Size
            },
            level: store.get_string_or("log.level", &defaults.level),
            mode: if store.get("app.env").eq_ignore_ascii_case("local") {
                DeployMode::Local
            } else {
                DeployMode::Production
            },
        }
    }
}

/// Parses a level name. `warning` is accepted for `warn`; `dpanic`, `panic`
/// and `fatal` map to `error`.
pub fn parse_level(level: &str) -> Option<LevelFilter> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Some(LevelFilter::TRACE),
        "debug" => Some(LevelFilter::DEBUG),
        "" | "info" => Some(LevelFilter::INFO),
        "warn" | "warning" => Some(LevelFilter::WARN),
        "error" | "dpanic" | "panic" | "fatal" => Some(LevelFilter::ERROR),
        "off" => Some(LevelFilter::OFF),
        _ => None,
    }
}

struct Core {
    level: LevelFilter,
    encoder: Box<dyn Encoder>,
    sink: Sink,
}

fn file_output(config: &LoggerConfig) -> Box<dyn Write + Send> {
    if config.rotation == Rotation::Daily {
        match sink::daily_file(&config.filename, config.max_backups) {
            Ok(file) => return Box::new(file),
            Err(e) => eprintln!(
                "failed to open daily log file in '{}', rotating by size: {e}",
                config.filename.display()
            ),
        }
    }

    Box::new(
        RotatingFile::new(&config.filename)
            .max_size_mb(config.max_size_mb)
            .max_backups(config.max_backups)
            .max_age_days(config.max_age_days)
            .compress(config.compress),
    )
}

/// A cheap-to-clone handle to a structured logger.
#[derive(Clone)]
pub struct Logger {
    core: Arc<Core>,
    name: Arc<str>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("name", &self.name)
            .field("level", &self.core.level)
            .field("encoder", &self.core.encoder)
            .field("sink", &self.core.sink)
            .finish()
    }
}

impl Logger {
    /// Builds a logger from settings.
    ///
    /// Never fails: an unknown level falls back to `info` with a warning on
    /// stderr. A size-rotated file is opened on first write; a daily file is
    /// created up front, and if that fails the size-rotated file is used.
    pub fn init(config: &LoggerConfig) -> Self {
        let level = parse_level(&config.level).unwrap_or_else(|| {
            eprintln!(
                "invalid log level '{}', falling back to 'info'",
                config.level
            );
            LevelFilter::INFO
        });

        let file = file_output(config);

        match config.mode {
            DeployMode::Local => Self::new(
                level,
                ConsoleEncoder::new(true),
                Sink::new().with_output(std::io::stdout()).with_output(file),
            ),
            DeployMode::Production => Self::new(level, JsonEncoder, Sink::new().with_output(file)),
        }
    }

    pub fn new(level: LevelFilter, encoder: impl Encoder + 'static, sink: Sink) -> Self {
        Self {
            core: Arc::new(Core {
                level,
                encoder: Box::new(encoder),
                sink,
            }),
            name: Arc::from(""),
        }
    }

    /// A handle sharing the same outputs that tags records with `name`.
    pub fn named(&self, name: impl AsRef<str>) -> Self {
        Self {
            core: Arc::clone(&self.core),
            name: Arc::from(name.as_ref()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn level(&self) -> LevelFilter {
        self.core.level
    }

    pub fn enabled(&self, level: Level) -> bool {
        level <= self.core.level
    }

    /// Logs at `level`, attributed to the caller of this method.
    #[track_caller]
    pub fn log(&self, level: Level, message: &str, fields: &[Field]) {
        let caller = Caller::from(Location::caller());
        self.log_at(level, Some(&caller), message, fields);
    }

    #[track_caller]
    pub fn debug(&self, message: &str, fields: &[Field]) {
        self.log(Level::DEBUG, message, fields);
    }

    #[track_caller]
    pub fn info(&self, message: &str, fields: &[Field]) {
        self.log(Level::INFO, message, fields);
    }

    #[track_caller]
    pub fn warn(&self, message: &str, fields: &[Field]) {
        self.log(Level::WARN, message, fields);
    }

    #[track_caller]
    pub fn error(&self, message: &str, fields: &[Field]) {
        self.log(Level::ERROR, message, fields);
    }

    /// Logs with an explicit caller.
    pub fn log_at(&self, level: Level, caller: Option<&Caller>, message: &str, fields: &[Field]) {
        self.emit(&self.name, level, caller, message, fields);
    }

    pub(crate) fn emit(
        &self,
        name: &str,
        level: Level,
        caller: Option<&Caller>,
        message: &str,
        fields: &[Field],
    ) {
        if !self.enabled(level) {
            return;
        }

        let stacktrace = (level == Level::ERROR).then(|| Backtrace::force_capture().to_string());
        let record = Record {
            time: Local::now(),
            level,
            logger: name,
            caller,
            message,
            fields,
            stacktrace: stacktrace.as_deref(),
        };

        let mut buf = Vec::with_capacity(256);
        self.core.encoder.encode(&record, &mut buf);
        self.core.sink.write(&buf);
    }

    /// A `tracing` layer writing events through this logger.
    pub fn layer(&self) -> LoggerLayer {
        LoggerLayer::new(self.clone())
    }

    /// Routes all `tracing` events in the process to this logger.
    ///
    /// Calling it again with another logger redirects events to that one.
    pub fn install(&self) -> Result<(), LoggerError> {
        layer::install(self.clone())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::io::{self, Write};
    use tempfile::TempDir;

    /// In-memory output shared between a logger and a test.
    #[derive(Clone, Default)]
    pub(crate) struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        pub(crate) fn sink(&self) -> Sink {
            Sink::new().with_output(self.clone())
        }

        pub(crate) fn lines(&self) -> Vec<String> {
            String::from_utf8_lossy(&self.0.lock())
                .lines()
                .map(str::to_string)
                .collect()
        }

        pub(crate) fn records(&self) -> Vec<serde_json::Value> {
            self.lines()
                .iter()
                .map(|line| serde_json::from_str(line).unwrap())
                .collect()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn file_config(dir: &TempDir, level: &str) -> LoggerConfig {
        LoggerConfig {
            filename: dir.path().join("logs/logs.log"),
            level: level.to_string(),
            ..LoggerConfig::default()
        }
    }

    #[test]
    fn test_init_writes_json_lines_to_file() {
        let dir = TempDir::new().unwrap();
        let config = file_config(&dir, "debug");
        let logger = Logger::init(&config).named("app");
        assert!(!config.filename.exists());

        logger.info("started", &[Field::new("port", 8080i64)]);

        let contents = std::fs::read_to_string(&config.filename).unwrap();
        let record: serde_json::Value = serde_json::from_str(contents.trim_end()).unwrap();
        assert_eq!(record["level"], "INFO");
        assert_eq!(record["logger"], "app");
        assert_eq!(record["message"], "started");
        assert_eq!(record["port"], 8080);
        let caller = record["caller"].as_str().unwrap();
        assert!(caller.starts_with("logger/mod.rs:"), "{caller}");
        assert!(record.get("stacktrace").is_none());
    }

    #[test]
    fn test_level_filtering() {
        let buffer = SharedBuffer::default();
        let logger = Logger::new(parse_level("warning").unwrap(), JsonEncoder, buffer.sink());

        logger.debug("hidden", &[]);
        logger.info("hidden", &[]);
        logger.warn("shown", &[]);
        logger.error("shown", &[]);

        let records = buffer.records();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r["message"] == "shown"));
    }

    #[test]
    fn test_error_records_carry_stacktrace() {
        let buffer = SharedBuffer::default();
        let logger = Logger::new(LevelFilter::DEBUG, JsonEncoder, buffer.sink());

        logger.error("boom", &[]);

        let records = buffer.records();
        assert!(records[0]["stacktrace"].as_str().is_some());
    }

    #[test]
    fn test_invalid_level_falls_back_to_info() {
        assert_eq!(parse_level("verbose"), None);
        assert_eq!(parse_level("FATAL"), Some(LevelFilter::ERROR));

        let dir = TempDir::new().unwrap();
        let logger = Logger::init(&file_config(&dir, "verbose"));
        assert_eq!(logger.level(), LevelFilter::INFO);
        assert!(logger.enabled(Level::INFO));
        assert!(!logger.enabled(Level::DEBUG));
    }

    #[test]
    fn test_named_shares_outputs() {
        let buffer = SharedBuffer::default();
        let root = Logger::new(LevelFilter::INFO, JsonEncoder, buffer.sink());
        let db = root.named("db");

        root.info("one", &[]);
        db.info("two", &[]);

        let records = buffer.records();
        assert!(records[0].get("logger").is_none());
        assert_eq!(records[1]["logger"], "db");
        assert_eq!(db.name(), "db");
    }

    #[test]
    fn test_config_from_store() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(".env"),
            "LOG.LEVEL=warn\nLOG.TYPE=daily\nLOG.MAX_BACKUP=9\nLOG.COMPRESS=true\nAPP.ENV=local\n",
        )
        .unwrap();
        let store = ConfigStore::builder()
            .with_dir(dir.path())
            .with_env_prefix("EMBER_LOGGER_TEST")
            .watch(false)
            .init("")
            .unwrap();

        let config = LoggerConfig::from_store(&store);
        assert_eq!(config.level, "warn");
        assert_eq!(config.rotation, Rotation::Daily);
        assert_eq!(config.max_backups, 9);
        assert!(config.compress);
        assert_eq!(config.mode, DeployMode::Local);
        assert_eq!(config.max_size_mb, 64);
        assert_eq!(config.filename, PathBuf::from("storage/logs/logs.log"));
    }

    #[test]
    fn test_local_mode_writes_console_lines_to_file() {
        let dir = TempDir::new().unwrap();
        let config = LoggerConfig {
            mode: DeployMode::Local,
            ..file_config(&dir, "debug")
        };
        let logger = Logger::init(&config);

        logger.info("started", &[]);

        let contents = std::fs::read_to_string(&config.filename).unwrap();
        assert!(contents.contains("\t\x1b[34mINFO\x1b[0m\t"), "{contents:?}");
        assert!(contents.contains("\tlogger/mod.rs:"), "{contents:?}");
        assert!(contents.ends_with("\tstarted\n"), "{contents:?}");
        assert!(serde_json::from_str::<serde_json::Value>(contents.trim_end()).is_err());
    }

    #[test]
    fn test_daily_rotation_writes_dated_file() {
        let dir = TempDir::new().unwrap();
        let config = LoggerConfig {
            rotation: Rotation::Daily,
            ..file_config(&dir, "info")
        };
        let logger = Logger::init(&config);

        logger.info("dated", &[]);

        let logs = config.filename.parent().unwrap();
        let names: Vec<String> = std::fs::read_dir(logs)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1, "{names:?}");
        assert!(names[0].ends_with(".log") && names[0] != "logs.log", "{names:?}");
        let contents = std::fs::read_to_string(logs.join(&names[0])).unwrap();
        assert!(contents.contains("\"message\":\"dated\""), "{contents}");
    }

    #[test]
    fn test_resolver_never_reports_its_own_frames() {
        let fallback = Caller::new("fallback.rs", 1);
        let caller = CallerResolver::new(["not_on_this_stack"]).resolve(fallback.clone());

        assert_ne!(caller, fallback);
        assert!(caller.file.ends_with("mod.rs"), "{caller}");
    }

    #[test]
    fn test_query_records_name_the_first_frame_outside_the_adapter() {
        let buffer = SharedBuffer::default();
        let adapter =
            QueryLoggingAdapter::new(Logger::new(LevelFilter::DEBUG, JsonEncoder, buffer.sink()));

        query::tests::trace_not_found(&adapter);

        let records = buffer.records();
        let caller = records[0]["caller"].as_str().unwrap();
        assert!(caller.starts_with("logger/mod.rs:"), "{caller}");
    }

    #[test]
    fn test_resolver_finds_first_frame_outside_excluded_file() {
        let fallback = Caller::new("fallback.rs", 1);
        let caller = CallerResolver::new(["caller.rs"]).resolve(fallback.clone());

        assert_ne!(caller, fallback);
        assert!(caller.file.ends_with("mod.rs"), "{caller}");
    }
}
