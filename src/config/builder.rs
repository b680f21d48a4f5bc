use std::path::{Path, PathBuf};

use toml::Table;

use super::env::EnvSource;
use super::file::select_path;
use super::store::{ConfigStore, Section, SectionFn};
use super::ConfigError;

/// Default name of the `KEY=value` file.
pub const DEFAULT_FILE_NAME: &str = ".env";

/// Default prefix for process environment variables.
pub const DEFAULT_ENV_PREFIX: &str = "APPENV";

/// Builder for a [`ConfigStore`].
///
/// Dynamic sections are registered here with [`add`](Self::add) and frozen by
/// [`init`](Self::init), which consumes the builder; there is no way to
/// register a section on a store that is already running.
///
/// ## Example
///
/// ```no_run
/// use ember_fnd::ConfigStore;
/// use toml::{Table, Value};
///
/// // Loads ./.env.production if it exists, ./.env otherwise.
/// let store = ConfigStore::builder()
///     .with_env_prefix("MYAPP")
///     .add("database", || {
///         let mut db = Table::new();
///         db.insert("pool_size".into(), Value::Integer(16));
///         db
///     })
///     .init("production")?;
/// # Ok::<(), ember_fnd::ConfigError>(())
/// ```
#[must_use = "builders do nothing until .init() is called"]
pub struct ConfigBuilder {
    dir: PathBuf,
    file_name: String,
    env_prefix: String,
    watch: bool,
    sections: Vec<Section>,
}

impl std::fmt::Debug for ConfigBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigBuilder")
            .field("dir", &self.dir)
            .field("file_name", &self.file_name)
            .field("env_prefix", &self.env_prefix)
            .field("watch", &self.watch)
            .field(
                "sections",
                &self.sections.iter().map(|s| &s.name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            file_name: DEFAULT_FILE_NAME.to_string(),
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            watch: true,
            sections: Vec::new(),
        }
    }
}

impl ConfigStore {
    /// Creates a new configuration builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

impl ConfigBuilder {
    /// Directory holding the config file. Defaults to the working directory.
    pub fn with_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.dir = dir.as_ref().to_path_buf();
        self
    }

    /// Base name of the config file. Defaults to `.env`.
    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = name.into();
        self
    }

    /// Prefix for process environment variables. Defaults to `APPENV`.
    ///
    /// An empty prefix exposes unprefixed variables.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Whether to reload the file when it changes on disk. Defaults to `true`.
    pub fn watch(mut self, enabled: bool) -> Self {
        self.watch = enabled;
        self
    }

    /// Registers a dynamic section.
    ///
    /// `produce` runs during [`init`](Self::init) and on every
    /// [`ConfigStore::reload`]; its table is stored under `name` and takes
    /// precedence over file and environment values. Registering the same name
    /// twice replaces the earlier function. Sections run in registration order.
    pub fn add<F>(mut self, name: impl Into<String>, produce: F) -> Self
    where
        F: Fn() -> Table + Send + Sync + 'static,
    {
        let name = name.into();
        let produce: SectionFn = Box::new(produce);

        match self
            .sections
            .iter_mut()
            .find(|s| s.name.eq_ignore_ascii_case(&name))
        {
            Some(existing) => existing.produce = produce,
            None => self.sections.push(Section { name, produce }),
        }
        self
    }

    /// Loads the config file for `env_label` and builds the store.
    ///
    /// With a non-empty label, `<base>.<label>` is loaded when it exists,
    /// falling back to `<base>`. A missing file is not an error; a file that
    /// can't be read or parsed is.
    pub fn init(self, env_label: &str) -> Result<ConfigStore, ConfigError> {
        let path = select_path(&self.dir, &self.file_name, env_label);

        ConfigStore::open(
            path,
            EnvSource::new(self.env_prefix),
            self.sections,
            self.watch,
        )
    }
}
