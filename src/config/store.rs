//! The process-wide configuration store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use notify::RecommendedWatcher;
use parking_lot::Mutex;
use toml::{Table, Value};

use super::coerce::{is_empty, Coerce};
use super::env::EnvSource;
use super::file;
use super::source::{key_path, lookup_path, merge_at_path, normalize_keys};
use super::watcher::watch_file;
use super::ConfigError;

/// Produces the values of a dynamic section.
pub type SectionFn = Box<dyn Fn() -> Table + Send + Sync>;

pub(crate) struct Section {
    pub(crate) name: String,
    pub(crate) produce: SectionFn,
}

/// One published snapshot of the store's contents.
#[derive(Debug, Default, Clone)]
struct Layers {
    /// Dynamic sections and `update_config` writes.
    overrides: Table,
    /// The parsed file source.
    file: Table,
}

struct Inner {
    layers: ArcSwap<Layers>,
    env: EnvSource,
    path: PathBuf,
    sections: Vec<Section>,
    write_lock: Mutex<()>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

/// Layered configuration store.
///
/// Lookups consult, in order: dynamic sections and values written with
/// [`update_config`](Self::update_config), prefixed process environment
/// variables, and the `KEY=value` file. The first layer holding a key
/// decides its value.
///
/// Handles are cheap to clone and share one underlying store. Reads are
/// lock-free and never wait for a reload or write in progress.
///
/// Built with [`ConfigStore::builder`]:
///
/// ```no_run
/// use ember_fnd::ConfigStore;
/// use toml::{Table, Value};
///
/// let store = ConfigStore::builder()
///     .add("app", || {
///         let mut app = Table::new();
///         app.insert("name".into(), Value::from("ember"));
///         app
///     })
///     .init("testing")?;
///
/// assert_eq!(store.get("app.name"), "ember");
/// let port = store.get_int_or("app.port", 3000);
/// # Ok::<(), ember_fnd::ConfigError>(())
/// ```
#[derive(Clone)]
pub struct ConfigStore {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("path", &self.inner.path)
            .field("env", &self.inner.env)
            .field("sections", &self.inner.sections.len())
            .finish_non_exhaustive()
    }
}

impl ConfigStore {
    pub(crate) fn open(
        path: PathBuf,
        env: EnvSource,
        sections: Vec<Section>,
        watch: bool,
    ) -> Result<Self, ConfigError> {
        let loaded = file::load(&path)?;
        if loaded.is_none() {
            tracing::info!(
                path = %path.display(),
                "no config file found, skipping loading config from file"
            );
        }
        let file_found = loaded.is_some();

        let store = Self {
            inner: Arc::new(Inner {
                layers: ArcSwap::from_pointee(Layers {
                    overrides: Table::new(),
                    file: loaded.unwrap_or_default(),
                }),
                env,
                path,
                sections,
                write_lock: Mutex::new(()),
                watcher: Mutex::new(None),
            }),
        };

        if watch && file_found {
            store.start_watcher();
        }

        store.apply_sections();
        Ok(store)
    }

    /// Path of the file backing this store.
    ///
    /// This is the file that was loaded, or the default file name when none
    /// existed; [`update_config`](Self::update_config) writes here.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Looks up a raw value.
    ///
    /// Returns `None` when the key is missing or its value is empty.
    pub fn value(&self, key: &str) -> Option<Value> {
        let path = key_path(key);
        if path.is_empty() {
            return None;
        }

        let layers = self.inner.layers.load();
        let found = lookup_path(&layers.overrides, &path)
            .cloned()
            .or_else(|| self.inner.env.lookup(&path))
            .or_else(|| lookup_path(&layers.file, &path).cloned())?;

        (!is_empty(&found)).then_some(found)
    }

    /// Looks up a raw value, returning `default` when missing or empty.
    pub fn value_or(&self, key: &str, default: impl Into<Value>) -> Value {
        self.value(key).unwrap_or_else(|| default.into())
    }

    /// Whether any layer holds `key`, empty or not.
    pub fn is_set(&self, key: &str) -> bool {
        let path = key_path(key);
        if path.is_empty() {
            return false;
        }

        let layers = self.inner.layers.load();
        lookup_path(&layers.overrides, &path).is_some()
            || self.inner.env.lookup(&path).is_some()
            || lookup_path(&layers.file, &path).is_some()
    }

    /// Looks up a value converted to `T`, or `T`'s zero value.
    pub fn get_as<T: Coerce + Default>(&self, key: &str) -> T {
        self.value(key).map(|v| T::coerce(&v)).unwrap_or_default()
    }

    /// Looks up a value converted to `T`, or `default`.
    pub fn get_as_or<T: Coerce>(&self, key: &str, default: T) -> T {
        match self.value(key) {
            Some(v) => T::coerce(&v),
            None => default,
        }
    }

    pub fn get(&self, key: &str) -> String {
        self.get_string(key)
    }

    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get_string_or(key, default)
    }

    pub fn get_string(&self, key: &str) -> String {
        self.get_as(key)
    }

    pub fn get_string_or(&self, key: &str, default: &str) -> String {
        self.get_as_or(key, default.to_string())
    }

    pub fn get_int(&self, key: &str) -> i32 {
        self.get_as(key)
    }

    pub fn get_int_or(&self, key: &str, default: i32) -> i32 {
        self.get_as_or(key, default)
    }

    pub fn get_int64(&self, key: &str) -> i64 {
        self.get_as(key)
    }

    pub fn get_int64_or(&self, key: &str, default: i64) -> i64 {
        self.get_as_or(key, default)
    }

    pub fn get_uint(&self, key: &str) -> u64 {
        self.get_as(key)
    }

    pub fn get_uint_or(&self, key: &str, default: u64) -> u64 {
        self.get_as_or(key, default)
    }

    pub fn get_float64(&self, key: &str) -> f64 {
        self.get_as(key)
    }

    pub fn get_float64_or(&self, key: &str, default: f64) -> f64 {
        self.get_as_or(key, default)
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get_as(key)
    }

    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get_as_or(key, default)
    }

    /// Reads a nested table as string pairs.
    ///
    /// No default applies here: a missing or non-table key yields an empty
    /// map.
    pub fn get_string_map_string(&self, key: &str) -> HashMap<String, String> {
        let path = key_path(key);
        let layers = self.inner.layers.load();

        lookup_path(&layers.overrides, &path)
            .or_else(|| lookup_path(&layers.file, &path))
            .map(<HashMap<String, String>>::coerce)
            .unwrap_or_default()
    }

    /// Sets `key` to `value` and persists it to the config file.
    ///
    /// The file is rewritten first; if that fails the in-memory value is left
    /// unchanged. The new value takes precedence over the file and
    /// environment layers immediately.
    pub fn update_config(&self, key: &str, value: impl Into<Value>) -> Result<(), ConfigError> {
        let value = value.into();
        if matches!(value, Value::Table(_) | Value::Array(_)) {
            return Err(ConfigError::UnsupportedValue(key.to_string()));
        }
        let path = key_path(key);
        if path.is_empty() {
            return Err(ConfigError::InvalidKey(key.to_string()));
        }

        let _guard = self.inner.write_lock.lock();

        let rendered = String::coerce(&value);
        let contents = file::read(&self.inner.path)?.unwrap_or_default();
        let updated = file::update(&contents, key, &rendered)?;
        std::fs::write(&self.inner.path, updated).map_err(|e| ConfigError::WriteError {
            path: self.inner.path.clone(),
            source: e,
        })?;

        let mut layers = Layers::clone(&self.inner.layers.load());
        merge_at_path(&mut layers.file, &path, Value::String(rendered));
        merge_at_path(&mut layers.overrides, &path, value);
        self.inner.layers.store(Arc::new(layers));

        tracing::debug!(key, path = %self.inner.path.display(), "config value updated");
        Ok(())
    }

    /// Re-reads the config file, replacing the file layer.
    ///
    /// Dynamic sections are not re-invoked; values they produced stay in
    /// force. This is what the file watcher runs on every change. On error
    /// the previous file values are kept.
    pub fn reload_file(&self) -> Result<(), ConfigError> {
        let _guard = self.inner.write_lock.lock();

        let table = file::load(&self.inner.path)?.unwrap_or_default();
        let mut layers = Layers::clone(&self.inner.layers.load());
        layers.file = table;
        self.inner.layers.store(Arc::new(layers));

        tracing::info!(path = %self.inner.path.display(), "config file reloaded");
        Ok(())
    }

    /// Re-reads the config file and re-invokes every dynamic section.
    pub fn reload(&self) -> Result<(), ConfigError> {
        self.reload_file()?;
        self.apply_sections();
        Ok(())
    }

    fn apply_sections(&self) {
        if self.inner.sections.is_empty() {
            return;
        }

        let _guard = self.inner.write_lock.lock();

        let mut layers = Layers::clone(&self.inner.layers.load());
        for section in &self.inner.sections {
            let values = normalize_keys((section.produce)());
            layers
                .overrides
                .insert(section.name.to_lowercase(), Value::Table(values));
        }
        self.inner.layers.store(Arc::new(layers));
    }

    fn start_watcher(&self) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let result = watch_file(&self.inner.path, move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let store = ConfigStore { inner };
            if let Err(e) = store.reload_file() {
                tracing::error!(error = %e, "failed to reload config, keeping current values");
            }
        });

        match result {
            Ok(watcher) => *self.inner.watcher.lock() = Some(watcher),
            Err(e) => tracing::warn!(
                path = %self.inner.path.display(),
                error = %e,
                "failed to watch config file, hot reload disabled"
            ),
        }
    }
}
