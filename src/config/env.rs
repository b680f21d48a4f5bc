use toml::Value;

/// Process environment variables visible to the store under a fixed prefix.
///
/// A key path maps to a variable name by upper-casing each segment and joining
/// prefix and segments with `_`, so with prefix `APPENV` the key `db.host` is
/// read from `APPENV_DB_HOST`. Variables are read at lookup time, so changes to
/// the environment are picked up without a reload.
#[derive(Debug, Clone)]
pub struct EnvSource {
    prefix: String,
}

impl EnvSource {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn var_name(&self, path: &[String]) -> String {
        let key = path.join("_").to_uppercase();
        if self.prefix.is_empty() {
            key
        } else {
            format!("{}_{}", self.prefix.to_uppercase(), key)
        }
    }

    pub fn lookup(&self, path: &[String]) -> Option<Value> {
        if path.is_empty() {
            return None;
        }
        std::env::var(self.var_name(path)).ok().map(Value::String)
    }
}
