use crate::{document::Document, interpolate};
use arc_swap::ArcSwap;
use figment::{
    Figment, Provider as _,
    providers::{Env, Format as _, Json, Serialized, Yaml},
    value::Value,
};
use hotconf_types::{ConfigError, Format, Result};
use serde::de::DeserializeOwned;
use std::{
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

fn default_env_separator() -> String {
    "__".to_string()
}

#[derive(Debug, Clone)]
struct LoadOptions {
    format: Format,
    interpolate: bool,
    env_prefix: Option<String>,
    env_separator: String,
}

/// A configuration document loaded from a fixed, ordered set of files.
///
/// The current [`Document`] sits behind an [`ArcSwap`], so reads are
/// lock-free snapshot loads and [`reload`](Self::reload) publishes a new
/// document with a single atomic store.
#[derive(Debug)]
pub struct ConfigStore {
    /// Current document, atomically swappable.
    current: ArcSwap<Document>,
    /// Source files in merge order.
    files: Vec<PathBuf>,
    options: LoadOptions,
    /// Serializes reloads so the last one to finish also read the files last.
    reload_lock: Mutex<()>,
    reloads: AtomicU64,
}

/// Builder for a [`ConfigStore`] with non-default loader options.
#[derive(Debug, Clone)]
pub struct StoreBuilder {
    files: Vec<PathBuf>,
    options: LoadOptions,
}

impl StoreBuilder {
    /// Appends one source file. Files merge in the order they are added.
    #[must_use]
    pub fn file(mut self, path: impl AsRef<Path>) -> Self {
        self.files.push(path.as_ref().to_path_buf());
        self
    }

    /// Appends several source files, preserving their order.
    #[must_use]
    pub fn files<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        self.files
            .extend(paths.into_iter().map(|p| p.as_ref().to_path_buf()));
        self
    }

    /// Enables or disables `${NAME|default}` expansion in string values
    /// (enabled by default).
    #[must_use]
    pub fn interpolate(mut self, enabled: bool) -> Self {
        self.options.interpolate = enabled;
        self
    }

    /// Overlays environment variables starting with `prefix` on top of the
    /// files, e.g. `APP_SERVER__PORT` for `server.port` with prefix `APP_`.
    #[must_use]
    pub fn env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.options.env_prefix = Some(prefix.into());
        self
    }

    /// Separator that splits overlay variable names into nested keys
    /// (defaults to `__`).
    #[must_use]
    pub fn env_separator(mut self, separator: impl Into<String>) -> Self {
        self.options.env_separator = separator.into();
        self
    }

    /// Reads, parses and merges every file, returning the loaded store.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`] naming the
    /// first file that failed, or [`ConfigError::Env`] if the environment
    /// overlay cannot be merged. No partially loaded store is returned.
    pub fn build(self) -> Result<ConfigStore> {
        let document = load_document(&self.files, &self.options)?;
        tracing::info!(
            format = %self.options.format,
            files = ?self.files,
            "configuration loaded"
        );
        Ok(ConfigStore {
            current: ArcSwap::from_pointee(document),
            files: self.files,
            options: self.options,
            reload_lock: Mutex::new(()),
            reloads: AtomicU64::new(0),
        })
    }
}

impl ConfigStore {
    /// Starts a builder for a store of the given format.
    #[must_use]
    pub fn builder(format: Format) -> StoreBuilder {
        StoreBuilder {
            files: Vec::new(),
            options: LoadOptions {
                format,
                interpolate: true,
                env_prefix: None,
                env_separator: default_env_separator(),
            },
        }
    }

    /// Loads `paths` in order with default options.
    ///
    /// # Errors
    ///
    /// See [`StoreBuilder::build`].
    pub fn load<I, P>(format: Format, paths: I) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        Self::builder(format).files(paths).build()
    }

    /// Loads JSON files in order with default options.
    ///
    /// # Errors
    ///
    /// See [`StoreBuilder::build`].
    pub fn load_json<I, P>(paths: I) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        Self::load(Format::Json, paths)
    }

    /// Loads YAML files in order with default options.
    ///
    /// # Errors
    ///
    /// See [`StoreBuilder::build`].
    pub fn load_yaml<I, P>(paths: I) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        Self::load(Format::Yaml, paths)
    }

    /// Re-reads every loaded file and atomically replaces the document.
    ///
    /// On failure the current document is left in place.
    ///
    /// # Errors
    ///
    /// Returns the same errors as the initial load.
    pub fn reload(&self) -> Result<()> {
        let _guard = self
            .reload_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let document = load_document(&self.files, &self.options)?;
        self.current.store(Arc::new(document));
        let count = self.reloads.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(files = ?self.files, reloads = count, "configuration reloaded");
        Ok(())
    }

    /// Returns the current document. Lookups against the returned snapshot
    /// are unaffected by later reloads.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Document> {
        self.current.load_full()
    }

    /// The files the document was loaded from, in merge order.
    #[must_use]
    pub fn loaded_files(&self) -> &[PathBuf] {
        &self.files
    }

    /// The format every file of this store is parsed as.
    #[must_use]
    pub fn format(&self) -> Format {
        self.options.format
    }

    /// Number of successful reloads since the store was built.
    #[must_use]
    pub fn reload_count(&self) -> u64 {
        self.reloads.load(Ordering::Relaxed)
    }

    /// Looks up a single dot-delimited key path in the current document.
    #[must_use]
    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.current.load().get_value(key)
    }

    /// Returns `true` if `key` resolves in the current document.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.current.load().contains(key)
    }

    /// Binds the section at `key` of the current document into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Bind`] if the section is missing or does not
    /// match the shape of `T`.
    pub fn get_section<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.current.load().get_section(key)
    }

    /// See [`Document::get_string`].
    #[must_use]
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.current.load().get_string(key)
    }

    /// See [`Document::get_int`].
    #[must_use]
    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.current.load().get_int(key)
    }

    /// See [`Document::get_float`].
    #[must_use]
    pub fn get_float(&self, key: &str) -> Option<f64> {
        self.current.load().get_float(key)
    }

    /// See [`Document::get_bool`].
    #[must_use]
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.current.load().get_bool(key)
    }
}

fn load_document(files: &[PathBuf], options: &LoadOptions) -> Result<Document> {
    let mut figment = Figment::new();

    for path in files {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let data = match options.format {
            Format::Json => Json::string(&text).data(),
            Format::Yaml => Yaml::string(&text).data(),
        }
        .map_err(|e| ConfigError::Parse {
            path: path.clone(),
            format: options.format,
            source: Box::new(e),
        })?;

        for (profile, mut dict) in data {
            if options.interpolate {
                interpolate::expand_dict(&mut dict, &interpolate::process_env);
            }
            figment = figment.merge(Serialized::from(dict, profile));
        }
    }

    if let Some(prefix) = &options.env_prefix {
        figment = figment.merge(Env::prefixed(prefix).split(options.env_separator.as_str()));
        figment.data().map_err(|e| ConfigError::Env(Box::new(e)))?;
    }

    Ok(Document::new(figment))
}
