//! Process-wide, hot-reloadable application configuration.
//!
//! Call [`load_from_json_file`] or [`load_from_yaml_file`] once during
//! startup, then read from anywhere with [`get_section`], [`get_value`] or
//! [`get`]. With `active_watcher` set, edits to the source files are picked
//! up in place and visible to every subsequent read.
//!
//! The global handle is a thin facade: everything it does is available on an
//! explicitly constructed [`ConfigStore`], which is what code that wants
//! independent instances (tests in particular) should pass around instead.
//!
//! ```no_run
//! # #[tokio::main]
//! # async fn main() -> hotconf::Result<()> {
//! #[derive(serde::Deserialize)]
//! struct Database {
//!     url: String,
//!     pool_size: u32,
//! }
//!
//! hotconf::load_from_yaml_file(true, ["config/base.yaml", "config/local.yaml"])?;
//! let db: Database = hotconf::get_section("database")?;
//! let debug = hotconf::get_bool("debug").unwrap_or(false);
//! # Ok(())
//! # }
//! ```

use arc_swap::ArcSwapOption;
use serde::de::DeserializeOwned;
use std::{path::Path, sync::Arc};
use tokio::sync::broadcast;

pub use hotconf_config::{
    ConfigError, ConfigStore, ConfigWatcher, Document, Format, Result, StoreBuilder, Value,
    WatchEvent, WatchHandle,
};

/// The published configuration: a loaded store and, if requested, the
/// watcher keeping it fresh. Dropping it stops the watcher.
struct AppConfig {
    store: Arc<ConfigStore>,
    watcher: Option<WatchHandle>,
}

static APP_CONFIG: ArcSwapOption<AppConfig> = ArcSwapOption::const_empty();

/// Loads JSON files (later files override earlier ones) and publishes them as
/// the process-wide configuration, replacing any previous one.
///
/// With `active_watcher`, the files are watched and reloaded on every write;
/// this needs a running tokio runtime.
///
/// # Errors
///
/// Returns a load error if any file cannot be read or parsed, or a watch
/// error if watching was requested and could not be set up. In both cases
/// the previously published configuration, if any, stays in place.
pub fn load_from_json_file<I, P>(active_watcher: bool, paths: I) -> Result<()>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    load_from_file(Format::Json, active_watcher, paths)
}

/// Loads YAML files (later files override earlier ones) and publishes them as
/// the process-wide configuration, replacing any previous one.
///
/// With `active_watcher`, the files are watched and reloaded on every write;
/// this needs a running tokio runtime.
///
/// # Errors
///
/// Same as [`load_from_json_file`].
pub fn load_from_yaml_file<I, P>(active_watcher: bool, paths: I) -> Result<()>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    load_from_file(Format::Yaml, active_watcher, paths)
}

fn load_from_file<I, P>(format: Format, active_watcher: bool, paths: I) -> Result<()>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let store = Arc::new(ConfigStore::load(format, paths)?);
    // Attach before publishing so a watch failure leaves nothing half-installed.
    let watcher = if active_watcher {
        Some(ConfigWatcher::watch(Arc::clone(&store))?)
    } else {
        None
    };
    install(store, watcher);
    Ok(())
}

/// Publishes an explicitly built store, with an optional watcher, as the
/// process-wide configuration. The previous configuration is dropped, which
/// stops its watcher.
pub fn install(store: Arc<ConfigStore>, watcher: Option<WatchHandle>) {
    let watching = watcher.is_some();
    let previous = APP_CONFIG.swap(Some(Arc::new(AppConfig { store, watcher })));
    tracing::info!(
        watching,
        replaced = previous.is_some(),
        "process-wide configuration published"
    );
}

/// Returns the process-wide configuration store.
///
/// # Panics
///
/// Panics if no configuration has been loaded yet. Configuration is expected
/// to be loaded during startup, before any code reads it; use [`try_get`]
/// where that is not guaranteed.
#[must_use]
pub fn get() -> Arc<ConfigStore> {
    match try_get() {
        Some(store) => store,
        None => panic!(
            "configuration is not initialized: call load_from_json_file or load_from_yaml_file first"
        ),
    }
}

/// Returns the process-wide configuration store, or `None` before the first
/// successful load.
#[must_use]
pub fn try_get() -> Option<Arc<ConfigStore>> {
    APP_CONFIG.load_full().map(|app| Arc::clone(&app.store))
}

/// Returns `true` once a configuration has been published.
#[must_use]
pub fn is_loaded() -> bool {
    APP_CONFIG.load().is_some()
}

/// Subscribes to reload notifications of the process-wide configuration.
/// `None` if nothing is loaded or it was loaded without a watcher.
#[must_use]
pub fn subscribe() -> Option<broadcast::Receiver<WatchEvent>> {
    let app = APP_CONFIG.load_full()?;
    app.watcher.as_ref().map(WatchHandle::subscribe)
}

/// Binds the named section of the process-wide configuration into `T`.
///
/// Use `get_section::<T>(name).unwrap_or_default()` to fall back to `T`'s
/// default on a missing or mismatched section.
///
/// # Errors
///
/// Returns [`ConfigError::Bind`] if the section is missing or does not match
/// the shape of `T`.
///
/// # Panics
///
/// Panics if no configuration has been loaded yet (see [`get`]).
pub fn get_section<T: DeserializeOwned>(section: &str) -> Result<T> {
    get().get_section(section)
}

/// Looks up a single dot-delimited key in the process-wide configuration.
///
/// # Panics
///
/// Panics if no configuration has been loaded yet (see [`get`]).
#[must_use]
pub fn get_value(key: &str) -> Option<Value> {
    get().get_value(key)
}

/// Reads a string value from the process-wide configuration.
///
/// # Panics
///
/// Panics if no configuration has been loaded yet (see [`get`]).
#[must_use]
pub fn get_string(key: &str) -> Option<String> {
    get().get_string(key)
}

/// Reads an integer, or a string holding one.
///
/// # Panics
///
/// Panics if no configuration has been loaded yet (see [`get`]).
#[must_use]
pub fn get_int(key: &str) -> Option<i64> {
    get().get_int(key)
}

/// Reads a float; integers are widened.
///
/// # Panics
///
/// Panics if no configuration has been loaded yet (see [`get`]).
#[must_use]
pub fn get_float(key: &str) -> Option<f64> {
    get().get_float(key)
}

/// Reads a boolean, accepting the usual string spellings.
///
/// # Panics
///
/// Panics if no configuration has been loaded yet (see [`get`]).
#[must_use]
pub fn get_bool(key: &str) -> Option<bool> {
    get().get_bool(key)
}
