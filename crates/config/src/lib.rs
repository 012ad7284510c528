//! Configuration loading and hot-reloading for hotconf.
//!
//! Uses figment to parse and merge JSON or YAML files (with `${VAR|default}`
//! interpolation and an optional environment overlay), and notify + arc-swap
//! for live file watching with lock-free snapshot reads.

pub mod document;
pub mod interpolate;
pub mod store;
pub mod watcher;

pub use document::Document;
pub use figment::value::Value;
pub use hotconf_types::{ConfigError, Format, Result};
pub use store::{ConfigStore, StoreBuilder};
pub use watcher::{ConfigWatcher, WatchEvent, WatchHandle};
