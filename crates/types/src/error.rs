//! Unified error type for the hotconf workspace.

use std::error::Error as _;
use std::path::PathBuf;
use thiserror::Error;

/// Enumerates all error kinds that can occur while loading, binding or
/// watching configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A source file could not be read from disk.
    #[error("failed to read config file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A source file was read but is not valid for its format.
    #[error("failed to parse {format} config file {path}")]
    Parse {
        path: PathBuf,
        format: crate::Format,
        #[source]
        source: Box<figment::Error>,
    },

    /// The environment overlay could not be merged into the document.
    #[error("failed to apply environment overrides")]
    Env(#[source] Box<figment::Error>),

    /// A section could not be bound into the requested shape.
    #[error("failed to bind config section `{key}`")]
    Bind {
        key: String,
        #[source]
        source: Box<figment::Error>,
    },

    /// The filesystem event subscription could not be created.
    #[error("failed to create file watcher")]
    WatchInit(#[source] notify::Error),

    /// A path could not be registered with the filesystem watcher.
    #[error("failed to watch config file {path}")]
    WatchPath {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    /// File watching was requested outside of a tokio runtime.
    #[error("file watching requires a running tokio runtime")]
    RuntimeUnavailable,
}

impl ConfigError {
    /// Returns `true` for failures to read, parse or merge the source files.
    #[must_use]
    pub fn is_load_error(&self) -> bool {
        matches!(self, Self::Read { .. } | Self::Parse { .. } | Self::Env(_))
    }

    /// Returns `true` for failures to set up file watching.
    #[must_use]
    pub fn is_watch_error(&self) -> bool {
        matches!(
            self,
            Self::WatchInit(_) | Self::WatchPath { .. } | Self::RuntimeUnavailable
        )
    }

    /// Renders the error together with its whole `source()` chain on one line.
    #[must_use]
    pub fn report(&self) -> String {
        let mut out = self.to_string();
        let mut cause = self.source();
        while let Some(err) = cause {
            out.push_str(": ");
            out.push_str(&err.to_string());
            cause = err.source();
        }
        out
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, ConfigError>;
