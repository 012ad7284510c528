//! Core types for the hotconf workspace.
//!
//! This crate defines the error taxonomy shared by the store, the watcher and
//! the process-wide facade, plus the [`Format`] enum naming the supported
//! source file formats.

pub mod error;
pub mod format;

pub use error::{ConfigError, Result};
pub use format::Format;
