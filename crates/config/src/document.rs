use figment::{
    Figment,
    value::{Num, Value},
};
use hotconf_types::{ConfigError, Result};
use serde::de::DeserializeOwned;

/// An immutable, fully merged configuration tree.
///
/// A `Document` is only ever built from a load that succeeded end to end, so
/// holding one guarantees a consistent view: every lookup against the same
/// `Document` sees the same data even if the owning store reloads meanwhile.
#[derive(Debug)]
pub struct Document {
    figment: Figment,
}

impl Document {
    pub(crate) fn new(figment: Figment) -> Self {
        Self { figment }
    }

    /// Looks up a single dot-delimited key path.
    #[must_use]
    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.figment.find_value(key).ok()
    }

    /// Returns `true` if `key` resolves to a value.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.figment.contains(key)
    }

    /// Binds the section at `key` into `T`.
    ///
    /// Strings are interpreted leniently, so `"8080"` binds to a `u16` and
    /// `"yes"` to a `bool`; this lets interpolated values bind to typed fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Bind`] if the section is missing or its shape
    /// does not match `T`.
    pub fn get_section<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.figment
            .extract_inner_lossy(key)
            .map_err(|e| ConfigError::Bind {
                key: key.to_string(),
                source: Box::new(e),
            })
    }

    /// Strings only; other scalars are not converted.
    #[must_use]
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get_value(key)?.into_string()
    }

    /// Integers, plus strings that parse as integers.
    #[must_use]
    pub fn get_int(&self, key: &str) -> Option<i64> {
        num_to_i64(self.get_value(key)?.to_num_lossy()?)
    }

    /// Floats and integers, plus strings that parse as either.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn get_float(&self, key: &str) -> Option<f64> {
        let num = self.get_value(key)?.to_num_lossy()?;
        num.to_f64().or_else(|| num_to_i64(num).map(|n| n as f64))
    }

    /// Booleans, plus `1`/`0` and strings such as `"yes"`, `"off"`, `"true"`.
    #[must_use]
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get_value(key)?.to_bool_lossy()
    }
}

fn num_to_i64(num: Num) -> Option<i64> {
    match num.to_i128() {
        Some(n) => i64::try_from(n).ok(),
        None => i64::try_from(num.to_u128()?).ok(),
    }
}
