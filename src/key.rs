//! Record keys.
//!
//! A record key is a hierarchical string identifier such as `train/loss`.
//! It names a record within a backend and doubles as a grouping namespace:
//! scalar sequences live at `key/0`, `key/1`, ... and mapping fields at
//! `key/<field>`.

use derive_more::{Display, From};
use thiserror::Error;

/// The segment delimiter of a [`RecordKey`].
pub const KEY_DELIMITER: char = '/';

/// A validated hierarchical record key.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display)]
pub struct RecordKey(String);

/// An invalid record key.
#[derive(Debug, From, Error)]
#[error("invalid record key {0}")]
pub struct RecordKeyError(String);

impl RecordKey {
    /// Create a new record key from `key`.
    ///
    /// # Errors
    ///
    /// Returns [`RecordKeyError`] if `key` is not valid according to
    /// [`RecordKey::validate()`].
    pub fn new(key: impl Into<String>) -> Result<Self, RecordKeyError> {
        let key = key.into();
        if Self::validate(&key) {
            Ok(Self(key))
        } else {
            Err(RecordKeyError(key))
        }
    }

    /// Extracts a string slice of the underlying key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validates a key:
    /// - a key is a non-empty string,
    /// - it must not start or end with the delimiter,
    /// - every delimiter-separated segment is non-empty and is not a
    ///   filesystem traversal component (`.` or `..`).
    #[must_use]
    pub fn validate(key: &str) -> bool {
        !key.is_empty()
            && !key.starts_with(KEY_DELIMITER)
            && !key.ends_with(KEY_DELIMITER)
            && key
                .split(KEY_DELIMITER)
                .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
    }

    /// Returns the key of the numbered entry `index` under this key.
    #[must_use]
    pub fn entry(&self, index: u64) -> Self {
        Self(format!("{}{KEY_DELIMITER}{index}", self.0))
    }

    /// Returns the key of the field `field` under this key.
    ///
    /// # Errors
    ///
    /// Returns [`RecordKeyError`] if `field` is not a valid single segment.
    pub fn field(&self, field: &str) -> Result<Self, RecordKeyError> {
        if field.contains(KEY_DELIMITER) || !Self::validate(field) {
            return Err(RecordKeyError(field.to_string()));
        }
        Ok(Self(format!("{}{KEY_DELIMITER}{field}", self.0)))
    }

    /// Returns the key as a prefix string terminated by the delimiter.
    #[must_use]
    pub fn to_prefix(&self) -> String {
        format!("{}{KEY_DELIMITER}", self.0)
    }
}

impl TryFrom<&str> for RecordKey {
    type Error = RecordKeyError;

    fn try_from(key: &str) -> Result<Self, Self::Error> {
        Self::new(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_key() {
        assert!(RecordKey::new("a").is_ok());
        assert!(RecordKey::new("train/loss").is_ok());
        assert_eq!(RecordKey::new("train/loss").unwrap().to_string(), "train/loss");
        assert!(RecordKey::new("").is_err());
        assert!(RecordKey::new("/a").is_err());
        assert!(RecordKey::new("a/").is_err());
        assert!(RecordKey::new("a//b").is_err());
        assert!(RecordKey::new("a/../b").is_err());
        assert_eq!(
            RecordKey::new("a/").unwrap_err().to_string(),
            "invalid record key a/"
        );
    }

    #[test]
    fn record_key_children() {
        let key = RecordKey::new("train/loss").unwrap();
        assert_eq!(key.entry(3).as_str(), "train/loss/3");
        assert_eq!(key.field("grad").unwrap().as_str(), "train/loss/grad");
        assert!(key.field("a/b").is_err());
        assert_eq!(key.to_prefix(), "train/loss/");
    }
}
