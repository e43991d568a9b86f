//! The store abstraction and its concrete backends.
//!
//! Every backend implements the [`Store`] contract:
//! [`connect`](Store::connect), [`set`](Store::set), [`get`](Store::get),
//! [`append`](Store::append), [`get_all`](Store::get_all), and
//! [`close`](Store::close). Append semantics are uniform across backends:
//! array values of matching shape are accumulated into one growing dataset
//! per key, while scalar/object values are stored as independent numbered
//! entries. A [`Recorder`](crate::recorder::Recorder) composes backends
//! through this trait and never downcasts.

pub mod chunked;
pub mod kv;
pub mod memory;

use thiserror::Error;

use crate::{
    codec::CodecError,
    key::RecordKeyError,
    record::{Record, RecordValue},
};

/// A store error.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A backend process is already bound to the configured port. Fatal and
    /// not retried; the caller must choose a different port or stop the
    /// existing process.
    #[error("a backend is already running on port {0}")]
    AlreadyRunning(u16),
    /// A read was attempted before the backend configuration exists. The
    /// backend must be started before any client connects.
    #[error("the backend at {0} has not been initialized: no client configuration found (was the server started?)")]
    UninitializedBackend(String),
    /// An array append does not match the established accumulator geometry.
    /// There is no automatic reshape.
    #[error("shape mismatch appending to {key}: accumulator expects {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// The accumulator key.
        key: String,
        /// The slice shape established at dataset creation.
        expected: Vec<u64>,
        /// The offending shape (empty for a non-array append).
        actual: Vec<u64>,
    },
    /// The operation does not apply to the kind of record stored under the
    /// key.
    #[error("{key} holds a {kind} record, which this operation does not apply to")]
    WrongKeyType {
        /// The key.
        key: String,
        /// The kind of record found under the key.
        kind: String,
    },
    /// The backend is not connected (never connected, or already closed).
    #[error("the backend is not connected")]
    NotConnected,
    /// The key is reserved for backend configuration.
    #[error("{0} is a reserved configuration key")]
    ReservedKey(String),
    /// An invalid record key.
    #[error(transparent)]
    InvalidRecordKey(#[from] RecordKeyError),
    /// Stored metadata for a key could not be parsed.
    #[error("invalid metadata for {0}: {1}")]
    InvalidMetadata(String, String),
    /// A codec error (serialization or compression).
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// An IO error.
    #[error(transparent)]
    IOError(#[from] std::io::Error),
    /// A wire protocol violation reported by or about the networked backend.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Any other error.
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Other(err.to_string())
    }
}

/// The common contract implemented by every backend.
///
/// All calls are synchronous and may block on disk or network IO; none are
/// cancellable once issued and none are retried internally. One store
/// instance assumes a single writer; concurrent callers on one instance are
/// not supported.
pub trait Store {
    /// Connect to the underlying engine, if the backend requires it.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the connection cannot be established or
    /// the backend configuration cannot be read.
    fn connect(&mut self) -> Result<(), StoreError>;

    /// Store a single value under `key`. Calling this repeatedly with the
    /// same key overwrites the value; there is no accumulation.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the key is invalid or the write fails.
    fn set(&mut self, key: &str, value: &RecordValue) -> Result<(), StoreError>;

    /// Get the record stored under `key`.
    ///
    /// An absent key is `Ok(None)`, never an error.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the key is invalid or the read fails.
    fn get(&self, key: &str) -> Result<Option<Record>, StoreError>;

    /// Append `value` under `key`.
    ///
    /// An array value grows the key's accumulator dataset by one leading-axis
    /// slice; any other value is stored as the next numbered entry of the
    /// key's scalar sequence.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShapeMismatch`] if the key holds an accumulator
    /// and `value` does not match its geometry.
    fn append(&mut self, key: &str, value: &RecordValue) -> Result<(), StoreError>;

    /// Get everything appended under `key`, in append order.
    ///
    /// An absent key yields an empty [`Record::Sequence`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WrongKeyType`] if the key holds a single value
    /// rather than an accumulator or sequence.
    fn get_all(&self, key: &str) -> Result<Record, StoreError>;

    /// Shut the backend down cleanly, flushing and releasing its handle.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the shutdown sequence fails.
    fn close(&mut self) -> Result<(), StoreError>;
}
