//! The value codec pipeline: serialization followed by compression on write,
//! and the inverse on read.

pub mod compression;
pub mod serialization;

use thiserror::Error;

/// A codec error.
#[derive(Debug, Error)]
pub enum CodecError {
    /// An IO error.
    #[error(transparent)]
    IOError(#[from] std::io::Error),
    /// Bytes presented for decoding do not match the selected algorithm's
    /// framing, or are otherwise undecodable.
    #[error("corrupt payload: {0}")]
    CorruptPayload(String),
}
