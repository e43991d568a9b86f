//! Record values and read results.

use std::collections::BTreeMap;

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use crate::store::{chunked::ArrayRows, StoreError};

/// A value recordable under a key.
///
/// Covers numeric arrays, strings, mappings, and sequences thereof, which is
/// the domain over which the serialization codec round-trip law holds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RecordValue {
    /// An N-dimensional `f32` array.
    Array(ArrayD<f32>),
    /// A double-precision float.
    Float(f64),
    /// A signed integer.
    Int(i64),
    /// A UTF-8 string.
    Text(String),
    /// An opaque byte string.
    Bytes(Vec<u8>),
    /// An ordered sequence of values.
    Seq(Vec<RecordValue>),
    /// A string-keyed mapping of values.
    Map(BTreeMap<String, RecordValue>),
}

impl RecordValue {
    /// Returns the array if this value is an [`RecordValue::Array`].
    #[must_use]
    pub fn as_array(&self) -> Option<&ArrayD<f32>> {
        match self {
            Self::Array(array) => Some(array),
            _ => None,
        }
    }
}

impl From<ArrayD<f32>> for RecordValue {
    fn from(array: ArrayD<f32>) -> Self {
        Self::Array(array)
    }
}

impl From<f64> for RecordValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<i64> for RecordValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for RecordValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// The unit of storage retrieved from a backend under one key.
#[derive(Debug)]
pub enum Record {
    /// A single value stored with `set`, or a mapping reassembled from its
    /// per-field sub-records.
    Value(RecordValue),
    /// An array accumulator: a lazy, restartable, indexable handle over the
    /// rows of a growing dataset.
    Rows(ArrayRows),
    /// A materialized scalar sequence in append order.
    Sequence(Vec<RecordValue>),
}

impl Record {
    /// Materialize the record into a sequence of values in append order.
    ///
    /// Accumulator rows are read into [`RecordValue::Array`] elements; a
    /// single value becomes a one-element sequence.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if reading accumulator rows fails.
    pub fn values(self) -> Result<Vec<RecordValue>, StoreError> {
        match self {
            Self::Value(value) => Ok(vec![value]),
            Self::Sequence(values) => Ok(values),
            Self::Rows(rows) => rows
                .iter()
                .map(|row| row.map(RecordValue::Array))
                .collect(),
        }
    }
}
