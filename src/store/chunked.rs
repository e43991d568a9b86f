//! The chunked-array backend.
//!
//! A [`Store`] over a file-backed chunked dataset engine. Arrays appended
//! under a key accumulate into one dataset whose leading axis grows by one
//! slice per append, with chunk geometry planned once at first append from
//! the configured byte budget. Non-array appends become numbered entries
//! `key/0`, `key/1`, ...; `set` with a mapping writes one sub-record per
//! field at `key/<field>` with overwrite semantics.

mod dataset;
mod filesystem;

pub use dataset::{ArrayRows, RowIter};

use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex},
};

use crate::{
    chunk_plan::{plan_chunk_shape, DEFAULT_CHUNK_BUDGET_BYTES},
    codec::serialization::Serializer,
    config::SerializationFormat,
    key::RecordKey,
    record::{Record, RecordValue},
    store::{Store, StoreError},
};

use dataset::Dataset;
use filesystem::FilesystemStore;

/// A store over a file-backed chunked array engine.
#[derive(Debug)]
pub struct ChunkedStore {
    fs: Arc<FilesystemStore>,
    chunk_budget_bytes: u64,
    // Next entry index per scalar-sequence key, resumed lazily from disk.
    counters: Mutex<HashMap<String, u64>>,
    serializer: Serializer,
    closed: bool,
}

impl ChunkedStore {
    /// Open or create a chunked store rooted at `data_directory` with the
    /// [default chunk budget](DEFAULT_CHUNK_BUDGET_BYTES).
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the directory cannot be created.
    pub fn new<P: AsRef<Path>>(data_directory: P) -> Result<Self, StoreError> {
        Self::with_chunk_budget(data_directory, DEFAULT_CHUNK_BUDGET_BYTES)
    }

    /// Open or create a chunked store with an explicit chunk byte budget.
    ///
    /// A budget of `0` delegates chunk geometry to the engine default (one
    /// whole slice per chunk).
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the directory cannot be created.
    pub fn with_chunk_budget<P: AsRef<Path>>(
        data_directory: P,
        chunk_budget_bytes: u64,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            fs: Arc::new(FilesystemStore::new(data_directory)?),
            chunk_budget_bytes,
            counters: Mutex::default(),
            serializer: Serializer::new(SerializationFormat::Packed),
            closed: false,
        })
    }

    fn check_open(&self) -> Result<(), StoreError> {
        if self.closed {
            Err(StoreError::NotConnected)
        } else {
            Ok(())
        }
    }

    /// Direct children of `key` (single-segment relative names only).
    fn children(&self, key: &RecordKey) -> Result<Vec<String>, StoreError> {
        Ok(self
            .fs
            .list_prefix(&key.to_prefix())?
            .into_iter()
            .filter(|name| !name.contains('/'))
            .collect())
    }

    fn next_entry_index(&self, key: &RecordKey) -> Result<u64, StoreError> {
        let mut counters = self.counters.lock().unwrap();
        let next = match counters.get(key.as_str()) {
            Some(&next) => next,
            None => self
                .children(key)?
                .iter()
                .filter_map(|name| name.parse::<u64>().ok())
                .max()
                .map_or(0, |max| max + 1),
        };
        counters.insert(key.as_str().to_string(), next + 1);
        Ok(next)
    }

    fn append_array(&mut self, key: &RecordKey, array: &ndarray::ArrayD<f32>) -> Result<(), StoreError> {
        if let Some(mut dataset) = Dataset::open(&self.fs, key)? {
            let actual: Vec<u64> = array.shape().iter().map(|&d| d as u64).collect();
            if actual != dataset.slice_shape() {
                return Err(StoreError::ShapeMismatch {
                    key: key.as_str().to_string(),
                    expected: dataset.slice_shape().to_vec(),
                    actual,
                });
            }
            return dataset.append(array);
        }
        if self.fs.exists(key.as_str()) || !self.children(key)?.is_empty() {
            return Err(StoreError::WrongKeyType {
                key: key.as_str().to_string(),
                kind: "non-accumulator".to_string(),
            });
        }
        let slice_shape: Vec<u64> = array.shape().iter().map(|&d| d as u64).collect();
        let geometry = plan_chunk_shape(&slice_shape, self.chunk_budget_bytes);
        Dataset::create(&self.fs, key, array, &geometry)?;
        Ok(())
    }

    fn append_entry(&mut self, key: &RecordKey, value: &RecordValue) -> Result<(), StoreError> {
        if let Some(dataset) = Dataset::open(&self.fs, key)? {
            return Err(StoreError::ShapeMismatch {
                key: key.as_str().to_string(),
                expected: dataset.slice_shape().to_vec(),
                actual: Vec::new(),
            });
        }
        if self.fs.exists(key.as_str()) {
            return Err(StoreError::WrongKeyType {
                key: key.as_str().to_string(),
                kind: "single value".to_string(),
            });
        }
        let index = self.next_entry_index(key)?;
        self.fs
            .set(key.entry(index).as_str(), &self.serializer.encode(value)?)
    }

    fn decode_child(&self, key: &RecordKey, name: &str) -> Result<RecordValue, StoreError> {
        let child = key.field(name)?;
        let bytes = self.fs.get(child.as_str())?.ok_or_else(|| {
            StoreError::Other(format!("entry {child} vanished during read"))
        })?;
        Ok(self.serializer.decode(&bytes)?)
    }

    /// Read the scalar sequence under `key`, sorted by numeric suffix.
    fn read_sequence(
        &self,
        key: &RecordKey,
        names: &[String],
    ) -> Result<Vec<RecordValue>, StoreError> {
        let mut indexed: Vec<(u64, &String)> = names
            .iter()
            .filter_map(|name| name.parse::<u64>().ok().map(|index| (index, name)))
            .collect();
        indexed.sort_unstable_by_key(|&(index, _)| index);
        indexed
            .into_iter()
            .map(|(_, name)| self.decode_child(key, name))
            .collect()
    }

    fn read_mapping(
        &self,
        key: &RecordKey,
        names: &[String],
    ) -> Result<RecordValue, StoreError> {
        let mut map = std::collections::BTreeMap::new();
        for name in names {
            map.insert(name.clone(), self.decode_child(key, name)?);
        }
        Ok(RecordValue::Map(map))
    }
}

impl Store for ChunkedStore {
    fn connect(&mut self) -> Result<(), StoreError> {
        self.check_open()
    }

    fn set(&mut self, key: &str, value: &RecordValue) -> Result<(), StoreError> {
        self.check_open()?;
        let key = RecordKey::new(key)?;
        // Last write wins: drop whatever the key held before.
        self.fs.erase(key.as_str())?;
        self.fs.erase_prefix(&key.to_prefix())?;
        self.counters.lock().unwrap().remove(key.as_str());
        match value {
            RecordValue::Map(fields) => {
                for (field, field_value) in fields {
                    self.fs.set(
                        key.field(field)?.as_str(),
                        &self.serializer.encode(field_value)?,
                    )?;
                }
                Ok(())
            }
            other => self.fs.set(key.as_str(), &self.serializer.encode(other)?),
        }
    }

    fn get(&self, key: &str) -> Result<Option<Record>, StoreError> {
        self.check_open()?;
        let key = RecordKey::new(key)?;
        if let Some(bytes) = self.fs.get(key.as_str())? {
            return Ok(Some(Record::Value(self.serializer.decode(&bytes)?)));
        }
        if let Some(dataset) = Dataset::open(&self.fs, &key)? {
            return Ok(Some(Record::Rows(dataset.rows())));
        }
        let names = self.children(&key)?;
        if names.is_empty() {
            return Ok(None);
        }
        if names.iter().all(|name| name.parse::<u64>().is_ok()) {
            return Ok(Some(Record::Sequence(self.read_sequence(&key, &names)?)));
        }
        Ok(Some(Record::Value(self.read_mapping(&key, &names)?)))
    }

    fn append(&mut self, key: &str, value: &RecordValue) -> Result<(), StoreError> {
        self.check_open()?;
        let key = RecordKey::new(key)?;
        match value {
            RecordValue::Array(array) => self.append_array(&key, array),
            other => self.append_entry(&key, other),
        }
    }

    fn get_all(&self, key: &str) -> Result<Record, StoreError> {
        self.check_open()?;
        let key = RecordKey::new(key)?;
        if let Some(dataset) = Dataset::open(&self.fs, &key)? {
            return Ok(Record::Rows(dataset.rows()));
        }
        if self.fs.exists(key.as_str()) {
            return Err(StoreError::WrongKeyType {
                key: key.as_str().to_string(),
                kind: "single value".to_string(),
            });
        }
        let names = self.children(&key)?;
        if names.is_empty() {
            return Ok(Record::Sequence(Vec::new()));
        }
        if names.iter().all(|name| name.parse::<u64>().is_ok()) {
            return Ok(Record::Sequence(self.read_sequence(&key, &names)?));
        }
        Err(StoreError::WrongKeyType {
            key: key.as_str().to_string(),
            kind: "mapping".to_string(),
        })
    }

    fn close(&mut self) -> Result<(), StoreError> {
        // Writes are flushed eagerly; closing only invalidates the handle.
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{ArrayD, IxDyn};

    use super::*;

    fn array(shape: &[usize], offset: f32) -> RecordValue {
        let len: usize = shape.iter().product();
        RecordValue::Array(
            ArrayD::from_shape_vec(IxDyn(shape), (0..len).map(|i| offset + i as f32).collect())
                .unwrap(),
        )
    }

    #[test]
    fn shape_mismatch_is_fatal_per_key() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut store = ChunkedStore::new(dir.path()).unwrap();
        store.append("acc", &array(&[4, 2], 0.0)).unwrap();
        assert!(matches!(
            store.append("acc", &array(&[4, 3], 0.0)),
            Err(StoreError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            store.append("acc", &RecordValue::Int(1)),
            Err(StoreError::ShapeMismatch { .. })
        ));
        // The accumulator is untouched by the failed appends.
        let Record::Rows(rows) = store.get_all("acc").unwrap() else {
            panic!("expected rows");
        };
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn scalar_entries_are_numbered_per_key() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut store = ChunkedStore::new(dir.path()).unwrap();
        for i in 0..5 {
            store.append("log/msg", &RecordValue::Int(i)).unwrap();
        }
        store.append("other", &RecordValue::Int(99)).unwrap();

        let values = store.get_all("log/msg").unwrap().values().unwrap();
        assert_eq!(values, (0..5).map(RecordValue::Int).collect::<Vec<_>>());
        // Entries are addressable as key/0..key/4 internally.
        for i in 0..5u64 {
            assert!(store.fs.exists(&format!("log/msg/{i}")));
        }
        assert!(store.fs.exists("other/0"));
    }

    #[test]
    fn entry_counter_resumes_after_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        {
            let mut store = ChunkedStore::new(dir.path()).unwrap();
            store.append("seq", &RecordValue::Int(0)).unwrap();
            store.append("seq", &RecordValue::Int(1)).unwrap();
            store.close().unwrap();
        }
        let mut store = ChunkedStore::new(dir.path()).unwrap();
        store.append("seq", &RecordValue::Int(2)).unwrap();
        let values = store.get_all("seq").unwrap().values().unwrap();
        assert_eq!(values, (0..3).map(RecordValue::Int).collect::<Vec<_>>());
    }

    #[test]
    fn set_mapping_writes_fields_and_overwrites() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut store = ChunkedStore::new(dir.path()).unwrap();
        let mut fields = std::collections::BTreeMap::new();
        fields.insert("weights".to_string(), array(&[2, 2], 0.0));
        fields.insert("bias".to_string(), array(&[2], 0.0));
        store.set("model", &RecordValue::Map(fields.clone())).unwrap();
        assert!(store.fs.exists("model/weights"));
        assert!(store.fs.exists("model/bias"));

        fields.insert("bias".to_string(), array(&[2], 7.0));
        store.set("model", &RecordValue::Map(fields.clone())).unwrap();
        let Some(Record::Value(RecordValue::Map(read))) = store.get("model").unwrap() else {
            panic!("expected a mapping");
        };
        assert_eq!(RecordValue::Map(read), RecordValue::Map(fields));
    }

    #[test]
    fn set_switches_between_value_and_mapping() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut store = ChunkedStore::new(dir.path()).unwrap();
        store.set("k", &RecordValue::Int(1)).unwrap();

        let mut fields = std::collections::BTreeMap::new();
        fields.insert("a".to_string(), RecordValue::Int(2));
        store.set("k", &RecordValue::Map(fields.clone())).unwrap();
        let Some(Record::Value(read)) = store.get("k").unwrap() else {
            panic!("expected a mapping");
        };
        assert_eq!(read, RecordValue::Map(fields));

        store.set("k", &RecordValue::Int(3)).unwrap();
        let Some(Record::Value(read)) = store.get("k").unwrap() else {
            panic!("expected a single value");
        };
        assert_eq!(read, RecordValue::Int(3));
    }

    #[test]
    fn append_after_set_is_wrong_type() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut store = ChunkedStore::new(dir.path()).unwrap();
        store.set("k", &RecordValue::Int(1)).unwrap();
        assert!(matches!(
            store.append("k", &RecordValue::Int(2)),
            Err(StoreError::WrongKeyType { .. })
        ));
        assert!(matches!(
            store.append("k", &array(&[2], 0.0)),
            Err(StoreError::WrongKeyType { .. })
        ));
        // The stored value is untouched by the rejected appends.
        let Some(Record::Value(value)) = store.get("k").unwrap() else {
            panic!("expected a single value");
        };
        assert_eq!(value, RecordValue::Int(1));
    }

    #[test]
    fn get_absent_is_none() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = ChunkedStore::new(dir.path()).unwrap();
        assert!(store.get("nope").unwrap().is_none());
        assert!(store
            .get_all("nope")
            .unwrap()
            .values()
            .unwrap()
            .is_empty());
    }
}
