//! The in-memory baseline backend.

use std::{collections::BTreeMap, sync::Mutex};

use crate::{
    key::RecordKey,
    record::{Record, RecordValue},
    store::{Store, StoreError},
};

#[derive(Clone, Debug)]
enum MemoryRecord {
    Value(RecordValue),
    Sequence(Vec<RecordValue>),
}

/// A store that keeps everything in process memory.
///
/// The baseline for the [`Store`] contract: `set` overwrites, `append`
/// accumulates an ordered sequence, absent keys read back as no value.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<BTreeMap<String, MemoryRecord>>,
    closed: bool,
}

impl MemoryStore {
    /// Create a new empty memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn check_open(&self) -> Result<(), StoreError> {
        if self.closed {
            Err(StoreError::NotConnected)
        } else {
            Ok(())
        }
    }
}

impl Store for MemoryStore {
    fn connect(&mut self) -> Result<(), StoreError> {
        self.check_open()
    }

    fn set(&mut self, key: &str, value: &RecordValue) -> Result<(), StoreError> {
        self.check_open()?;
        let key = RecordKey::new(key)?;
        let mut data = self.data.lock().unwrap();
        data.insert(key.as_str().to_string(), MemoryRecord::Value(value.clone()));
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Record>, StoreError> {
        self.check_open()?;
        let key = RecordKey::new(key)?;
        let data = self.data.lock().unwrap();
        Ok(data.get(key.as_str()).map(|record| match record {
            MemoryRecord::Value(value) => Record::Value(value.clone()),
            MemoryRecord::Sequence(values) => Record::Sequence(values.clone()),
        }))
    }

    fn append(&mut self, key: &str, value: &RecordValue) -> Result<(), StoreError> {
        self.check_open()?;
        let key = RecordKey::new(key)?;
        let mut data = self.data.lock().unwrap();
        match data
            .entry(key.as_str().to_string())
            .or_insert_with(|| MemoryRecord::Sequence(Vec::new()))
        {
            MemoryRecord::Sequence(values) => {
                values.push(value.clone());
                Ok(())
            }
            MemoryRecord::Value(_) => Err(StoreError::WrongKeyType {
                key: key.as_str().to_string(),
                kind: "single value".to_string(),
            }),
        }
    }

    fn get_all(&self, key: &str) -> Result<Record, StoreError> {
        self.check_open()?;
        let key = RecordKey::new(key)?;
        let data = self.data.lock().unwrap();
        match data.get(key.as_str()) {
            None => Ok(Record::Sequence(Vec::new())),
            Some(MemoryRecord::Sequence(values)) => Ok(Record::Sequence(values.clone())),
            Some(MemoryRecord::Value(_)) => Err(StoreError::WrongKeyType {
                key: key.as_str().to_string(),
                kind: "single value".to_string(),
            }),
        }
    }

    fn close(&mut self) -> Result<(), StoreError> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_overwrites() {
        let mut store = MemoryStore::new();
        store.set("a/b", &RecordValue::Int(1)).unwrap();
        store.set("a/b", &RecordValue::Int(2)).unwrap();
        let Some(Record::Value(value)) = store.get("a/b").unwrap() else {
            panic!("expected a single value");
        };
        assert_eq!(value, RecordValue::Int(2));
    }

    #[test]
    fn append_accumulates_in_order() {
        let mut store = MemoryStore::new();
        for i in 0..5 {
            store.append("seq", &RecordValue::Int(i)).unwrap();
        }
        let values = store.get_all("seq").unwrap().values().unwrap();
        assert_eq!(
            values,
            (0..5).map(RecordValue::Int).collect::<Vec<_>>()
        );
    }

    #[test]
    fn absent_key_is_no_value() {
        let store = MemoryStore::new();
        assert!(store.get("missing").unwrap().is_none());
        assert!(store
            .get_all("missing")
            .unwrap()
            .values()
            .unwrap()
            .is_empty());
    }

    #[test]
    fn append_to_set_key_is_wrong_type() {
        let mut store = MemoryStore::new();
        store.set("k", &RecordValue::Int(1)).unwrap();
        assert!(matches!(
            store.append("k", &RecordValue::Int(2)),
            Err(StoreError::WrongKeyType { .. })
        ));
    }

    #[test]
    fn closed_store_rejects_calls() {
        let mut store = MemoryStore::new();
        store.close().unwrap();
        assert!(matches!(
            store.get("a"),
            Err(StoreError::NotConnected)
        ));
    }
}
