//! The recorder front end.
//!
//! A [`Recorder`] owns an ordered collection of backends behind the
//! [`Store`] trait and fans writes out to all of them (or to one selected by
//! position). Reads come from one backend. Failure policy is at-most-once:
//! the first failing backend aborts the operation, backends earlier in the
//! order have already seen the write, and later ones have not. There is no
//! rollback and no retry.

use crate::{
    record::{Record, RecordValue},
    store::{Store, StoreError},
};

/// The position of the backend reads default to.
const DEFAULT_BACKEND: usize = 0;

/// A fan-out front end over an ordered collection of [`Store`] backends.
pub struct Recorder {
    stores: Vec<Box<dyn Store>>,
}

impl Recorder {
    /// Create a recorder over `stores`, connecting each in order.
    ///
    /// # Errors
    ///
    /// Returns the first connection error; backends earlier in the order are
    /// left connected.
    pub fn new(mut stores: Vec<Box<dyn Store>>) -> Result<Self, StoreError> {
        for store in &mut stores {
            store.connect()?;
        }
        Ok(Self { stores })
    }

    /// The number of backends.
    #[must_use]
    pub fn num_stores(&self) -> usize {
        self.stores.len()
    }

    fn backend(&self, index: Option<usize>) -> Result<&dyn Store, StoreError> {
        let index = index.unwrap_or(DEFAULT_BACKEND);
        self.stores
            .get(index)
            .map(AsRef::as_ref)
            .ok_or_else(|| StoreError::Other(format!("no backend at position {index}")))
    }

    fn targets(
        &mut self,
        index: Option<usize>,
    ) -> Result<impl Iterator<Item = &mut Box<dyn Store>>, StoreError> {
        if let Some(index) = index {
            if index >= self.stores.len() {
                return Err(StoreError::Other(format!(
                    "no backend at position {index}"
                )));
            }
            Ok(self.stores[index..=index].iter_mut())
        } else {
            Ok(self.stores[..].iter_mut())
        }
    }

    /// Append `value` under `key` on every backend, or on the backend at
    /// `store` only.
    ///
    /// # Errors
    ///
    /// Returns the first backend's error; preceding backends have recorded
    /// the value, following ones have not.
    pub fn record(
        &mut self,
        key: &str,
        value: &RecordValue,
        store: Option<usize>,
    ) -> Result<(), StoreError> {
        for target in self.targets(store)? {
            target.append(key, value)?;
        }
        Ok(())
    }

    /// Store a single value under `key` on every backend, or on the backend
    /// at `store` only. Overwrites any value previously set under the key.
    ///
    /// # Errors
    ///
    /// Returns the first backend's error; preceding backends have stored the
    /// value, following ones have not.
    pub fn set(
        &mut self,
        key: &str,
        value: &RecordValue,
        store: Option<usize>,
    ) -> Result<(), StoreError> {
        for target in self.targets(store)? {
            target.set(key, value)?;
        }
        Ok(())
    }

    /// Get the record under `key` from the backend at `store`, defaulting to
    /// the first backend.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the position is out of range or the read
    /// fails.
    pub fn get(&self, key: &str, store: Option<usize>) -> Result<Option<Record>, StoreError> {
        self.backend(store)?.get(key)
    }

    /// Get everything recorded under `key` from the backend at `store`,
    /// defaulting to the first backend.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the position is out of range or the read
    /// fails.
    pub fn get_all(&self, key: &str, store: Option<usize>) -> Result<Record, StoreError> {
        self.backend(store)?.get_all(key)
    }

    /// Close every backend in insertion order.
    ///
    /// # Errors
    ///
    /// Returns the first close error; following backends are left open.
    pub fn close(&mut self) -> Result<(), StoreError> {
        for store in &mut self.stores {
            store.close()?;
        }
        Ok(())
    }
}
