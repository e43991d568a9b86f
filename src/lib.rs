//! A uniform recording abstraction for append-heavy scientific datasets.
//!
//! Long-running experiments emit values under hierarchical string keys:
//! per-step numeric arrays of one fixed shape, scalar metrics, and
//! configuration mappings. This crate stores them behind one small contract,
//! the [`Store`](crate::store::Store) trait, with interchangeable backends:
//!
//! - [`ChunkedStore`](crate::store::chunked::ChunkedStore): a local directory
//!   of chunked array datasets, where repeated array appends under one key
//!   grow a single dataset along a fresh leading axis and read back without
//!   materializing every row.
//! - [`KvStore`](crate::store::kv::KvStore): a client of the bundled
//!   networked KV engine, [`KvServer`](crate::store::kv::KvServer), for
//!   recording across processes or hosts.
//! - [`MemoryStore`](crate::store::memory::MemoryStore): an in-process
//!   baseline.
//!
//! A [`Recorder`](crate::recorder::Recorder) fans writes out over several
//! backends at once.
//!
//! ## Example
//!
//! ```
//! use simrec::record::RecordValue;
//! use simrec::recorder::Recorder;
//! use simrec::store::{memory::MemoryStore, Store};
//!
//! # fn main() -> Result<(), simrec::store::StoreError> {
//! let stores: Vec<Box<dyn Store>> = vec![Box::new(MemoryStore::new())];
//! let mut recorder = Recorder::new(stores)?;
//! recorder.record("train/loss", &RecordValue::Float(0.25), None)?;
//! recorder.record("train/loss", &RecordValue::Float(0.20), None)?;
//! let losses = recorder.get_all("train/loss", None)?.values()?;
//! assert_eq!(losses.len(), 2);
//! recorder.close()?;
//! # Ok(())
//! # }
//! ```

#![warn(unused_variables)]
#![warn(dead_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod chunk_plan;
pub mod codec;
pub mod config;
pub mod key;
pub mod record;
pub mod recorder;
pub mod store;
