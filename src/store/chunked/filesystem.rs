//! The byte-level keyed file substrate of the chunked-array engine.
//!
//! Maps hierarchical keys to paths under a base directory and provides
//! whole-value reads and writes plus prefix listing and erasure. The dataset
//! layer above dictates the naming convention; this layer only moves bytes.

use std::{
    fs::{File, OpenOptions},
    io::{Read, Write},
    path::{Path, PathBuf},
};

use walkdir::WalkDir;

use crate::store::StoreError;

#[derive(Debug)]
pub(crate) struct FilesystemStore {
    base_path: PathBuf,
}

impl FilesystemStore {
    /// Create a store rooted at `base_path`, creating the directory if
    /// needed.
    pub(crate) fn new<P: AsRef<Path>>(base_path: P) -> Result<Self, StoreError> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    fn key_to_path(&self, key: &str) -> PathBuf {
        let mut path = self.base_path.clone();
        for segment in key.split('/') {
            path.push(segment);
        }
        path
    }

    pub(crate) fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.key_to_path(key);
        // A directory at the path, or a file across one of its components,
        // means the key holds no value of its own.
        if !path.is_file() {
            return Ok(None);
        }
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        Ok(Some(bytes))
    }

    pub(crate) fn exists(&self, key: &str) -> bool {
        self.key_to_path(key).is_file()
    }

    pub(crate) fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let path = self.key_to_path(key);
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all(value)?;
        file.sync_all()?;
        Ok(())
    }

    pub(crate) fn erase(&self, key: &str) -> Result<(), StoreError> {
        let path = self.key_to_path(key);
        // Only a plain file is a value; a directory at the path belongs to
        // the prefix namespace and is handled by `erase_prefix`.
        if !path.is_file() {
            return Ok(());
        }
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub(crate) fn erase_prefix(&self, prefix: &str) -> Result<(), StoreError> {
        let path = self.key_to_path(prefix.trim_end_matches('/'));
        if !path.is_dir() {
            return Ok(());
        }
        match std::fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// List the keys below `prefix`, relative to it, sorted by name.
    pub(crate) fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let root = self.key_to_path(prefix.trim_end_matches('/'));
        if !root.is_dir() {
            return Ok(Vec::new());
        }
        let mut keys: Vec<String> = WalkDir::new(&root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| {
                entry.path().strip_prefix(&root).ok().map(|relative| {
                    relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect::<Vec<_>>()
                        .join("/")
                })
            })
            .collect();
        keys.sort();
        Ok(keys)
    }
}
