use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use super::{KeyValueStore, WriteMode, write_atomically};
use crate::error::{StorageError, StorageResult};

const PREFERENCES_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct PreferencesDocument {
    version: u32,
    entries: BTreeMap<String, String>,
}

/// Preferences-style store backed by a single JSON document.
///
/// Every mutation is written through; `synchronize` re-writes the document
/// with an fsync before returning.
#[derive(Debug)]
pub struct FileKeyValueStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl FileKeyValueStore {
    pub fn open(path: PathBuf) -> Self {
        let entries = load_entries(&path);
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> StorageResult<std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.entries
            .lock()
            .map_err(|_| StorageError::LockPoisoned("file_store.entries"))
    }

    fn flush(&self, entries: &BTreeMap<String, Vec<u8>>, durable: bool) -> StorageResult<()> {
        let document = PreferencesDocument {
            version: PREFERENCES_SCHEMA_VERSION,
            entries: entries
                .iter()
                .map(|(key, value)| (key.clone(), STANDARD.encode(value)))
                .collect(),
        };
        let payload = serde_json::to_vec_pretty(&document)
            .map_err(|error| StorageError::Encode(error.to_string()))?;
        write_atomically(
            &self.path,
            &payload,
            WriteMode {
                durable,
                private: true,
            },
        )
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        let mut entries = self.lock()?;
        let mut next = entries.clone();
        next.insert(key.to_string(), value.to_vec());
        self.flush(&next, false)?;
        *entries = next;
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let mut entries = self.lock()?;
        if !entries.contains_key(key) {
            return Ok(());
        }
        let mut next = entries.clone();
        next.remove(key);
        self.flush(&next, false)?;
        *entries = next;
        Ok(())
    }

    fn contains(&self, key: &str) -> StorageResult<bool> {
        Ok(self.lock()?.contains_key(key))
    }

    fn synchronize(&self) -> StorageResult<()> {
        let entries = self.lock()?;
        self.flush(&entries, true)
    }
}

fn load_entries(path: &Path) -> BTreeMap<String, Vec<u8>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
        Err(error) => {
            tracing::warn!(
                target: "trusenda.substrate",
                path = %path.display(),
                error = %error,
                "failed to read preferences; booting with empty store",
            );
            return BTreeMap::new();
        }
    };

    let document = match serde_json::from_str::<PreferencesDocument>(&raw) {
        Ok(document) if document.version == PREFERENCES_SCHEMA_VERSION => document,
        Ok(document) => {
            tracing::warn!(
                target: "trusenda.substrate",
                path = %path.display(),
                version = document.version,
                "unsupported preferences version; booting with empty store",
            );
            return BTreeMap::new();
        }
        Err(error) => {
            tracing::warn!(
                target: "trusenda.substrate",
                path = %path.display(),
                error = %error,
                "failed to parse preferences; booting with empty store",
            );
            return BTreeMap::new();
        }
    };

    document
        .entries
        .into_iter()
        .filter_map(|(key, encoded)| match STANDARD.decode(encoded.as_bytes()) {
            Ok(value) => Some((key, value)),
            Err(error) => {
                tracing::warn!(
                    target: "trusenda.substrate",
                    key = %key,
                    error = %error,
                    "dropping undecodable preferences entry",
                );
                None
            }
        })
        .collect()
}
