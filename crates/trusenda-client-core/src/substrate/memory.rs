use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use zeroize::Zeroizing;

use super::{KeyValueStore, SecureStore};
use crate::error::{StorageError, StorageResult};

/// Process-local store with write-failure injection.
#[derive(Debug, Default)]
pub struct InMemoryKeyValueStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
    synchronize_calls: AtomicUsize,
}

impl InMemoryKeyValueStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `set`/`remove` fail with a persistence error.
    pub fn fail_writes(&self, enabled: bool) {
        self.fail_writes.store(enabled, Ordering::SeqCst);
    }

    pub fn synchronize_calls(&self) -> usize {
        self.synchronize_calls.load(Ordering::SeqCst)
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Persistence {
                message: "in-memory store rejected write".to_string(),
            });
        }
        Ok(())
    }
}

impl KeyValueStore for InMemoryKeyValueStore {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| StorageError::LockPoisoned("in_memory.entries"))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.check_writable()?;
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StorageError::LockPoisoned("in_memory.entries"))?;
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.check_writable()?;
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StorageError::LockPoisoned("in_memory.entries"))?;
        entries.remove(key);
        Ok(())
    }

    fn synchronize(&self) -> StorageResult<()> {
        self.synchronize_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Keychain stand-in for tests. Secrets are wiped on drop.
#[derive(Debug, Default)]
pub struct InMemorySecureStore {
    items: Mutex<BTreeMap<(String, String), Zeroizing<Vec<u8>>>>,
    fail_writes: AtomicBool,
}

impl InMemorySecureStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `add` fail, as a locked device keychain would.
    pub fn fail_writes(&self, enabled: bool) {
        self.fail_writes.store(enabled, Ordering::SeqCst);
    }

    /// Overwrite an item without the add/delete protocol.
    pub fn inject(&self, service: &str, account: &str, secret: &[u8]) {
        let mut items = self
            .items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        items.insert(
            (service.to_string(), account.to_string()),
            Zeroizing::new(secret.to_vec()),
        );
    }

    pub fn len(&self) -> usize {
        self.items
            .lock()
            .map(|items| items.len())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SecureStore for InMemorySecureStore {
    fn add(&self, service: &str, account: &str, secret: &[u8]) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Persistence {
                message: "secure store interaction not allowed".to_string(),
            });
        }
        let mut items = self
            .items
            .lock()
            .map_err(|_| StorageError::LockPoisoned("in_memory_secure.items"))?;
        let key = (service.to_string(), account.to_string());
        if items.contains_key(&key) {
            return Err(StorageError::DuplicateItem);
        }
        items.insert(key, Zeroizing::new(secret.to_vec()));
        Ok(())
    }

    fn copy_matching(&self, service: &str, account: &str) -> StorageResult<Vec<u8>> {
        let items = self
            .items
            .lock()
            .map_err(|_| StorageError::LockPoisoned("in_memory_secure.items"))?;
        items
            .get(&(service.to_string(), account.to_string()))
            .map(|secret| secret.to_vec())
            .ok_or(StorageError::ItemNotFound)
    }

    fn delete(&self, service: &str, account: &str) -> StorageResult<()> {
        let mut items = self
            .items
            .lock()
            .map_err(|_| StorageError::LockPoisoned("in_memory_secure.items"))?;
        items
            .remove(&(service.to_string(), account.to_string()))
            .map(|_| ())
            .ok_or(StorageError::ItemNotFound)
    }
}
