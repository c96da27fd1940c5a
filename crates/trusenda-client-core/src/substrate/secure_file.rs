use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::{SecureStore, WriteMode, write_atomically};
use crate::error::{StorageError, StorageResult};

const SECURE_STORE_SCHEMA_VERSION: u32 = 1;
const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

const SEALED_WRITE: WriteMode = WriteMode {
    durable: true,
    private: true,
};

#[derive(Debug, Serialize, Deserialize)]
struct SealedDocument {
    version: u32,
    nonce: String,
    ciphertext: String,
}

/// service -> account -> base64 secret
type SecretTable = BTreeMap<String, BTreeMap<String, String>>;

/// Keychain replacement for hosts without a platform secure store.
///
/// Items are sealed with ChaCha20-Poly1305 under a device key kept next to
/// the document with owner-only permissions. Every mutation re-seals the
/// whole table under a fresh nonce.
#[derive(Debug)]
pub struct EncryptedFileSecureStore {
    path: PathBuf,
    key_path: PathBuf,
    lock: Mutex<()>,
}

impl EncryptedFileSecureStore {
    pub fn open(path: PathBuf, key_path: PathBuf) -> Self {
        Self {
            path,
            key_path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_key(&self) -> StorageResult<Option<Zeroizing<Vec<u8>>>> {
        let key = match fs::read(&self.key_path) {
            Ok(key) => Zeroizing::new(key),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => {
                return Err(StorageError::persistence("failed to read device key", error));
            }
        };
        if key.len() != KEY_LEN {
            return Err(StorageError::Crypto(format!(
                "device key must be {KEY_LEN} bytes, found {}",
                key.len()
            )));
        }
        Ok(Some(key))
    }

    fn load_or_create_key(&self) -> StorageResult<Zeroizing<Vec<u8>>> {
        match self.load_key() {
            Ok(Some(key)) => return Ok(key),
            Ok(None) => {}
            Err(StorageError::Crypto(reason)) => {
                tracing::warn!(
                    target: "trusenda.substrate",
                    path = %self.key_path.display(),
                    reason = %reason,
                    "device key unusable; replacing it",
                );
            }
            Err(error) => return Err(error),
        }
        let key = Zeroizing::new(rand::random::<[u8; KEY_LEN]>().to_vec());
        write_atomically(&self.key_path, &key, SEALED_WRITE)?;
        tracing::info!(
            target: "trusenda.substrate",
            path = %self.key_path.display(),
            "created device key for secure store",
        );
        Ok(key)
    }

    fn read_table(&self, key: &[u8]) -> StorageResult<SecretTable> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(SecretTable::new());
            }
            Err(error) => {
                return Err(StorageError::persistence("failed to read secure store", error));
            }
        };

        let document = serde_json::from_slice::<SealedDocument>(&raw)
            .map_err(|error| StorageError::Decode(error.to_string()))?;
        if document.version != SECURE_STORE_SCHEMA_VERSION {
            return Err(StorageError::Decode(format!(
                "unsupported secure store version {}",
                document.version
            )));
        }

        let nonce = STANDARD
            .decode(document.nonce.as_bytes())
            .map_err(|error| StorageError::Decode(error.to_string()))?;
        if nonce.len() != NONCE_LEN {
            return Err(StorageError::Decode(format!(
                "nonce must be {NONCE_LEN} bytes, found {}",
                nonce.len()
            )));
        }
        let ciphertext = STANDARD
            .decode(document.ciphertext.as_bytes())
            .map_err(|error| StorageError::Decode(error.to_string()))?;

        let plaintext = Zeroizing::new(
            cipher(key)?
                .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
                .map_err(|error| StorageError::Crypto(format!("open failed: {error}")))?,
        );
        serde_json::from_slice::<SecretTable>(&plaintext)
            .map_err(|error| StorageError::Decode(error.to_string()))
    }

    /// Table for a mutation. A document that no longer opens under the
    /// device key is dropped so the store stays writable; the next write
    /// re-seals a fresh table.
    fn read_table_for_write(&self, key: &[u8]) -> StorageResult<SecretTable> {
        match self.read_table(key) {
            Err(error @ (StorageError::Decode(_) | StorageError::Crypto(_))) => {
                tracing::warn!(
                    target: "trusenda.substrate",
                    path = %self.path.display(),
                    error = %error,
                    "secure store unreadable; starting from an empty table",
                );
                Ok(SecretTable::new())
            }
            other => other,
        }
    }

    fn write_table(&self, key: &[u8], table: &SecretTable) -> StorageResult<()> {
        let plaintext = Zeroizing::new(
            serde_json::to_vec(table).map_err(|error| StorageError::Encode(error.to_string()))?,
        );
        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let ciphertext = cipher(key)?
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_slice())
            .map_err(|error| StorageError::Crypto(format!("seal failed: {error}")))?;

        let document = SealedDocument {
            version: SECURE_STORE_SCHEMA_VERSION,
            nonce: STANDARD.encode(nonce_bytes),
            ciphertext: STANDARD.encode(ciphertext),
        };
        let payload = serde_json::to_vec_pretty(&document)
            .map_err(|error| StorageError::Encode(error.to_string()))?;
        write_atomically(&self.path, &payload, SEALED_WRITE)
    }
}

impl SecureStore for EncryptedFileSecureStore {
    fn add(&self, service: &str, account: &str, secret: &[u8]) -> StorageResult<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| StorageError::LockPoisoned("secure_file.lock"))?;
        let key = self.load_or_create_key()?;
        let mut table = self.read_table_for_write(&key)?;

        let accounts = table.entry(service.to_string()).or_default();
        if accounts.contains_key(account) {
            return Err(StorageError::DuplicateItem);
        }
        accounts.insert(account.to_string(), STANDARD.encode(secret));
        self.write_table(&key, &table)
    }

    fn copy_matching(&self, service: &str, account: &str) -> StorageResult<Vec<u8>> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| StorageError::LockPoisoned("secure_file.lock"))?;
        let Some(key) = self.load_key()? else {
            return Err(StorageError::ItemNotFound);
        };
        let table = self.read_table(&key)?;
        let encoded = table
            .get(service)
            .and_then(|accounts| accounts.get(account))
            .ok_or(StorageError::ItemNotFound)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(|error| StorageError::Decode(error.to_string()))
    }

    fn delete(&self, service: &str, account: &str) -> StorageResult<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| StorageError::LockPoisoned("secure_file.lock"))?;
        // Nothing sealed under a missing or unusable key can be found.
        let key = match self.load_key() {
            Ok(Some(key)) => key,
            Ok(None) | Err(StorageError::Crypto(_)) => return Err(StorageError::ItemNotFound),
            Err(error) => return Err(error),
        };
        let mut table = self.read_table_for_write(&key)?;

        let Some(accounts) = table.get_mut(service) else {
            return Err(StorageError::ItemNotFound);
        };
        if accounts.remove(account).is_none() {
            return Err(StorageError::ItemNotFound);
        }
        if accounts.is_empty() {
            table.remove(service);
        }
        self.write_table(&key, &table)
    }
}

fn cipher(key: &[u8]) -> StorageResult<ChaCha20Poly1305> {
    ChaCha20Poly1305::new_from_slice(key)
        .map_err(|error| StorageError::Crypto(format!("cipher init failed: {error}")))
}
