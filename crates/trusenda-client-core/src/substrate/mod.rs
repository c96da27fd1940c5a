//! Persistent key spaces the stores sit on.
//!
//! `KeyValueStore` is the general preferences-style store used by the draft
//! store and the activity log. `SecureStore` mirrors a platform keychain:
//! items are addressed by `(service, account)` and `add` refuses to
//! overwrite.

mod file;
mod memory;
mod secure_file;

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use uuid::Uuid;

use crate::error::{StorageError, StorageResult};

pub use file::FileKeyValueStore;
pub use memory::{InMemoryKeyValueStore, InMemorySecureStore};
pub use secure_file::EncryptedFileSecureStore;

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()>;
    /// Removing an absent key succeeds.
    fn remove(&self, key: &str) -> StorageResult<()>;

    fn contains(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Block until previous writes are durable.
    fn synchronize(&self) -> StorageResult<()> {
        Ok(())
    }
}

pub trait SecureStore: Send + Sync {
    /// Fails with `DuplicateItem` when the item already exists.
    fn add(&self, service: &str, account: &str, secret: &[u8]) -> StorageResult<()>;
    /// Fails with `ItemNotFound` when absent.
    fn copy_matching(&self, service: &str, account: &str) -> StorageResult<Vec<u8>>;
    /// Fails with `ItemNotFound` when absent.
    fn delete(&self, service: &str, account: &str) -> StorageResult<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct WriteMode {
    pub durable: bool,
    pub private: bool,
}

/// Temp file + rename so readers never observe a half-written document.
pub(crate) fn write_atomically(path: &Path, payload: &[u8], mode: WriteMode) -> StorageResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .map_err(|error| StorageError::persistence("failed to prepare storage directory", error))?;
    }

    let temp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
    let written = write_temp(&temp_path, payload, mode)
        .and_then(|()| {
            fs::rename(&temp_path, path)
                .map_err(|error| StorageError::persistence("failed to finalize storage file", error))
        });
    if written.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    written?;

    if mode.durable {
        sync_parent_dir(path)?;
    }
    Ok(())
}

/// Make the rename itself survive power loss.
#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> StorageResult<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    File::open(parent)
        .and_then(|dir| dir.sync_all())
        .map_err(|error| StorageError::persistence("failed to sync storage directory", error))
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> StorageResult<()> {
    Ok(())
}

fn write_temp(temp_path: &Path, payload: &[u8], mode: WriteMode) -> StorageResult<()> {
    let mut file = File::create(temp_path)
        .map_err(|error| StorageError::persistence("failed to create storage file", error))?;

    #[cfg(unix)]
    if mode.private {
        use std::os::unix::fs::PermissionsExt;

        file.set_permissions(fs::Permissions::from_mode(0o600))
            .map_err(|error| StorageError::persistence("failed to restrict storage file", error))?;
    }

    file.write_all(payload)
        .map_err(|error| StorageError::persistence("failed to write storage file", error))?;
    if mode.durable {
        file.sync_all()
            .map_err(|error| StorageError::persistence("failed to sync storage file", error))?;
    }
    Ok(())
}
