use std::sync::Arc;

use crate::activity::ActivityLog;
use crate::clock::{Clock, SystemClock};
use crate::config::StorageConfig;
use crate::draft::DraftStore;
use crate::substrate::{
    EncryptedFileSecureStore, FileKeyValueStore, InMemoryKeyValueStore, InMemorySecureStore,
    KeyValueStore, SecureStore,
};
use crate::vault::CredentialVault;

/// The three on-device stores, built once at startup and handed to callers.
pub struct ClientStorage {
    pub vault: CredentialVault,
    pub drafts: DraftStore,
    pub activity: ActivityLog,
}

impl ClientStorage {
    /// File-backed stores under `config.data_dir`.
    pub fn open(config: &StorageConfig) -> Self {
        let secure: Arc<dyn SecureStore> = Arc::new(EncryptedFileSecureStore::open(
            config.secure_store_path(),
            config.secure_store_key_path(),
        ));
        let preferences: Arc<dyn KeyValueStore> =
            Arc::new(FileKeyValueStore::open(config.preferences_path()));

        tracing::info!(
            target: "trusenda.storage",
            data_dir = %config.data_dir.display(),
            source = %config.data_dir_source,
            age_eviction = config.activity.age_eviction.as_str(),
            "opening on-device storage",
        );
        Self::with_substrates(config, secure, preferences, Arc::new(SystemClock))
    }

    /// Isolated stores that live only as long as this value.
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self::with_substrates(
            &StorageConfig::for_tests(std::env::temp_dir()),
            Arc::new(InMemorySecureStore::new()),
            Arc::new(InMemoryKeyValueStore::new()),
            clock,
        )
    }

    pub fn with_substrates(
        config: &StorageConfig,
        secure: Arc<dyn SecureStore>,
        preferences: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            vault: CredentialVault::new(secure, clock.clone(), config.vault.clone()),
            drafts: DraftStore::new(preferences.clone(), clock.clone(), config.draft_key.clone()),
            activity: ActivityLog::open(preferences, clock, config.activity.clone()),
        }
    }
}
