//! On-device persistence for the Trusenda CRM client: a credential vault, a
//! single-slot lead draft, and a bounded activity log.

pub mod activity;
pub mod clock;
pub mod config;
pub mod draft;
pub mod error;
pub mod storage;
pub mod substrate;
pub mod vault;

pub use activity::{
    ActivityFilter, ActivityKind, ActivityLog, ActivityRecord, ActivityStats, DEFAULT_RECENT_LIMIT,
    NewActivity,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ActivityLogPolicy, AgeEviction, ConfigError, StorageConfig, VaultPolicy};
pub use draft::{DraftStore, LeadDraft, LeadDraftFields};
pub use error::{StorageError, StorageResult};
pub use storage::ClientStorage;
pub use substrate::{
    EncryptedFileSecureStore, FileKeyValueStore, InMemoryKeyValueStore, InMemorySecureStore,
    KeyValueStore, SecureStore,
};
pub use vault::{BiometricCredentials, CredentialKey, CredentialVault};
