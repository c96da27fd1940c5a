use std::path::PathBuf;

use chrono::TimeDelta;

pub const ENV_STORAGE_DIR: &str = "TRUSENDA_STORAGE_DIR";
pub const ENV_KEYCHAIN_SERVICE: &str = "TRUSENDA_KEYCHAIN_SERVICE";
pub const ENV_ACTIVITY_MAX_ENTRIES: &str = "TRUSENDA_ACTIVITY_MAX_ENTRIES";
pub const ENV_ACTIVITY_MAX_AGE_DAYS: &str = "TRUSENDA_ACTIVITY_MAX_AGE_DAYS";
pub const ENV_ACTIVITY_AGE_EVICTION: &str = "TRUSENDA_ACTIVITY_AGE_EVICTION";
pub const ENV_LOG_FILTER: &str = "TRUSENDA_LOG_FILTER";

pub const DEFAULT_KEYCHAIN_SERVICE: &str = "com.trusenda.crm";
pub const DEFAULT_DRAFT_KEY: &str = "com.trusenda.leadDraft";
pub const DEFAULT_ACTIVITIES_KEY: &str = "crm_activities";
pub const DEFAULT_MAX_ACTIVITIES: usize = 100;
pub const DEFAULT_MAX_ACTIVITY_AGE_DAYS: i64 = 7;
pub const DEFAULT_TOKEN_EXPIRY_BUFFER_SECS: i64 = 5 * 60;
pub const DEFAULT_LOG_FILTER: &str = "info";

pub const SECURE_STORE_FILE_NAME: &str = "secure-store.v1.json";
pub const SECURE_STORE_KEY_FILE_NAME: &str = "secure-store.key";
pub const PREFERENCES_FILE_NAME: &str = "preferences.v1.json";

pub const STORAGE_DIR_SOURCE_DEFAULT: &str = "default_data_dir";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid TRUSENDA_ACTIVITY_MAX_ENTRIES value '{value}': must be a positive integer")]
    InvalidMaxEntries { value: String },
    #[error("invalid TRUSENDA_ACTIVITY_MAX_AGE_DAYS value '{value}': must be a positive integer")]
    InvalidMaxAgeDays { value: String },
    #[error("invalid TRUSENDA_ACTIVITY_AGE_EVICTION value '{value}': expected on_write or on_open")]
    InvalidAgeEviction { value: String },
}

/// When the activity log drops entries past the age cap.
///
/// The count cap is enforced on every write regardless.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AgeEviction {
    /// On open, on every write, and on demand.
    #[default]
    OnWrite,
    /// On open and on demand only.
    OnOpen,
}

impl AgeEviction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OnWrite => "on_write",
            Self::OnOpen => "on_open",
        }
    }
}

#[must_use]
pub fn parse_age_eviction(raw: &str) -> Option<AgeEviction> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "on_write" | "on-write" | "write" => Some(AgeEviction::OnWrite),
        "on_open" | "on-open" | "open" | "init" => Some(AgeEviction::OnOpen),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityLogPolicy {
    pub storage_key: String,
    pub max_entries: usize,
    pub max_age: TimeDelta,
    pub age_eviction: AgeEviction,
}

impl Default for ActivityLogPolicy {
    fn default() -> Self {
        Self {
            storage_key: DEFAULT_ACTIVITIES_KEY.to_string(),
            max_entries: DEFAULT_MAX_ACTIVITIES,
            max_age: TimeDelta::days(DEFAULT_MAX_ACTIVITY_AGE_DAYS),
            age_eviction: AgeEviction::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultPolicy {
    pub service_id: String,
    /// Tokens count as expired this long before their real expiry.
    pub expiry_buffer: TimeDelta,
}

impl Default for VaultPolicy {
    fn default() -> Self {
        Self {
            service_id: DEFAULT_KEYCHAIN_SERVICE.to_string(),
            expiry_buffer: TimeDelta::seconds(DEFAULT_TOKEN_EXPIRY_BUFFER_SECS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub data_dir_source: String,
    pub vault: VaultPolicy,
    pub draft_key: String,
    pub activity: ActivityLogPolicy,
    pub log_filter: String,
}

impl StorageConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve configuration through `lookup` instead of the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let (data_dir, data_dir_source) = match lookup(ENV_STORAGE_DIR) {
            Some(dir) => (PathBuf::from(dir), ENV_STORAGE_DIR.to_string()),
            None => (
                default_data_dir(),
                STORAGE_DIR_SOURCE_DEFAULT.to_string(),
            ),
        };

        let service_id =
            lookup(ENV_KEYCHAIN_SERVICE).unwrap_or_else(|| DEFAULT_KEYCHAIN_SERVICE.to_string());

        let max_entries = match lookup(ENV_ACTIVITY_MAX_ENTRIES) {
            Some(value) => match value.parse::<usize>() {
                Ok(parsed) if parsed > 0 => parsed,
                _ => return Err(ConfigError::InvalidMaxEntries { value }),
            },
            None => DEFAULT_MAX_ACTIVITIES,
        };

        let max_age = match lookup(ENV_ACTIVITY_MAX_AGE_DAYS) {
            Some(value) => match value.parse::<i64>().ok().filter(|days| *days > 0) {
                Some(days) => match TimeDelta::try_days(days) {
                    Some(max_age) => max_age,
                    None => return Err(ConfigError::InvalidMaxAgeDays { value }),
                },
                None => return Err(ConfigError::InvalidMaxAgeDays { value }),
            },
            None => TimeDelta::days(DEFAULT_MAX_ACTIVITY_AGE_DAYS),
        };

        let age_eviction = match lookup(ENV_ACTIVITY_AGE_EVICTION) {
            Some(value) => match parse_age_eviction(&value) {
                Some(policy) => policy,
                None => return Err(ConfigError::InvalidAgeEviction { value }),
            },
            None => AgeEviction::default(),
        };

        let log_filter =
            lookup(ENV_LOG_FILTER).unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        Ok(Self {
            data_dir,
            data_dir_source,
            vault: VaultPolicy {
                service_id,
                ..VaultPolicy::default()
            },
            draft_key: DEFAULT_DRAFT_KEY.to_string(),
            activity: ActivityLogPolicy {
                max_entries,
                max_age,
                age_eviction,
                ..ActivityLogPolicy::default()
            },
            log_filter,
        })
    }

    pub fn for_tests(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            data_dir_source: "tests".to_string(),
            vault: VaultPolicy::default(),
            draft_key: DEFAULT_DRAFT_KEY.to_string(),
            activity: ActivityLogPolicy::default(),
            log_filter: "debug".to_string(),
        }
    }

    pub fn secure_store_path(&self) -> PathBuf {
        self.data_dir.join(SECURE_STORE_FILE_NAME)
    }

    pub fn secure_store_key_path(&self) -> PathBuf {
        self.data_dir.join(SECURE_STORE_KEY_FILE_NAME)
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.data_dir.join(PREFERENCES_FILE_NAME)
    }
}

fn default_data_dir() -> PathBuf {
    if let Some(mut data_dir) = dirs::data_local_dir() {
        data_dir.push("trusenda");
        return data_dir;
    }

    if let Some(mut home_dir) = dirs::home_dir() {
        home_dir.push(".trusenda");
        return home_dir;
    }

    PathBuf::from(".trusenda")
}
