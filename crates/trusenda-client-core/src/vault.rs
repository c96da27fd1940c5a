//! Session credentials in the device secure store.
//!
//! Every operation resolves substrate failures to absence (reads) or a
//! logged no-op (writes). Expiry checks fail closed.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, TimeDelta, Utc};
use trusenda_domain::TokenGrant;
use zeroize::Zeroizing;

use crate::clock::Clock;
use crate::config::VaultPolicy;
use crate::error::{StorageError, StorageResult};
use crate::substrate::SecureStore;

const BIOMETRIC_ENABLED_VALUE: &str = "true";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKey {
    AccessToken,
    RefreshToken,
    TokenExpiry,
    SavedEmail,
    SavedPassword,
    BiometricEnabled,
}

impl CredentialKey {
    pub const SESSION: [Self; 3] = [Self::AccessToken, Self::RefreshToken, Self::TokenExpiry];
    pub const BIOMETRIC: [Self; 3] = [Self::SavedEmail, Self::SavedPassword, Self::BiometricEnabled];

    /// Account name inside the vault's service namespace.
    #[must_use]
    pub fn account(self) -> &'static str {
        match self {
            Self::AccessToken => "jwt_access_token",
            Self::RefreshToken => "jwt_refresh_token",
            Self::TokenExpiry => "jwt_token_expiry",
            Self::SavedEmail => "saved_email_for_biometric",
            Self::SavedPassword => "saved_password_for_biometric",
            Self::BiometricEnabled => "biometric_login_enabled",
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct BiometricCredentials {
    pub email: String,
    pub password: Zeroizing<String>,
}

impl std::fmt::Debug for BiometricCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BiometricCredentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

pub struct CredentialVault {
    store: Arc<dyn SecureStore>,
    clock: Arc<dyn Clock>,
    policy: VaultPolicy,
    lock: Mutex<()>,
}

impl CredentialVault {
    pub fn new(store: Arc<dyn SecureStore>, clock: Arc<dyn Clock>, policy: VaultPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
            lock: Mutex::new(()),
        }
    }

    pub fn service_id(&self) -> &str {
        &self.policy.service_id
    }

    /// Replace the value under `key`.
    ///
    /// A failed add leaves the key absent, never half-written.
    pub fn save(&self, secret: &str, key: CredentialKey) {
        let _guard = self.guard();
        self.replace_logged(key, secret);
    }

    pub fn get(&self, key: CredentialKey) -> Option<String> {
        let _guard = self.guard();
        self.read_locked(key)
    }

    pub fn delete(&self, key: CredentialKey) {
        let _guard = self.guard();
        self.remove(key);
    }

    /// Drop the session. Biometric credentials survive logout.
    pub fn clear_all(&self) {
        let _guard = self.guard();
        for key in CredentialKey::SESSION {
            self.remove(key);
        }
        tracing::debug!(target: "trusenda.vault", "session credentials cleared");
    }

    /// Store a fresh session. A missing refresh token keeps the stored one.
    ///
    /// A lifetime that does not fit the calendar stores no expiry, so the
    /// session reads as expired.
    pub fn save_tokens(&self, access_token: &str, refresh_token: Option<&str>, expires_in_secs: i64) {
        let expiry = TimeDelta::try_seconds(expires_in_secs)
            .and_then(|lifetime| self.clock.now().checked_add_signed(lifetime));
        let _guard = self.guard();

        self.replace_logged(CredentialKey::AccessToken, access_token);
        if let Some(refresh_token) = refresh_token {
            self.replace_logged(CredentialKey::RefreshToken, refresh_token);
        }
        match expiry {
            Some(expiry) => self.replace_logged(CredentialKey::TokenExpiry, &encode_expiry(expiry)),
            None => {
                tracing::warn!(
                    target: "trusenda.vault",
                    expires_in_secs,
                    "token lifetime out of range; no expiry stored",
                );
                self.remove(CredentialKey::TokenExpiry);
            }
        }

        tracing::debug!(
            target: "trusenda.vault",
            expires_at = ?expiry.map(|expiry| expiry.to_rfc3339()),
            refresh_token = refresh_token.is_some(),
            "session tokens saved",
        );
    }

    pub fn save_grant(&self, grant: &TokenGrant) {
        self.save_tokens(
            &grant.access_token,
            grant.refresh_token.as_deref(),
            grant.expires_in,
        );
    }

    /// Stored expiry instant; `None` when absent or unparsable.
    pub fn token_expiry(&self) -> Option<DateTime<Utc>> {
        let _guard = self.guard();
        self.expiry_locked()
    }

    /// True once `now` reaches the expiry minus the safety buffer, or when no
    /// usable expiry is stored.
    pub fn is_token_expired(&self) -> bool {
        let _guard = self.guard();
        let Some(expiry) = self.expiry_locked() else {
            return true;
        };
        match expiry.checked_sub_signed(self.policy.expiry_buffer) {
            Some(renew_at) => self.clock.now() >= renew_at,
            None => true,
        }
    }

    pub fn has_session_tokens(&self) -> bool {
        let _guard = self.guard();
        self.read_locked(CredentialKey::AccessToken).is_some()
            || self.read_locked(CredentialKey::RefreshToken).is_some()
    }

    pub fn save_biometric_credentials(&self, email: &str, password: &str) {
        let _guard = self.guard();
        self.replace_logged(CredentialKey::SavedEmail, email);
        self.replace_logged(CredentialKey::SavedPassword, password);
        self.replace_logged(CredentialKey::BiometricEnabled, BIOMETRIC_ENABLED_VALUE);
        tracing::info!(target: "trusenda.vault", "biometric credentials saved");
    }

    pub fn biometric_credentials(&self) -> Option<BiometricCredentials> {
        let _guard = self.guard();
        let email = self.read_locked(CredentialKey::SavedEmail)?;
        let password = Zeroizing::new(self.read_locked(CredentialKey::SavedPassword)?);
        if !self.biometric_enabled_locked() {
            return None;
        }
        Some(BiometricCredentials { email, password })
    }

    pub fn clear_biometric_credentials(&self) {
        let _guard = self.guard();
        for key in CredentialKey::BIOMETRIC {
            self.remove(key);
        }
        tracing::info!(target: "trusenda.vault", "biometric credentials cleared");
    }

    pub fn is_biometric_enabled(&self) -> bool {
        let _guard = self.guard();
        self.biometric_enabled_locked()
    }

    /// Serializes every vault operation so no reader sees the gap inside a
    /// delete-then-add replace.
    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_locked(&self, key: CredentialKey) -> Option<String> {
        match self.read(key) {
            Ok(value) => Some(value),
            Err(StorageError::ItemNotFound) => None,
            Err(error) => {
                tracing::warn!(
                    target: "trusenda.vault",
                    key = key.account(),
                    error = %error,
                    "secure store read failed; treating as absent",
                );
                None
            }
        }
    }

    fn expiry_locked(&self) -> Option<DateTime<Utc>> {
        let raw = self.read_locked(CredentialKey::TokenExpiry)?;
        let parsed = decode_expiry(&raw);
        if parsed.is_none() {
            tracing::warn!(target: "trusenda.vault", "stored token expiry is not a timestamp");
        }
        parsed
    }

    fn biometric_enabled_locked(&self) -> bool {
        self.read_locked(CredentialKey::BiometricEnabled).as_deref() == Some(BIOMETRIC_ENABLED_VALUE)
    }

    fn replace_logged(&self, key: CredentialKey, secret: &str) {
        if let Err(error) = self.replace(key, secret) {
            tracing::warn!(
                target: "trusenda.vault",
                key = key.account(),
                error = %error,
                "secure store save failed",
            );
        }
    }

    fn replace(&self, key: CredentialKey, secret: &str) -> StorageResult<()> {
        match self.store.delete(&self.policy.service_id, key.account()) {
            Ok(()) | Err(StorageError::ItemNotFound) => {}
            Err(error) => return Err(error),
        }
        self.store
            .add(&self.policy.service_id, key.account(), secret.as_bytes())
    }

    fn read(&self, key: CredentialKey) -> StorageResult<String> {
        let bytes = Zeroizing::new(
            self.store
                .copy_matching(&self.policy.service_id, key.account())?,
        );
        std::str::from_utf8(&bytes)
            .map(str::to_string)
            .map_err(|error| StorageError::Decode(error.to_string()))
    }

    fn remove(&self, key: CredentialKey) {
        match self.store.delete(&self.policy.service_id, key.account()) {
            Ok(()) | Err(StorageError::ItemNotFound) => {}
            Err(error) => {
                tracing::warn!(
                    target: "trusenda.vault",
                    key = key.account(),
                    error = %error,
                    "secure store delete failed",
                );
            }
        }
    }
}

/// Seconds since the Unix epoch with millisecond precision.
fn encode_expiry(expiry: DateTime<Utc>) -> String {
    let millis = expiry.timestamp_millis();
    format!("{}.{:03}", millis.div_euclid(1000), millis.rem_euclid(1000))
}

fn decode_expiry(raw: &str) -> Option<DateTime<Utc>> {
    let seconds = raw.trim().parse::<f64>().ok().filter(|value| value.is_finite())?;
    DateTime::from_timestamp_millis((seconds * 1000.0).round() as i64)
}
