//! Single-slot recovery snapshot of the lead creation form.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::{StorageError, StorageResult};
use crate::substrate::KeyValueStore;

const DRAFT_SCHEMA_VERSION: u32 = 1;

/// Every editable field of the lead form, as typed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadDraftFields {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub company: String,
    pub budget: String,
    pub size_range: String,
    pub size_min: String,
    pub size_max: String,
    pub property_type: String,
    pub transaction_type: String,
    pub status: String,
    pub preferred_area: String,
    pub industry: String,
    pub lease_term: String,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadDraft {
    #[serde(flatten)]
    pub fields: LeadDraftFields,
    pub saved_at: DateTime<Utc>,
}

impl LeadDraft {
    #[must_use]
    pub fn new(fields: LeadDraftFields, saved_at: DateTime<Utc>) -> Self {
        Self { fields, saved_at }
    }

    /// Whether the user typed anything worth offering back.
    ///
    /// Picker fields (status, property type, ...) carry defaults and do not
    /// count.
    pub fn has_content(&self) -> bool {
        let fields = &self.fields;
        [
            &fields.name,
            &fields.email,
            &fields.phone,
            &fields.company,
            &fields.notes,
        ]
        .iter()
        .any(|value| !value.is_empty())
    }

    pub fn time_since_saved(&self, now: DateTime<Utc>) -> TimeDelta {
        now - self.saved_at
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct DraftDocument {
    version: u32,
    draft: LeadDraft,
}

pub struct DraftStore {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    key: String,
    lock: Mutex<()>,
}

impl DraftStore {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, key: impl Into<String>) -> Self {
        Self {
            store,
            clock,
            key: key.into(),
            lock: Mutex::new(()),
        }
    }

    /// Stamp `fields` with the current time.
    pub fn capture(&self, fields: LeadDraftFields) -> LeadDraft {
        LeadDraft::new(fields, self.clock.now())
    }

    /// Replace the stored draft and force it to durable storage.
    pub fn save_draft(&self, draft: &LeadDraft) {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match self.write(draft) {
            Ok(()) => tracing::debug!(
                target: "trusenda.draft",
                saved_at = %draft.saved_at.to_rfc3339(),
                has_content = draft.has_content(),
                "draft saved",
            ),
            Err(error) => tracing::warn!(
                target: "trusenda.draft",
                error = %error,
                "failed to save draft",
            ),
        }
    }

    /// Stored draft, or `None` when absent or unreadable.
    pub fn load_draft(&self) -> Option<LeadDraft> {
        match self.read() {
            Ok(Some(draft)) => Some(draft),
            Ok(None) => {
                tracing::debug!(target: "trusenda.draft", "no draft stored");
                None
            }
            Err(error) => {
                tracing::warn!(
                    target: "trusenda.draft",
                    error = %error,
                    "failed to load draft; treating as absent",
                );
                None
            }
        }
    }

    /// The stored draft only when it is worth a recovery prompt.
    pub fn recoverable_draft(&self) -> Option<LeadDraft> {
        self.load_draft().filter(LeadDraft::has_content)
    }

    pub fn clear_draft(&self) {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let cleared = self
            .store
            .remove(&self.key)
            .and_then(|()| self.store.synchronize());
        match cleared {
            Ok(()) => tracing::debug!(target: "trusenda.draft", "draft cleared"),
            Err(error) => tracing::warn!(
                target: "trusenda.draft",
                error = %error,
                "failed to clear draft",
            ),
        }
    }

    /// Existence check without decoding the record.
    pub fn has_draft(&self) -> bool {
        self.store.contains(&self.key).unwrap_or_else(|error| {
            tracing::warn!(
                target: "trusenda.draft",
                error = %error,
                "draft existence check failed",
            );
            false
        })
    }

    fn write(&self, draft: &LeadDraft) -> StorageResult<()> {
        let payload = serde_json::to_vec(&DraftDocument {
            version: DRAFT_SCHEMA_VERSION,
            draft: draft.clone(),
        })
        .map_err(|error| StorageError::Encode(error.to_string()))?;
        self.store.set(&self.key, &payload)?;
        self.store.synchronize()
    }

    fn read(&self) -> StorageResult<Option<LeadDraft>> {
        let Some(raw) = self.store.get(&self.key)? else {
            return Ok(None);
        };
        let document = serde_json::from_slice::<DraftDocument>(&raw)
            .map_err(|error| StorageError::Decode(error.to_string()))?;
        if document.version != DRAFT_SCHEMA_VERSION {
            return Err(StorageError::Decode(format!(
                "unsupported draft version {}",
                document.version
            )));
        }
        Ok(Some(document.draft))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeDelta, TimeZone, Utc};

    use super::{DraftStore, LeadDraft, LeadDraftFields};
    use crate::clock::{Clock, ManualClock};
    use crate::config::DEFAULT_DRAFT_KEY;
    use crate::substrate::{InMemoryKeyValueStore, KeyValueStore};

    fn fixture() -> (DraftStore, Arc<InMemoryKeyValueStore>, Arc<ManualClock>) {
        let store = Arc::new(InMemoryKeyValueStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 10, 15, 0, 0).unwrap(),
        ));
        let drafts = DraftStore::new(store.clone(), clock.clone(), DEFAULT_DRAFT_KEY);
        (drafts, store, clock)
    }

    fn sample_fields() -> LeadDraftFields {
        LeadDraftFields {
            name: "Dana Ortiz".to_string(),
            email: "dana@harbor.example".to_string(),
            company: "Harbor Logistics".to_string(),
            size_min: "5000".to_string(),
            size_max: "12000".to_string(),
            property_type: "Warehouse".to_string(),
            transaction_type: "Lease".to_string(),
            status: "Warm".to_string(),
            notes: "Needs dock-high doors".to_string(),
            ..LeadDraftFields::default()
        }
    }

    #[test]
    fn saved_draft_loads_back_identically() {
        let (drafts, store, _) = fixture();
        let draft = drafts.capture(sample_fields());
        drafts.save_draft(&draft);

        assert_eq!(drafts.load_draft(), Some(draft));
        assert!(drafts.has_draft());
        assert!(store.synchronize_calls() >= 1);
    }

    #[test]
    fn save_replaces_rather_than_merges() {
        let (drafts, _, clock) = fixture();
        drafts.save_draft(&drafts.capture(sample_fields()));
        clock.advance(TimeDelta::seconds(30));

        let second = drafts.capture(LeadDraftFields {
            phone: "555-0100".to_string(),
            ..LeadDraftFields::default()
        });
        drafts.save_draft(&second);

        let loaded = drafts.load_draft().expect("draft");
        assert_eq!(loaded, second);
        assert!(loaded.fields.name.is_empty());
    }

    #[test]
    fn cleared_draft_is_absent() {
        let (drafts, _, _) = fixture();
        drafts.save_draft(&drafts.capture(sample_fields()));
        drafts.clear_draft();
        assert_eq!(drafts.load_draft(), None);
        assert!(!drafts.has_draft());
    }

    #[test]
    fn corrupt_record_reads_as_absent() {
        let (drafts, store, _) = fixture();
        store.set(DEFAULT_DRAFT_KEY, b"{\"name\": 42").expect("seed corrupt");
        assert!(drafts.has_draft());
        assert_eq!(drafts.load_draft(), None);
    }

    #[test]
    fn other_schema_version_reads_as_absent() {
        let (drafts, store, _) = fixture();
        let value = serde_json::json!({
            "version": 2,
            "draft": serde_json::to_value(drafts.capture(sample_fields())).expect("encode"),
        });
        store
            .set(DEFAULT_DRAFT_KEY, value.to_string().as_bytes())
            .expect("seed");
        assert_eq!(drafts.load_draft(), None);
    }

    #[test]
    fn content_rule_only_counts_free_text_fields() {
        let saved_at = Utc.with_ymd_and_hms(2026, 3, 10, 15, 0, 0).unwrap();
        let blank = LeadDraft::new(
            LeadDraftFields {
                status: "Cold".to_string(),
                property_type: "Office".to_string(),
                transaction_type: "Lease".to_string(),
                budget: "$5k".to_string(),
                ..LeadDraftFields::default()
            },
            saved_at,
        );
        assert!(!blank.has_content());

        for field in ["name", "email", "phone", "company", "notes"] {
            let mut fields = LeadDraftFields::default();
            match field {
                "name" => fields.name = "x".to_string(),
                "email" => fields.email = "x".to_string(),
                "phone" => fields.phone = "x".to_string(),
                "company" => fields.company = "x".to_string(),
                _ => fields.notes = "x".to_string(),
            }
            assert!(LeadDraft::new(fields, saved_at).has_content(), "{field}");
        }
    }

    #[test]
    fn blank_draft_is_not_offered_for_recovery() {
        let (drafts, _, _) = fixture();
        drafts.save_draft(&drafts.capture(LeadDraftFields::default()));
        assert!(drafts.has_draft());
        assert_eq!(drafts.recoverable_draft(), None);
    }

    #[test]
    fn time_since_saved_tracks_the_clock() {
        let (drafts, _, clock) = fixture();
        let draft = drafts.capture(sample_fields());
        clock.advance(TimeDelta::minutes(3));
        assert_eq!(draft.time_since_saved(clock.now()), TimeDelta::minutes(3));
    }

    #[test]
    fn failed_save_keeps_previous_draft() {
        let (drafts, store, _) = fixture();
        let first = drafts.capture(sample_fields());
        drafts.save_draft(&first);

        store.fail_writes(true);
        drafts.save_draft(&drafts.capture(LeadDraftFields::default()));
        assert_eq!(drafts.load_draft(), Some(first));
    }
}
