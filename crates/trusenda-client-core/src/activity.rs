//! Bounded on-device log of CRM events for the Recent Activity feed.
//!
//! Every write runs load -> apply -> evict -> persist under the log's lock.
//! The count cap is applied on every write; the age cap follows
//! [`AgeEviction`].

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use trusenda_domain::{Lead, Property};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::{ActivityLogPolicy, AgeEviction};
use crate::error::{StorageError, StorageResult};
use crate::substrate::KeyValueStore;

const ACTIVITY_SCHEMA_VERSION: u32 = 1;
pub const DEFAULT_RECENT_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    LeadCreated,
    LeadUpdated,
    LeadDeleted,
    LeadStatusChanged,
    LeadContacted,
    FollowUpScheduled,
    PropertyCreated,
    PropertyUpdated,
    PropertyDeleted,
    PropertyMatched,
}

impl ActivityKind {
    pub const ALL: [Self; 10] = [
        Self::LeadCreated,
        Self::LeadUpdated,
        Self::LeadDeleted,
        Self::LeadStatusChanged,
        Self::LeadContacted,
        Self::FollowUpScheduled,
        Self::PropertyCreated,
        Self::PropertyUpdated,
        Self::PropertyDeleted,
        Self::PropertyMatched,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LeadCreated => "lead_created",
            Self::LeadUpdated => "lead_updated",
            Self::LeadDeleted => "lead_deleted",
            Self::LeadStatusChanged => "lead_status_changed",
            Self::LeadContacted => "lead_contacted",
            Self::FollowUpScheduled => "follow_up_scheduled",
            Self::PropertyCreated => "property_created",
            Self::PropertyUpdated => "property_updated",
            Self::PropertyDeleted => "property_deleted",
            Self::PropertyMatched => "property_matched",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
    }

    #[must_use]
    pub fn is_property_event(self) -> bool {
        matches!(
            self,
            Self::PropertyCreated
                | Self::PropertyUpdated
                | Self::PropertyDeleted
                | Self::PropertyMatched
        )
    }
}

/// Feed filter chips.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ActivityFilter {
    #[default]
    All,
    Created,
    Contacted,
    StatusChanged,
    FollowUps,
    Updated,
}

impl ActivityFilter {
    pub const ALL: [Self; 6] = [
        Self::All,
        Self::Created,
        Self::Contacted,
        Self::StatusChanged,
        Self::FollowUps,
        Self::Updated,
    ];

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::All => "All Activity",
            Self::Created => "Created",
            Self::Contacted => "Contacted",
            Self::StatusChanged => "Status Changed",
            Self::FollowUps => "Follow-Ups",
            Self::Updated => "Updated",
        }
    }

    #[must_use]
    pub fn matches(self, kind: ActivityKind) -> bool {
        match self {
            Self::All => true,
            Self::Created => matches!(
                kind,
                ActivityKind::LeadCreated | ActivityKind::PropertyCreated
            ),
            Self::Contacted => kind == ActivityKind::LeadContacted,
            Self::StatusChanged => kind == ActivityKind::LeadStatusChanged,
            Self::FollowUps => kind == ActivityKind::FollowUpScheduled,
            Self::Updated => matches!(
                kind,
                ActivityKind::LeadUpdated | ActivityKind::PropertyUpdated
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub subject_id: String,
    pub subject_name: String,
    pub details: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
}

/// An event waiting for the log to assign its id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewActivity {
    pub kind: ActivityKind,
    pub subject_id: String,
    pub subject_name: String,
    pub details: String,
    pub metadata: Option<BTreeMap<String, String>>,
}

impl NewActivity {
    pub fn lead_created(lead: &Lead) -> Self {
        Self::for_lead(
            ActivityKind::LeadCreated,
            lead,
            lead.company_label().unwrap_or("New lead added").to_string(),
            Some(metadata([("status", lead.status.clone())])),
        )
    }

    pub fn lead_updated(lead: &Lead, field_changed: Option<&str>) -> Self {
        let details = match field_changed {
            Some(field) => format!("{field} updated"),
            None => "Lead information updated".to_string(),
        };
        Self::for_lead(
            ActivityKind::LeadUpdated,
            lead,
            details,
            Some(metadata([
                ("status", lead.status.clone()),
                ("field", field_changed.unwrap_or("multiple").to_string()),
            ])),
        )
    }

    pub fn lead_deleted(lead_id: &str, lead_name: &str) -> Self {
        Self {
            kind: ActivityKind::LeadDeleted,
            subject_id: lead_id.to_string(),
            subject_name: lead_name.to_string(),
            details: "Lead removed from CRM".to_string(),
            metadata: None,
        }
    }

    pub fn lead_status_changed(lead: &Lead, from: &str, to: &str) -> Self {
        Self::for_lead(
            ActivityKind::LeadStatusChanged,
            lead,
            format!("{from} → {to}"),
            Some(metadata([("from", from.to_string()), ("to", to.to_string())])),
        )
    }

    pub fn lead_contacted(lead: &Lead, new_status: Option<&str>) -> Self {
        let mut details = "Marked as contacted".to_string();
        if let Some(status) = new_status {
            details.push_str(&format!(" (now {status})"));
        }
        Self::for_lead(
            ActivityKind::LeadContacted,
            lead,
            details,
            Some(metadata([("status", lead.status.clone())])),
        )
    }

    /// Notes replace the generated detail when present.
    pub fn follow_up_scheduled(lead: &Lead, date: NaiveDate, notes: Option<&str>) -> Self {
        let date_label = date.format("%b %-d, %Y").to_string();
        let details = match notes.filter(|notes| !notes.is_empty()) {
            Some(notes) => notes.to_string(),
            None => format!("Follow-up scheduled for {date_label}"),
        };
        Self::for_lead(
            ActivityKind::FollowUpScheduled,
            lead,
            details,
            Some(metadata([("date", date_label)])),
        )
    }

    pub fn property_created(property: &Property, match_count: usize) -> Self {
        let mut details = "Property listed".to_string();
        if match_count > 0 {
            details.push_str(&format!(" • {}", matched_with(match_count)));
        }
        Self::for_property(
            ActivityKind::PropertyCreated,
            property,
            details,
            Some(metadata([
                ("status", property.status.clone()),
                ("type", property.property_type_label().to_string()),
                ("matches", match_count.to_string()),
            ])),
        )
    }

    pub fn property_updated(property: &Property) -> Self {
        Self::for_property(
            ActivityKind::PropertyUpdated,
            property,
            "Property details updated".to_string(),
            Some(metadata([("status", property.status.clone())])),
        )
    }

    pub fn property_deleted(property_id: &str, title: &str) -> Self {
        Self {
            kind: ActivityKind::PropertyDeleted,
            subject_id: property_id.to_string(),
            subject_name: title.to_string(),
            details: "Property removed".to_string(),
            metadata: None,
        }
    }

    pub fn property_matched(property: &Property, match_count: usize) -> Self {
        Self::for_property(
            ActivityKind::PropertyMatched,
            property,
            matched_with(match_count),
            Some(metadata([("matches", match_count.to_string())])),
        )
    }

    fn for_lead(
        kind: ActivityKind,
        lead: &Lead,
        details: String,
        metadata: Option<BTreeMap<String, String>>,
    ) -> Self {
        Self {
            kind,
            subject_id: lead.id.clone(),
            subject_name: lead.name.clone(),
            details,
            metadata,
        }
    }

    fn for_property(
        kind: ActivityKind,
        property: &Property,
        details: String,
        metadata: Option<BTreeMap<String, String>>,
    ) -> Self {
        Self {
            kind,
            subject_id: property.id.clone(),
            subject_name: property.title.clone(),
            details,
            metadata,
        }
    }

    fn stamp(self, timestamp: DateTime<Utc>) -> ActivityRecord {
        ActivityRecord {
            id: Uuid::new_v4().to_string(),
            kind: self.kind,
            subject_id: self.subject_id,
            subject_name: self.subject_name,
            details: self.details,
            timestamp,
            metadata: self.metadata,
        }
    }
}

fn matched_with(count: usize) -> String {
    let plural = if count == 1 { "" } else { "s" };
    format!("Matched with {count} lead{plural}")
}

fn metadata<const N: usize>(pairs: [(&str, String); N]) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActivityStats {
    pub total: usize,
    /// Events on the current local calendar day.
    pub today: usize,
    /// Events in the trailing 7x24h window.
    pub this_week: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct ActivityDocument {
    version: u32,
    activities: Vec<ActivityRecord>,
}

pub struct ActivityLog {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    policy: ActivityLogPolicy,
    lock: Mutex<()>,
}

impl ActivityLog {
    /// Open the log and drop entries past the age cap.
    pub fn open(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        policy: ActivityLogPolicy,
    ) -> Self {
        let log = Self {
            store,
            clock,
            policy,
            lock: Mutex::new(()),
        };
        log.purge_expired();
        log
    }

    pub fn policy(&self) -> &ActivityLogPolicy {
        &self.policy
    }

    /// Prepend a new event. Returns the stored record, or `None` when it
    /// could not be persisted.
    pub fn log_activity(&self, activity: NewActivity) -> Option<ActivityRecord> {
        let record = activity.stamp(self.clock.now());
        let stored = record.clone();
        let age_cap = self.policy.age_eviction == AgeEviction::OnWrite;
        match self.mutate(age_cap, move |activities| activities.insert(0, stored)) {
            Ok(()) => {
                tracing::debug!(
                    target: "trusenda.activity",
                    kind = record.kind.as_str(),
                    subject_id = %record.subject_id,
                    "activity logged",
                );
                Some(record)
            }
            Err(error) => {
                tracing::warn!(
                    target: "trusenda.activity",
                    kind = record.kind.as_str(),
                    error = %error,
                    "failed to log activity",
                );
                None
            }
        }
    }

    pub fn log_lead_created(&self, lead: &Lead) -> Option<ActivityRecord> {
        self.log_activity(NewActivity::lead_created(lead))
    }

    pub fn log_lead_updated(&self, lead: &Lead, field_changed: Option<&str>) -> Option<ActivityRecord> {
        self.log_activity(NewActivity::lead_updated(lead, field_changed))
    }

    pub fn log_lead_deleted(&self, lead_id: &str, lead_name: &str) -> Option<ActivityRecord> {
        self.log_activity(NewActivity::lead_deleted(lead_id, lead_name))
    }

    pub fn log_status_change(&self, lead: &Lead, from: &str, to: &str) -> Option<ActivityRecord> {
        self.log_activity(NewActivity::lead_status_changed(lead, from, to))
    }

    pub fn log_lead_contacted(&self, lead: &Lead, new_status: Option<&str>) -> Option<ActivityRecord> {
        self.log_activity(NewActivity::lead_contacted(lead, new_status))
    }

    pub fn log_follow_up_scheduled(
        &self,
        lead: &Lead,
        date: NaiveDate,
        notes: Option<&str>,
    ) -> Option<ActivityRecord> {
        self.log_activity(NewActivity::follow_up_scheduled(lead, date, notes))
    }

    pub fn log_property_created(&self, property: &Property, match_count: usize) -> Option<ActivityRecord> {
        self.log_activity(NewActivity::property_created(property, match_count))
    }

    pub fn log_property_updated(&self, property: &Property) -> Option<ActivityRecord> {
        self.log_activity(NewActivity::property_updated(property))
    }

    pub fn log_property_deleted(&self, property_id: &str, title: &str) -> Option<ActivityRecord> {
        self.log_activity(NewActivity::property_deleted(property_id, title))
    }

    pub fn log_property_matched(&self, property: &Property, match_count: usize) -> Option<ActivityRecord> {
        self.log_activity(NewActivity::property_matched(property, match_count))
    }

    /// Up to `limit` records, newest first.
    pub fn recent_activities(&self, limit: usize) -> Vec<ActivityRecord> {
        let mut activities = self.retained();
        activities.truncate(limit);
        activities
    }

    pub fn activities_for_subject(&self, subject_id: &str) -> Vec<ActivityRecord> {
        self.retained()
            .into_iter()
            .filter(|record| record.subject_id == subject_id)
            .collect()
    }

    pub fn activities_of_kind(&self, kind: ActivityKind) -> Vec<ActivityRecord> {
        self.retained()
            .into_iter()
            .filter(|record| record.kind == kind)
            .collect()
    }

    pub fn filtered(&self, filter: ActivityFilter, limit: usize) -> Vec<ActivityRecord> {
        self.retained()
            .into_iter()
            .filter(|record| filter.matches(record.kind))
            .take(limit)
            .collect()
    }

    pub fn stats(&self) -> ActivityStats {
        let activities = self.retained();
        let now = self.clock.now();
        let offset = self.clock.local_offset();
        let today = now.with_timezone(&offset).date_naive();
        let week_ago = now - TimeDelta::days(7);

        ActivityStats {
            total: activities.len(),
            today: activities
                .iter()
                .filter(|record| record.timestamp.with_timezone(&offset).date_naive() == today)
                .count(),
            this_week: activities
                .iter()
                .filter(|record| record.timestamp > week_ago)
                .count(),
        }
    }

    pub fn clear_all(&self) {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match self.store.remove(&self.policy.storage_key) {
            Ok(()) => tracing::debug!(target: "trusenda.activity", "all activities cleared"),
            Err(error) => tracing::warn!(
                target: "trusenda.activity",
                error = %error,
                "failed to clear activities",
            ),
        }
    }

    /// Drop every record older than the age cap. Returns how many went.
    pub fn purge_expired(&self) -> usize {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let purged = self.load().and_then(|activities| {
            let mut retained = activities.clone();
            self.enforce_caps(&mut retained, true);
            let removed = activities.len().saturating_sub(retained.len());
            if retained != activities {
                self.persist(&retained)?;
            }
            Ok(removed)
        });

        match purged {
            Ok(removed) => {
                if removed > 0 {
                    tracing::info!(
                        target: "trusenda.activity",
                        removed,
                        "purged expired activities",
                    );
                }
                removed
            }
            Err(error) => {
                tracing::warn!(
                    target: "trusenda.activity",
                    error = %error,
                    "failed to purge expired activities",
                );
                0
            }
        }
    }

    fn mutate<T, F>(&self, apply_age_cap: bool, operation: F) -> StorageResult<T>
    where
        F: FnOnce(&mut Vec<ActivityRecord>) -> T,
    {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut activities = self.load()?;
        let result = operation(&mut activities);
        self.enforce_caps(&mut activities, apply_age_cap);
        self.persist(&activities)?;
        Ok(result)
    }

    /// Newest first, age cap (if asked), then count cap.
    fn enforce_caps(&self, activities: &mut Vec<ActivityRecord>, apply_age_cap: bool) {
        activities.sort_by(|left, right| right.timestamp.cmp(&left.timestamp));
        // A cutoff before the representable range can exclude nothing.
        if apply_age_cap
            && let Some(cutoff) = self.clock.now().checked_sub_signed(self.policy.max_age)
        {
            activities.retain(|record| record.timestamp >= cutoff);
        }
        activities.truncate(self.policy.max_entries);
    }

    /// Stored sequence, newest first, capped at `max_entries`.
    fn retained(&self) -> Vec<ActivityRecord> {
        let mut activities = self.load().unwrap_or_else(|error| {
            tracing::warn!(
                target: "trusenda.activity",
                error = %error,
                "failed to read activities; treating as empty",
            );
            Vec::new()
        });
        activities.sort_by(|left, right| right.timestamp.cmp(&left.timestamp));
        activities.truncate(self.policy.max_entries);
        activities
    }

    /// Substrate failures propagate so a write never clobbers data it could
    /// not read. Undecodable payloads load as empty.
    fn load(&self) -> StorageResult<Vec<ActivityRecord>> {
        let Some(raw) = self.store.get(&self.policy.storage_key)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_slice::<ActivityDocument>(&raw) {
            Ok(document) if document.version == ACTIVITY_SCHEMA_VERSION => Ok(document.activities),
            Ok(document) => {
                tracing::warn!(
                    target: "trusenda.activity",
                    version = document.version,
                    "unsupported activity log version; starting empty",
                );
                Ok(Vec::new())
            }
            Err(error) => {
                tracing::warn!(
                    target: "trusenda.activity",
                    error = %error,
                    "failed to decode activity log; starting empty",
                );
                Ok(Vec::new())
            }
        }
    }

    fn persist(&self, activities: &[ActivityRecord]) -> StorageResult<()> {
        let payload = serde_json::to_vec(&ActivityDocument {
            version: ACTIVITY_SCHEMA_VERSION,
            activities: activities.to_vec(),
        })
        .map_err(|error| StorageError::Encode(error.to_string()))?;
        self.store.set(&self.policy.storage_key, &payload)
    }
}
