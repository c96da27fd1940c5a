use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use trusenda_client_core::{
    ActivityKind, ActivityLog, ActivityLogPolicy, AgeEviction, CredentialKey, CredentialVault,
    DraftStore, EncryptedFileSecureStore, FileKeyValueStore, InMemoryKeyValueStore,
    InMemorySecureStore, KeyValueStore, LeadDraftFields, ManualClock, NewActivity, VaultPolicy,
};
use trusenda_domain::{Lead, Property};

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 15, 0, 0).unwrap()
}

fn lead(id: &str) -> Lead {
    Lead {
        id: id.to_string(),
        name: format!("Lead {id}"),
        company: None,
        status: "Cold".to_string(),
    }
}

fn activity_log(policy: ActivityLogPolicy) -> (ActivityLog, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start()));
    let log = ActivityLog::open(Arc::new(InMemoryKeyValueStore::new()), clock.clone(), policy);
    (log, clock)
}

fn on_open_policy() -> ActivityLogPolicy {
    ActivityLogPolicy {
        age_eviction: AgeEviction::OnOpen,
        ..ActivityLogPolicy::default()
    }
}

#[test]
fn vault_buffer_boundary_holds_at_every_offset() {
    let clock = Arc::new(ManualClock::new(start()));
    let vault = CredentialVault::new(
        Arc::new(InMemorySecureStore::new()),
        clock.clone(),
        VaultPolicy::default(),
    );
    vault.save_tokens("access", None, 3600);
    let expiry = vault.token_expiry().expect("expiry stored");
    let boundary = expiry - TimeDelta::minutes(5);

    let offsets = [
        TimeDelta::hours(-2),
        TimeDelta::minutes(-1),
        TimeDelta::seconds(-1),
        TimeDelta::milliseconds(-1),
        TimeDelta::zero(),
        TimeDelta::milliseconds(1),
        TimeDelta::minutes(4),
        TimeDelta::minutes(5),
        TimeDelta::days(3),
    ];
    for offset in offsets {
        let at = boundary + offset;
        clock.set(at);
        assert_eq!(
            vault.is_token_expired(),
            at >= boundary,
            "offset {offset} relative to buffered expiry"
        );
    }
}

#[test]
fn vault_fails_closed_without_a_usable_expiry() {
    let store = Arc::new(InMemorySecureStore::new());
    let vault = CredentialVault::new(
        store.clone(),
        Arc::new(ManualClock::new(start())),
        VaultPolicy::default(),
    );
    vault.save("access", CredentialKey::AccessToken);
    assert!(vault.is_token_expired());

    for garbage in ["", "soon", "12:00", "1e400"] {
        store.inject("com.trusenda.crm", "jwt_token_expiry", garbage.as_bytes());
        assert!(vault.is_token_expired(), "expiry value {garbage:?}");
    }

    store.inject("com.trusenda.crm", "jwt_token_expiry", &[0xff, 0xfe]);
    assert!(vault.is_token_expired());
}

#[test]
fn partial_token_refresh_keeps_previous_refresh_token() {
    let clock = Arc::new(ManualClock::new(start()));
    let vault = CredentialVault::new(
        Arc::new(InMemorySecureStore::new()),
        clock.clone(),
        VaultPolicy::default(),
    );
    vault.save_tokens("access-2", Some("R"), 1800);
    clock.advance(TimeDelta::minutes(20));
    vault.save_tokens("access-1", None, 3600);

    assert_eq!(vault.get(CredentialKey::RefreshToken).as_deref(), Some("R"));
    assert_eq!(
        vault.token_expiry(),
        Some(start() + TimeDelta::minutes(20) + TimeDelta::hours(1))
    );
}

fn file_vault(dir: &std::path::Path) -> CredentialVault {
    CredentialVault::new(
        Arc::new(EncryptedFileSecureStore::open(
            dir.join("secure-store.v1.json"),
            dir.join("secure-store.key"),
        )),
        Arc::new(ManualClock::new(start())),
        VaultPolicy::default(),
    )
}

#[test]
fn login_recovers_after_the_sealed_file_is_corrupted() {
    let temp = tempfile::tempdir().expect("temp dir");
    let vault = file_vault(temp.path());
    vault.save_tokens("stale", Some("stale-refresh"), 3600);
    std::fs::write(temp.path().join("secure-store.v1.json"), b"garbage").expect("corrupt");

    assert_eq!(vault.get(CredentialKey::AccessToken), None);
    vault.clear_all();
    vault.save_tokens("access", Some("refresh"), 3600);

    assert_eq!(vault.get(CredentialKey::AccessToken).as_deref(), Some("access"));
    assert_eq!(vault.get(CredentialKey::RefreshToken).as_deref(), Some("refresh"));
    assert!(!vault.is_token_expired());
}

#[test]
fn login_recovers_after_the_device_key_is_lost() {
    let temp = tempfile::tempdir().expect("temp dir");
    let vault = file_vault(temp.path());
    vault.save_tokens("stale", Some("stale-refresh"), 3600);
    std::fs::remove_file(temp.path().join("secure-store.key")).expect("drop key");

    assert!(vault.is_token_expired());
    vault.clear_all();
    vault.save_tokens("access", Some("refresh"), 3600);

    let reopened = file_vault(temp.path());
    assert_eq!(reopened.get(CredentialKey::AccessToken).as_deref(), Some("access"));
    assert!(!reopened.is_token_expired());
}

#[test]
fn draft_round_trips_through_the_file_store() {
    let temp = tempfile::tempdir().expect("temp dir");
    let path = temp.path().join("preferences.v1.json");
    let clock = Arc::new(ManualClock::new(start() + TimeDelta::nanoseconds(123_456_789)));

    let drafts = DraftStore::new(
        Arc::new(FileKeyValueStore::open(path.clone())),
        clock.clone(),
        "com.trusenda.leadDraft",
    );
    let draft = drafts.capture(LeadDraftFields {
        name: "Dana Ortiz".to_string(),
        email: "dana@harbor.example".to_string(),
        phone: "+1 555 0100".to_string(),
        company: "Harbor Logistics".to_string(),
        budget: "$50k-$100k".to_string(),
        size_range: "5k-12k".to_string(),
        size_min: "5000".to_string(),
        size_max: "12000".to_string(),
        property_type: "Warehouse".to_string(),
        transaction_type: "Lease".to_string(),
        status: "Warm".to_string(),
        preferred_area: "Port district".to_string(),
        industry: "Logistics".to_string(),
        lease_term: "3 Years".to_string(),
        notes: "Needs dock-high doors, \"ASAP\"".to_string(),
    });
    drafts.save_draft(&draft);

    let reopened = DraftStore::new(
        Arc::new(FileKeyValueStore::open(path)),
        clock,
        "com.trusenda.leadDraft",
    );
    assert_eq!(reopened.load_draft(), Some(draft));

    reopened.clear_draft();
    assert_eq!(reopened.load_draft(), None);
    assert!(!reopened.has_draft());
}

#[test]
fn count_cap_keeps_the_hundred_most_recent() {
    let (log, clock) = activity_log(ActivityLogPolicy::default());
    for index in 0..150 {
        log.log_lead_created(&lead(&format!("lead_{index}")))
            .expect("logged");
        clock.advance(TimeDelta::seconds(1));
    }

    let retained = log.recent_activities(500);
    assert_eq!(retained.len(), 100);
    let expected = (50..150)
        .rev()
        .map(|index| format!("lead_{index}"))
        .collect::<Vec<_>>();
    let actual = retained
        .iter()
        .map(|record| record.subject_id.clone())
        .collect::<Vec<_>>();
    assert_eq!(actual, expected);
}

#[test]
fn count_cap_holds_when_timestamps_tie() {
    let (log, _) = activity_log(ActivityLogPolicy::default());
    for index in 0..150 {
        log.log_lead_created(&lead(&format!("lead_{index}")));
    }
    let retained = log.recent_activities(500);
    assert_eq!(retained.len(), 100);
    assert_eq!(retained[0].subject_id, "lead_149");
    assert_eq!(retained[99].subject_id, "lead_50");
}

#[test]
fn purge_drops_records_past_the_age_cap() {
    let (log, clock) = activity_log(on_open_policy());

    clock.set(start() - TimeDelta::days(8));
    log.log_lead_created(&lead("stale"));
    clock.set(start());
    log.log_lead_created(&lead("fresh"));

    assert_eq!(log.activities_for_subject("stale").len(), 1);
    assert_eq!(log.purge_expired(), 1);
    assert!(log.activities_for_subject("stale").is_empty());

    let cutoff = start() - TimeDelta::days(7);
    assert!(
        log.recent_activities(100)
            .iter()
            .all(|record| record.timestamp >= cutoff)
    );
    assert_eq!(log.purge_expired(), 0);
}

#[test]
fn opening_the_log_purges_expired_records() {
    let store = Arc::new(InMemoryKeyValueStore::new());
    let clock = Arc::new(ManualClock::new(start() - TimeDelta::days(8)));
    let first = ActivityLog::open(store.clone(), clock.clone(), on_open_policy());
    first.log_lead_created(&lead("stale"));

    clock.set(start());
    let reopened = ActivityLog::open(store, clock, on_open_policy());
    assert!(reopened.recent_activities(100).is_empty());
}

#[test]
fn on_write_policy_evicts_stale_records_during_writes() {
    let (log, clock) = activity_log(ActivityLogPolicy::default());

    clock.set(start() - TimeDelta::days(8));
    log.log_lead_created(&lead("stale"));
    clock.set(start());
    log.log_lead_created(&lead("fresh"));

    assert!(log.activities_for_subject("stale").is_empty());
    assert_eq!(log.activities_for_subject("fresh").len(), 1);
}

#[test]
fn on_open_policy_keeps_stale_records_until_purged() {
    let (log, clock) = activity_log(on_open_policy());

    clock.set(start() - TimeDelta::days(8));
    log.log_lead_created(&lead("stale"));
    clock.set(start());
    for index in 0..3 {
        log.log_lead_created(&lead(&format!("fresh_{index}")));
    }

    assert_eq!(log.recent_activities(100).len(), 4);
}

#[test]
fn subject_and_kind_filters_are_exact_and_newest_first() {
    let (log, clock) = activity_log(ActivityLogPolicy::default());
    let target = lead("lead_x");
    let property = Property {
        id: "lead_x_lookalike".to_string(),
        title: "Unit 4".to_string(),
        status: "Available".to_string(),
        property_type: None,
    };

    log.log_lead_created(&target);
    clock.advance(TimeDelta::minutes(1));
    log.log_lead_created(&lead("lead_y"));
    clock.advance(TimeDelta::minutes(1));
    log.log_property_created(&property, 1);
    clock.advance(TimeDelta::minutes(1));
    log.log_status_change(&target, "Cold", "Warm");
    clock.advance(TimeDelta::minutes(1));
    log.log_lead_contacted(&target, Some("Warm"));

    let for_subject = log.activities_for_subject("lead_x");
    let kinds = for_subject
        .iter()
        .map(|record| record.kind)
        .collect::<Vec<_>>();
    assert_eq!(
        kinds,
        vec![
            ActivityKind::LeadContacted,
            ActivityKind::LeadStatusChanged,
            ActivityKind::LeadCreated
        ]
    );
    assert!(
        for_subject
            .windows(2)
            .all(|pair| pair[0].timestamp >= pair[1].timestamp)
    );

    let created = log.activities_of_kind(ActivityKind::LeadCreated);
    assert_eq!(created.len(), 2);
    assert_eq!(created[0].subject_id, "lead_y");
    assert_eq!(log.activities_of_kind(ActivityKind::PropertyCreated).len(), 1);
    assert!(log.activities_of_kind(ActivityKind::LeadDeleted).is_empty());
}

#[test]
fn reads_resort_out_of_order_timestamps() {
    let (log, clock) = activity_log(on_open_policy());
    log.log_lead_created(&lead("later"));
    clock.rewind(TimeDelta::hours(2));
    log.log_lead_created(&lead("earlier"));

    let recent = log.recent_activities(10);
    assert_eq!(recent[0].subject_id, "later");
    assert_eq!(recent[1].subject_id, "earlier");
}

fn seed_stats_scenario(log: &ActivityLog, clock: &ManualClock) {
    for (offset, id) in [
        (TimeDelta::days(10), "ten_days"),
        (TimeDelta::days(2), "two_days"),
        (TimeDelta::hours(1), "one_hour"),
        (TimeDelta::zero(), "now"),
    ] {
        clock.set(start() - offset);
        log.log_lead_created(&lead(id));
    }
    clock.set(start());
}

#[test]
fn stats_with_age_eviction_on_write() {
    let (log, clock) = activity_log(ActivityLogPolicy::default());
    seed_stats_scenario(&log, &clock);

    let stats = log.stats();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.today, 2);
    assert_eq!(stats.this_week, 3);
}

#[test]
fn stats_with_age_eviction_on_open() {
    let (log, clock) = activity_log(on_open_policy());
    seed_stats_scenario(&log, &clock);

    let stats = log.stats();
    assert_eq!(stats.total, 4);
    assert_eq!(stats.today, 2);
    assert_eq!(stats.this_week, 3);
}

#[test]
fn concurrent_writers_lose_no_records() {
    let clock = Arc::new(ManualClock::new(start()));
    let log = Arc::new(ActivityLog::open(
        Arc::new(InMemoryKeyValueStore::new()),
        clock,
        ActivityLogPolicy::default(),
    ));

    let handles = (0..8)
        .map(|worker| {
            let log = Arc::clone(&log);
            thread::spawn(move || {
                (0..10)
                    .filter_map(|index| {
                        log.log_activity(NewActivity::lead_deleted(
                            &format!("lead_{worker}_{index}"),
                            "Removed",
                        ))
                    })
                    .map(|record| record.id)
                    .collect::<Vec<_>>()
            })
        })
        .collect::<Vec<_>>();

    let mut written = HashSet::new();
    for handle in handles {
        written.extend(handle.join().expect("writer thread"));
    }
    assert_eq!(written.len(), 80);

    let stored = log
        .recent_activities(100)
        .into_iter()
        .map(|record| record.id)
        .collect::<HashSet<_>>();
    assert_eq!(stored, written);
}

#[test]
fn concurrent_writers_on_the_file_store_lose_no_records() {
    let temp = tempfile::tempdir().expect("temp dir");
    let store: Arc<dyn KeyValueStore> = Arc::new(FileKeyValueStore::open(
        temp.path().join("preferences.v1.json"),
    ));
    let log = Arc::new(ActivityLog::open(
        store,
        Arc::new(ManualClock::new(start())),
        ActivityLogPolicy::default(),
    ));

    let handles = (0..4)
        .map(|worker| {
            let log = Arc::clone(&log);
            thread::spawn(move || {
                for index in 0..5 {
                    log.log_lead_created(&lead(&format!("lead_{worker}_{index}")));
                }
            })
        })
        .collect::<Vec<_>>();
    for handle in handles {
        handle.join().expect("writer thread");
    }

    let reopened = ActivityLog::open(
        Arc::new(FileKeyValueStore::open(temp.path().join("preferences.v1.json"))),
        Arc::new(ManualClock::new(start())),
        ActivityLogPolicy::default(),
    );
    assert_eq!(reopened.recent_activities(100).len(), 20);
    assert_eq!(reopened.stats().total, 20);
}
