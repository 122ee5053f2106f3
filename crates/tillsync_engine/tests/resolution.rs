//! Integration tests for manual and rule-based conflict resolution.

use chrono::{Duration, Utc};
use serde_json::{json, Value};

use tillsync_engine::EngineError;
use tillsync_model::{Mutation, RecordId};
use tillsync_protocol::{
    ConflictKind, EntryStatus, MergePolicy, MergeRule, Resolution, SyncConflict,
};
use tillsync_testkit::{fields, order_row, pos_config, TestEngine};

fn ord(id: &str) -> RecordId {
    RecordId::from_trusted(id)
}

/// Journals an offline update to `ord-1`, then lets another terminal
/// overwrite the row afterwards. Replay leaves a version conflict open.
fn diverged(fixture: &TestEngine, local_patch: Value, remote_patch: Value) -> SyncConflict {
    fixture
        .remote
        .seed("orders", order_row("ord-1", "open", 1500));
    fixture.select_one("orders", &ord("ord-1")).unwrap();
    fixture.set_online(false);
    fixture
        .mutate(Mutation::update("orders", ord("ord-1"), fields(local_patch)))
        .unwrap();
    fixture.remote.write_as_other_terminal(
        "orders",
        "ord-1",
        fields(remote_patch),
        Utc::now() + Duration::seconds(60),
    );
    let report = fixture.trigger_sync().unwrap();
    assert_eq!(report.conflicts, 1);
    fixture.list_conflicts().unwrap().remove(0)
}

#[test]
fn local_wins_forces_the_full_cached_row_remote() {
    let fixture = TestEngine::memory();
    let conflict = diverged(&fixture, json!({"status": "paid"}), json!({"status": "void"}));
    assert_eq!(conflict.kind, ConflictKind::Version);

    let resolved = fixture
        .resolve_conflict(&conflict.id, Resolution::LocalWins, None, "manager-7")
        .unwrap();
    assert_eq!(resolved.resolution, Some(Resolution::LocalWins));
    assert_eq!(resolved.resolved_by.as_deref(), Some("manager-7"));
    assert!(resolved.resolved_at.is_some());

    let remote_row = fixture.remote.row("orders", "ord-1").unwrap();
    assert_eq!(remote_row["status"], json!("paid"));
    assert_eq!(remote_row["total_cents"], json!(1500));

    let cached = fixture
        .local()
        .select_one("orders", &ord("ord-1"))
        .unwrap()
        .unwrap();
    assert_eq!(cached["status"], json!("paid"));

    assert!(fixture.list_conflicts().unwrap().is_empty());
    let counts = fixture.local().journal_counts().unwrap();
    assert_eq!(counts.synced, 1);
    assert_eq!(counts.conflict, 0);
}

#[test]
fn remote_wins_adopts_the_remote_snapshot() {
    let fixture = TestEngine::memory();
    let conflict = diverged(&fixture, json!({"status": "paid"}), json!({"status": "void"}));

    fixture
        .resolve_conflict(&conflict.id, Resolution::RemoteWins, None, "manager-7")
        .unwrap();

    // The remote row keeps the other terminal's write; the cache drops ours.
    assert_eq!(
        fixture.remote.row("orders", "ord-1").unwrap()["status"],
        json!("void")
    );
    let cached = fixture
        .local()
        .select_one("orders", &ord("ord-1"))
        .unwrap()
        .unwrap();
    assert_eq!(cached["status"], json!("void"));

    let entry = fixture
        .local()
        .journal_entry(&conflict.journal_entry_id)
        .unwrap()
        .unwrap();
    assert_eq!(entry.status, EntryStatus::Synced);
}

#[test]
fn concurrent_total_edits_record_both_snapshots() {
    // A sale edited on two terminals at once: ours to 1200 while offline,
    // theirs to 1500 with a later timestamp.
    let fixture = TestEngine::memory();
    fixture
        .remote
        .seed("orders", order_row("ord-1", "pending", 1000));
    fixture.select_one("orders", &ord("ord-1")).unwrap();

    fixture.set_online(false);
    fixture
        .mutate(Mutation::update(
            "orders",
            ord("ord-1"),
            fields(json!({"total_cents": 1200})),
        ))
        .unwrap();
    fixture.remote.write_as_other_terminal(
        "orders",
        "ord-1",
        fields(json!({"total_cents": 1500})),
        Utc::now() + Duration::seconds(60),
    );

    fixture.trigger_sync().unwrap();
    let conflict = fixture.list_conflicts().unwrap().remove(0);
    assert_eq!(conflict.kind, ConflictKind::Version);
    assert_eq!(conflict.local_snapshot["total_cents"], json!(1200));
    assert_eq!(
        conflict.remote_snapshot.as_ref().unwrap()["total_cents"],
        json!(1500)
    );
    // Detection never touches the authoritative row.
    assert_eq!(
        fixture.remote.row("orders", "ord-1").unwrap()["total_cents"],
        json!(1500)
    );

    fixture
        .resolve_conflict(&conflict.id, Resolution::RemoteWins, None, "manager-7")
        .unwrap();
    let cached = fixture
        .local()
        .select_one("orders", &ord("ord-1"))
        .unwrap()
        .unwrap();
    assert_eq!(cached["total_cents"], json!(1500));
}

#[test]
fn merged_resolution_applies_the_supplied_payload() {
    let fixture = TestEngine::memory();
    let conflict = diverged(&fixture, json!({"status": "paid"}), json!({"status": "void"}));

    let merged = fields(json!({
        "status": "paid",
        "total_cents": 1500,
        "note": "till 2 voided in error",
    }));
    let resolved = fixture
        .resolve_conflict(&conflict.id, Resolution::Merged, Some(merged), "manager-7")
        .unwrap();
    assert_eq!(resolved.resolution, Some(Resolution::Merged));
    assert_eq!(
        resolved.resolved_payload.as_ref().unwrap()["note"],
        json!("till 2 voided in error")
    );

    let remote_row = fixture.remote.row("orders", "ord-1").unwrap();
    assert_eq!(remote_row["status"], json!("paid"));
    assert_eq!(remote_row["note"], json!("till 2 voided in error"));
    let cached = fixture
        .local()
        .select_one("orders", &ord("ord-1"))
        .unwrap()
        .unwrap();
    assert_eq!(cached["note"], json!("till 2 voided in error"));
}

#[test]
fn merged_without_payload_or_rules_is_rejected() {
    let fixture = TestEngine::memory();
    let conflict = diverged(&fixture, json!({"status": "paid"}), json!({"status": "void"}));

    let err = fixture
        .resolve_conflict(&conflict.id, Resolution::Merged, None, "manager-7")
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::MergedPayloadRequired { conflict_id } if conflict_id == conflict.id
    ));

    // The conflict stays open and resolvable.
    assert_eq!(fixture.list_conflicts().unwrap().len(), 1);
    let entry = fixture
        .local()
        .journal_entry(&conflict.journal_entry_id)
        .unwrap()
        .unwrap();
    assert_eq!(entry.status, EntryStatus::Conflict);
}

#[test]
fn merge_rules_compute_the_payload_when_omitted() {
    let policy = MergePolicy::new()
        .with_table("orders", [("total_cents".to_string(), MergeRule::TakeMax)])
        .unwrap();
    let fixture = TestEngine::with_config(pos_config("store-1").with_merge_policy(policy));
    let conflict = diverged(
        &fixture,
        json!({"total_cents": 1800}),
        json!({"total_cents": 1500, "status": "paid"}),
    );

    let resolved = fixture
        .resolve_conflict(&conflict.id, Resolution::Merged, None, "manager-3")
        .unwrap();
    assert_eq!(resolved.resolution, Some(Resolution::Merged));
    assert_eq!(
        resolved.resolved_payload.as_ref().unwrap()["total_cents"],
        json!(1800)
    );

    // Ruled field takes the larger side; unruled fields keep remote values.
    let remote_row = fixture.remote.row("orders", "ord-1").unwrap();
    assert_eq!(remote_row["total_cents"], json!(1800));
    assert_eq!(remote_row["status"], json!("paid"));
}

#[test]
fn resolving_twice_reports_already_resolved() {
    let fixture = TestEngine::memory();
    let conflict = diverged(&fixture, json!({"status": "paid"}), json!({"status": "void"}));

    fixture
        .resolve_conflict(&conflict.id, Resolution::LocalWins, None, "manager-7")
        .unwrap();
    let err = fixture
        .resolve_conflict(&conflict.id, Resolution::RemoteWins, None, "manager-7")
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::AlreadyResolved { conflict_id } if conflict_id == conflict.id
    ));
}

#[test]
fn unknown_conflict_ids_are_a_typed_error() {
    let fixture = TestEngine::memory();
    let err = fixture
        .resolve_conflict("no-such-conflict", Resolution::LocalWins, None, "manager-7")
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::ConflictNotFound { conflict_id } if conflict_id == "no-such-conflict"
    ));
}

#[test]
fn remote_wins_on_a_vanished_row_clears_the_cache() {
    let fixture = TestEngine::memory();
    fixture
        .remote
        .seed("orders", order_row("ord-1", "open", 1500));
    fixture.select_one("orders", &ord("ord-1")).unwrap();
    fixture.set_online(false);
    fixture
        .mutate(Mutation::update(
            "orders",
            ord("ord-1"),
            fields(json!({"status": "paid"})),
        ))
        .unwrap();
    fixture.remote.delete_as_other_terminal("orders", "ord-1");

    fixture.trigger_sync().unwrap();
    let conflict = fixture.list_conflicts().unwrap().remove(0);
    assert_eq!(conflict.kind, ConflictKind::Delete);
    assert!(conflict.remote_snapshot.is_none());

    fixture
        .resolve_conflict(&conflict.id, Resolution::RemoteWins, None, "manager-7")
        .unwrap();
    assert!(fixture.remote.row("orders", "ord-1").is_none());
    assert!(fixture
        .local()
        .select_one("orders", &ord("ord-1"))
        .unwrap()
        .is_none());
    let entry = fixture
        .local()
        .journal_entry(&conflict.journal_entry_id)
        .unwrap()
        .unwrap();
    assert_eq!(entry.status, EntryStatus::Synced);
}

#[test]
fn merging_a_delete_conflict_requires_an_explicit_payload() {
    // Rules exist for the table, but a delete conflict has no remote side
    // to merge with.
    let policy = MergePolicy::new()
        .with_table("orders", [("total_cents".to_string(), MergeRule::TakeMax)])
        .unwrap();
    let fixture = TestEngine::with_config(pos_config("store-1").with_merge_policy(policy));
    fixture
        .remote
        .seed("orders", order_row("ord-1", "open", 1500));
    fixture.select_one("orders", &ord("ord-1")).unwrap();
    fixture.set_online(false);
    fixture
        .mutate(Mutation::update(
            "orders",
            ord("ord-1"),
            fields(json!({"status": "paid"})),
        ))
        .unwrap();
    fixture.remote.delete_as_other_terminal("orders", "ord-1");
    fixture.trigger_sync().unwrap();
    let conflict = fixture.list_conflicts().unwrap().remove(0);

    let err = fixture
        .resolve_conflict(&conflict.id, Resolution::Merged, None, "manager-7")
        .unwrap_err();
    assert!(matches!(err, EngineError::MergedPayloadRequired { .. }));
}

#[test]
fn clean_replay_supersedes_a_stale_conflict() {
    let fixture = TestEngine::memory();
    let conflict = diverged(&fixture, json!({"status": "paid"}), json!({"status": "void"}));

    // The other terminal's edit is later rolled back, leaving the remote
    // row older than our queued write.
    fixture.remote.write_as_other_terminal(
        "orders",
        "ord-1",
        fields(json!({})),
        Utc::now() - Duration::hours(1),
    );
    fixture.retry_entry(&conflict.journal_entry_id).unwrap();
    let report = fixture.trigger_sync().unwrap();
    assert_eq!(report.synced, 1);
    assert_eq!(report.conflicts, 0);

    assert_eq!(
        fixture.remote.row("orders", "ord-1").unwrap()["status"],
        json!("paid")
    );

    // The old conflict record is closed out rather than left dangling.
    assert!(fixture.list_conflicts().unwrap().is_empty());
    let superseded = fixture.local().conflict(&conflict.id).unwrap().unwrap();
    assert_eq!(superseded.resolution, Some(Resolution::LocalWins));
    assert_eq!(superseded.resolved_by.as_deref(), Some("replay"));
}

#[test]
fn resolution_unblocks_queued_entries_behind_it() {
    let fixture = TestEngine::memory();
    fixture
        .remote
        .seed("orders", order_row("ord-1", "open", 1500));
    fixture.select_one("orders", &ord("ord-1")).unwrap();
    fixture.set_online(false);
    fixture
        .mutate(Mutation::update(
            "orders",
            ord("ord-1"),
            fields(json!({"status": "paid"})),
        ))
        .unwrap();
    fixture
        .mutate(Mutation::update(
            "orders",
            ord("ord-1"),
            fields(json!({"discount_cents": 50})),
        ))
        .unwrap();
    fixture.remote.write_as_other_terminal(
        "orders",
        "ord-1",
        fields(json!({"status": "void"})),
        Utc::now() + Duration::seconds(60),
    );

    let first = fixture.trigger_sync().unwrap();
    assert_eq!(first.conflicts, 1);
    assert_eq!(first.skipped, 1);

    let conflict = fixture.list_conflicts().unwrap().remove(0);
    fixture
        .resolve_conflict(&conflict.id, Resolution::LocalWins, None, "manager-7")
        .unwrap();
    // The forced push carried the whole cached row, discount included.
    assert_eq!(
        fixture.remote.row("orders", "ord-1").unwrap()["discount_cents"],
        json!(50)
    );

    // The queued discount entry now settles as already applied.
    let second = fixture.trigger_sync().unwrap();
    assert_eq!(second.synced, 1);
    assert_eq!(second.conflicts, 0);
    assert_eq!(second.skipped, 0);

    let counts = fixture.local().journal_counts().unwrap();
    assert_eq!(counts.synced, 2);
    assert_eq!(counts.pending, 0);
    assert_eq!(counts.conflict, 0);
}
