// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::wire::EncryptedContent;
use std::sync::Arc;

#[tokio::test]
async fn create_session_allocates_strictly_increasing_user_seq() {
    let store = Store::new();
    let a = store.create_session("a", "meta-a".into(), None).await;
    let b = store.create_session("b", "meta-b".into(), None).await;
    assert!(b.seq > a.seq);
}

#[tokio::test]
async fn recreating_existing_tag_preserves_id_and_bumps_metadata_version() {
    let store = Store::new();
    let first = store.create_session("t", "one".into(), None).await;
    let second = store.create_session("t", "two".into(), None).await;
    assert_eq!(first.id, second.id);
    assert_eq!(second.metadata, "two");
    assert_eq!(second.metadata_version, 2);
}

#[tokio::test]
async fn message_seq_is_monotonic_within_a_session() {
    let store = Store::new();
    let session = store.create_session("t", "m".into(), None).await;
    let m1 = store.append_message(&session.id, EncryptedContent::wrap("a"), None).await.unwrap();
    let m2 = store.append_message(&session.id, EncryptedContent::wrap("b"), None).await.unwrap();
    assert_eq!(m1.seq, 1);
    assert_eq!(m2.seq, 2);
}

#[tokio::test]
async fn append_message_to_missing_session_returns_none() {
    let store = Store::new();
    assert!(store.append_message("nope", EncryptedContent::wrap("a"), None).await.is_none());
}

#[tokio::test]
async fn list_messages_with_limit_under_total_stays_newest_first() {
    let store = Store::new();
    let session = store.create_session("t", "m".into(), None).await;
    for c in ["a", "b", "c", "d"] {
        store.append_message(&session.id, EncryptedContent::wrap(c), None).await.unwrap();
    }
    let last_two = store.list_messages(&session.id, 2).await;
    assert_eq!(last_two.len(), 2);
    assert_eq!(last_two[0].seq, 4);
    assert_eq!(last_two[1].seq, 3);
}

#[tokio::test]
async fn occ_write_with_stale_version_is_rejected_without_mutation() {
    let store = Store::new();
    let session = store.create_session("t", "one".into(), None).await;
    let result = store.update_session_metadata(&session.id, "two".into(), 99).await.unwrap();
    match result {
        WriteResult::VersionMismatch { version, value } => {
            assert_eq!(version, 1);
            assert_eq!(value, "one");
        }
        WriteResult::Success { .. } => panic!("expected version mismatch"),
    }
    let unchanged = store.get_session(&session.id).await.unwrap();
    assert_eq!(unchanged.metadata, "one");
    assert_eq!(unchanged.metadata_version, 1);
}

#[tokio::test]
async fn occ_write_with_matching_version_succeeds_and_bumps_version() {
    let store = Store::new();
    let session = store.create_session("t", "one".into(), None).await;
    let result = store.update_session_metadata(&session.id, "two".into(), 1).await.unwrap();
    match result {
        WriteResult::Success { version, value } => {
            assert_eq!(version, 2);
            assert_eq!(value, "two");
        }
        WriteResult::VersionMismatch { .. } => panic!("expected success"),
    }
}

#[tokio::test]
async fn exactly_one_of_two_concurrent_writers_with_the_same_expected_version_succeeds() {
    let store = Arc::new(Store::new());
    let session = store.create_session("t", "base".into(), None).await;
    let id = session.id.clone();

    let store_a = Arc::clone(&store);
    let id_a = id.clone();
    let a = tokio::spawn(async move { store_a.update_session_metadata(&id_a, "x".into(), 1).await });
    let store_b = Arc::clone(&store);
    let id_b = id.clone();
    let b = tokio::spawn(async move { store_b.update_session_metadata(&id_b, "y".into(), 1).await });

    let (r_a, r_b) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());
    let successes = [&r_a, &r_b].iter().filter(|r| matches!(r, WriteResult::Success { .. })).count();
    assert_eq!(successes, 1);

    let final_session = store.get_session(&id).await.unwrap();
    assert_eq!(final_session.metadata_version, 2);
}

#[tokio::test]
async fn delete_session_removes_tag_index_and_messages() {
    let store = Store::new();
    let session = store.create_session("t", "m".into(), None).await;
    store.append_message(&session.id, EncryptedContent::wrap("a"), None).await;
    assert!(store.delete_session(&session.id).await);
    assert!(store.get_session_by_tag("t").await.is_none());
    assert!(store.list_messages(&session.id, 10).await.is_empty());
    assert!(!store.delete_session(&session.id).await);
}

#[tokio::test]
async fn artifact_header_and_body_version_independently() {
    let store = Store::new();
    let artifact = store.create_artifact("a1", "h".into(), "b".into(), None).await;
    let header_result = store.update_artifact_header(&artifact.id, "h2".into(), 1).await.unwrap();
    assert!(matches!(header_result, WriteResult::Success { version: 2, .. }));
    let body = store.get_artifact(&artifact.id).await.unwrap();
    assert_eq!(body.body_version, 1);
}

#[tokio::test]
async fn snapshot_restore_round_trips_full_state() {
    let store = Store::new();
    let session = store.create_session("t", "m".into(), None).await;
    store.append_message(&session.id, EncryptedContent::wrap("a"), None).await;
    store.upsert_machine("mach", "meta".into(), None, None).await;
    store.create_artifact("art", "h".into(), "b".into(), None).await;

    let snapshot = store.snapshot().await;

    let restored = Store::new();
    restored.restore(snapshot.clone()).await;
    let round_tripped = restored.snapshot().await;

    assert_eq!(snapshot.next_user_seq, round_tripped.next_user_seq);
    assert_eq!(snapshot.sessions.len(), round_tripped.sessions.len());
    assert_eq!(snapshot.messages.len(), round_tripped.messages.len());
    assert_eq!(snapshot.machines.len(), round_tripped.machines.len());
    assert_eq!(snapshot.artifacts.len(), round_tripped.artifacts.len());
    assert_eq!(
        restored.get_session_by_tag("t").await.unwrap().id,
        session.id
    );
}

#[test]
fn load_tolerates_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nonexistent.json");
    assert!(snapshot::load(&path).is_none());
}

#[test]
fn load_tolerates_corrupt_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corrupt.json");
    std::fs::write(&path, b"not json at all").unwrap();
    assert!(snapshot::load(&path).is_none());
}

#[test]
fn load_tolerates_unknown_schema_version() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("old.json");
    std::fs::write(&path, br#"{"schema_version": 999}"#).unwrap();
    assert!(snapshot::load(&path).is_none());
}

#[test]
fn save_then_load_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    let mut snap = StoreSnapshot::default();
    snap.next_user_seq = 7;
    snapshot::save(&path, &snap).unwrap();
    let loaded = snapshot::load(&path).unwrap();
    assert_eq!(loaded.next_user_seq, 7);
}
