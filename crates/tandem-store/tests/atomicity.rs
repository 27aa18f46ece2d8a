//! Concurrency and durability guarantees of the local store.
//!
//! Expectation: concurrent writers of one key end with exactly one success,
//! and a failed document write leaves no trace in memory.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use serde_json::json;
use tandem_core::{
    DecisionKey, DecisionRecord, DecisionType, Features, ParameterValues, ParticipantUnit,
    PolicyParameters, UnitKind,
};
use tandem_store::{EntityStore, LocalStore, StoreError};
use time::OffsetDateTime;

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("tandem_atomicity_{name}_{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap_or_else(|e| panic!("failed to create temp dir: {e}"));
    dir
}

fn unit(id: &str) -> ParticipantUnit {
    ParticipantUnit {
        unit_id: id.to_string(),
        kind: UnitKind::Dyad,
        metadata: Features::from([("cp_id".to_string(), json!("cp-1"))]),
        created_at: OffsetDateTime::now_utc(),
    }
}

fn decision(unit_id: &str, index: u64, seed: u64) -> DecisionRecord {
    DecisionRecord {
        id: tandem_core::short_id(),
        unit_id: unit_id.to_string(),
        decision_index: index,
        decision_type: DecisionType::DyadGame,
        state: json!([25.0, 24.5, 23.0, 22.5]),
        action: json!(1),
        action_probability: 0.5,
        random_seed: seed,
        parameters_id: "p0".to_string(),
        raw_context: Features::new(),
        request_timestamp: "2025-01-01T12:00:00".to_string(),
        received_at: OffsetDateTime::now_utc(),
    }
}

#[test]
fn concurrent_duplicate_decisions_yield_one_success() {
    let store = Arc::new(LocalStore::in_memory());
    store.insert_unit(unit("g1")).expect("unit");

    let handles: Vec<_> = (0..16)
        .map(|seed| {
            let store = Arc::clone(&store);
            thread::spawn(move || store.insert_decision(decision("g1", 0, seed)))
        })
        .collect();

    let results: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("thread panicked"))
        .collect();
    let successes = results.iter().filter(|r| r.is_ok()).count();
    let duplicates = results
        .iter()
        .filter(|r| matches!(r, Err(StoreError::Duplicate { .. })))
        .count();
    assert_eq!(successes, 1);
    assert_eq!(duplicates, 15);
    assert_eq!(store.decisions_for_unit("g1").expect("list").len(), 1);
}

#[test]
fn concurrent_registrations_of_one_id_yield_one_success() {
    let store = Arc::new(LocalStore::in_memory());
    let successes: usize = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| store.insert_unit(unit("d1")).is_ok()))
            .collect();
        handles
            .into_iter()
            .map(|h| usize::from(h.join().expect("thread panicked")))
            .sum()
    });
    assert_eq!(successes, 1);
}

#[test]
fn file_store_survives_reopen() {
    let path = temp_dir("reopen").join("store.json");
    {
        let store = LocalStore::open_json(&path).expect("open");
        store.insert_unit(unit("g1")).expect("unit");
        store.insert_decision(decision("g1", 0, 1)).expect("decision");
        store
            .insert_parameters(PolicyParameters::new(ParameterValues::from([(
                "probability_of_action".to_string(),
                json!(0.5),
            )])))
            .expect("params");
    }

    let reopened = LocalStore::open_json(&path).expect("reopen");
    assert!(reopened.unit("g1").expect("read").is_some());
    assert!(reopened
        .decision(&DecisionKey::new("g1", 0))
        .expect("read")
        .is_some());
    let latest = reopened.latest_parameters().expect("read").expect("snapshot");
    assert_eq!(latest.values["probability_of_action"], json!(0.5));

    // The reloaded store still enforces uniqueness.
    let err = reopened
        .insert_decision(decision("g1", 0, 2))
        .expect_err("duplicate");
    assert!(matches!(err, StoreError::Duplicate { .. }));
}

#[test]
fn separate_handles_on_one_document_see_each_others_writes() {
    let path = temp_dir("two_handles").join("store.json");
    let a = LocalStore::open_json(&path).expect("open a");
    let b = LocalStore::open_json(&path).expect("open b");

    a.insert_unit(unit("g1")).expect("unit via a");
    assert!(b.unit("g1").expect("read via b").is_some());

    a.insert_decision(decision("g1", 0, 1)).expect("decision via a");
    let err = b
        .insert_decision(decision("g1", 0, 2))
        .expect_err("second writer of one key");
    assert!(matches!(err, StoreError::Duplicate { .. }));

    a.insert_unit(unit("ua")).expect("ua via a");
    b.insert_unit(unit("ub")).expect("ub via b");

    let reopened = LocalStore::open_json(&path).expect("reopen");
    assert!(reopened.unit("ua").expect("read").is_some());
    assert!(reopened.unit("ub").expect("read").is_some());
    let stored = reopened
        .decision(&DecisionKey::new("g1", 0))
        .expect("read")
        .expect("decision");
    assert_eq!(stored.random_seed, 1);
}

#[test]
fn racing_handles_on_one_document_yield_one_success() {
    let path = temp_dir("racing_handles").join("store.json");
    LocalStore::open_json(&path)
        .expect("open")
        .insert_unit(unit("g1"))
        .expect("unit");

    let handles: Vec<_> = (0..8)
        .map(|seed| {
            let path = path.clone();
            thread::spawn(move || {
                let store = LocalStore::open_json(&path).expect("open handle");
                store.insert_decision(decision("g1", 0, seed))
            })
        })
        .collect();
    let results: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("thread panicked"))
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(StoreError::Duplicate { .. })))
            .count(),
        7
    );
    let reopened = LocalStore::open_json(&path).expect("reopen");
    assert_eq!(reopened.decisions_for_unit("g1").expect("list").len(), 1);
}

#[test]
fn failed_document_write_rolls_back_insert() {
    let dir = temp_dir("rollback");
    let path = dir.join("store.json");
    let store = LocalStore::open_json(&path).expect("open");

    // A directory squatting on the temp file name makes the write fail,
    // independent of the permissions of the user running the test.
    let blocker = dir.join("store.json.tmp");
    fs::create_dir_all(&blocker).expect("blocker");

    let err = store.insert_unit(unit("g1")).expect_err("write must fail");
    assert!(matches!(err, StoreError::Io { .. }));
    assert!(store.unit("g1").expect("read").is_none());

    fs::remove_dir_all(&blocker).expect("remove blocker");
    store.insert_unit(unit("g1")).expect("retry succeeds");
    assert!(store.unit("g1").expect("read").is_some());
}

#[test]
fn backup_is_a_loadable_copy() {
    let dir = temp_dir("backup");
    let store = LocalStore::open_json(dir.join("store.json")).expect("open");
    store.insert_unit(unit("g1")).expect("unit");

    let backup = dir.join("backups").join("store.backup.json");
    store.backup_to(&backup).expect("backup");
    let copy = LocalStore::open_json(&backup).expect("open backup");
    assert!(copy.unit("g1").expect("read").is_some());
}

#[test]
fn corrupt_document_is_reported() {
    let dir = temp_dir("corrupt");
    let path = dir.join("store.json");
    fs::write(&path, "{ not json").expect("write");
    let err = LocalStore::open_json(&path).expect_err("corrupt");
    assert!(matches!(err, StoreError::Corrupt { .. }));
}
