//! Tests for the coordinator state and its stores.

use std::{fs::OpenOptions, io::Write};

use chrono::Utc;
use nomad_types::{
    Applicability, Change, ChangeId, ChangeRequest, ChangeRequestRecord, ChangeRequestState,
    MutationCount, Node, NodeContext, ServerMode, SettingChange, Version,
};
use proptest::prelude::*;
use test_case::test_case;

use crate::{
    CoordinatorState, FileStore, MemoryStore, RequestKind, StateChange, StateStore, StorageError,
    record::decode_frame,
};

// ============================================================================
// Helpers
// ============================================================================

fn init() -> StateChange {
    StateChange::new(RequestKind::Initialize).mode(ServerMode::Accepting)
}

fn record(version: u64, prev: Option<ChangeId>) -> ChangeRequestRecord {
    let result = NodeContext::alone(Node::new("n1", "localhost", 9410));
    let change = Change::Setting(SettingChange::set(
        Applicability::Cluster,
        "offheap",
        version.to_string(),
    ));
    ChangeRequestRecord::new(
        ChangeId::generate(),
        Utc::now(),
        ChangeRequest::prepared(Version::new(version), prev, change, Some(result), "h", "u"),
    )
}

fn prepare(record: &ChangeRequestRecord) -> StateChange {
    StateChange::new(RequestKind::Prepare)
        .mode(ServerMode::Prepared)
        .latest_change_id(record.id)
        .highest_version(record.version())
        .mutated_by("host", "user", Utc::now())
        .create_change(record.clone())
}

fn commit(record: &ChangeRequestRecord) -> StateChange {
    StateChange::new(RequestKind::Commit)
        .mode(ServerMode::Accepting)
        .current_version(record.version())
        .mutated_by("host", "user", Utc::now())
        .update_change_state(record.id, ChangeRequestState::Committed)
}

fn rollback(record: &ChangeRequestRecord) -> StateChange {
    StateChange::new(RequestKind::Rollback)
        .mode(ServerMode::Accepting)
        .mutated_by("host", "user", Utc::now())
        .update_change_state(record.id, ChangeRequestState::RolledBack)
}

/// Initializes `store` and commits `count` changes, returning the records.
fn populate(store: &mut impl StateStore, count: u64) -> Vec<ChangeRequestRecord> {
    store.apply(init()).unwrap();
    let mut prev = None;
    let mut records = Vec::new();
    for v in 1..=count {
        let r = record(v, prev);
        store.apply(prepare(&r)).unwrap();
        store.apply(commit(&r)).unwrap();
        prev = Some(r.id);
        records.push(r.with_state(ChangeRequestState::Committed));
    }
    records
}

// ============================================================================
// State Transition Tests
// ============================================================================

#[test]
fn initialize_creates_empty_accepting_state() {
    let mut state = CoordinatorState::new();
    assert!(!state.is_initialized());
    state.apply(&init()).unwrap();

    assert!(state.is_initialized());
    assert_eq!(state.mode(), ServerMode::Accepting);
    assert_eq!(state.mutation_count(), MutationCount::ZERO);
    assert_eq!(state.current_version(), Version::ZERO);
    assert_eq!(state.highest_version(), Version::ZERO);
    assert!(state.latest_change_id().is_none());
    assert!(state.history().is_empty());
}

#[test]
fn initialize_twice_fails() {
    let mut state = CoordinatorState::new();
    state.apply(&init()).unwrap();
    assert!(matches!(
        state.apply(&init()),
        Err(StorageError::AlreadyInitialized)
    ));
}

#[test]
fn mutations_require_initialization() {
    let mut state = CoordinatorState::new();
    let r = record(1, None);
    assert!(matches!(
        state.apply(&prepare(&r)),
        Err(StorageError::NotInitialized)
    ));
}

#[test]
fn every_mutation_bumps_count_by_one() {
    let mut state = CoordinatorState::new();
    state.apply(&init()).unwrap();
    let r = record(1, None);

    state.apply(&prepare(&r)).unwrap();
    assert_eq!(state.mutation_count().as_u64(), 1);
    assert_eq!(state.mode(), ServerMode::Prepared);
    assert_eq!(state.highest_version(), Version::new(1));
    assert_eq!(state.current_version(), Version::ZERO);

    state.apply(&commit(&r)).unwrap();
    assert_eq!(state.mutation_count().as_u64(), 2);
    assert_eq!(state.mode(), ServerMode::Accepting);
    assert_eq!(state.current_version(), Version::new(1));
    assert_eq!(state.change(&r.id).unwrap().state(), ChangeRequestState::Committed);

    state
        .apply(&StateChange::new(RequestKind::Takeover).mutated_by("other", "admin", Utc::now()))
        .unwrap();
    assert_eq!(state.mutation_count().as_u64(), 3);
    assert_eq!(state.last_mutation_host(), Some("other"));
    assert_eq!(state.last_mutation_user(), Some("admin"));
}

#[test]
fn duplicate_record_is_rejected_without_side_effects() {
    let mut state = CoordinatorState::new();
    state.apply(&init()).unwrap();
    let r = record(1, None);
    state.apply(&prepare(&r)).unwrap();
    state.apply(&rollback(&r)).unwrap();

    let before = state.clone();
    assert!(matches!(
        state.apply(&prepare(&r)),
        Err(StorageError::DuplicateChange(id)) if id == r.id
    ));
    assert_eq!(state, before);
}

#[test]
fn unknown_change_update_fails() {
    let mut state = CoordinatorState::new();
    state.apply(&init()).unwrap();
    let r = record(1, None);
    assert!(matches!(
        state.apply(&commit(&r)),
        Err(StorageError::UnknownChange(_))
    ));
    assert_eq!(state.mutation_count(), MutationCount::ZERO);
}

#[test]
fn terminal_records_never_move() {
    let mut state = CoordinatorState::new();
    state.apply(&init()).unwrap();
    let r = record(1, None);
    state.apply(&prepare(&r)).unwrap();
    state.apply(&commit(&r)).unwrap();

    assert!(matches!(
        state.apply(&rollback(&r)),
        Err(StorageError::InvalidTransition {
            from: ChangeRequestState::Committed,
            to: ChangeRequestState::RolledBack,
            ..
        })
    ));
}

#[test]
fn latest_committed_change_skips_rolled_back_and_prepared() {
    let mut state = CoordinatorState::new();
    state.apply(&init()).unwrap();

    let c1 = record(1, None);
    state.apply(&prepare(&c1)).unwrap();
    state.apply(&commit(&c1)).unwrap();

    let r2 = record(2, Some(c1.id));
    state.apply(&prepare(&r2)).unwrap();
    state.apply(&rollback(&r2)).unwrap();

    let p3 = record(3, Some(r2.id));
    state.apply(&prepare(&p3)).unwrap();

    assert_eq!(state.latest_change().unwrap().id, p3.id);
    assert_eq!(state.latest_committed_change().unwrap().id, c1.id);
    assert_eq!(state.current_version(), Version::new(1));
    assert_eq!(state.highest_version(), Version::new(3));
    assert_eq!(
        state.current_committed_config(),
        c1.result(),
        "committed config comes from the last committed record"
    );
}

// ============================================================================
// Memory Store Tests
// ============================================================================

#[test]
fn memory_store_reset_uninitializes() {
    let mut store = MemoryStore::new();
    populate(&mut store, 2);
    assert_eq!(store.state().history().len(), 2);

    store.reset().unwrap();
    assert!(!store.state().is_initialized());
    assert!(store.state().history().is_empty());
}

// ============================================================================
// File Store Tests
// ============================================================================

#[test]
fn file_store_replays_on_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let records = {
        let mut store = FileStore::open_in(dir.path(), true).unwrap();
        populate(&mut store, 3)
    };

    let store = FileStore::open_in(dir.path(), true).unwrap();
    let state = store.state();
    assert!(state.is_initialized());
    assert_eq!(state.mutation_count().as_u64(), 6);
    assert_eq!(state.current_version(), Version::new(3));
    assert_eq!(state.history(), records.as_slice());
}

#[test]
fn file_store_failed_apply_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.log");
    {
        let mut store = FileStore::open(&path, false).unwrap();
        store.apply(init()).unwrap();
        let r = record(1, None);
        assert!(store.apply(commit(&r)).is_err());
    }
    let len_after_init = std::fs::metadata(&path).unwrap().len();

    let store = FileStore::open(&path, false).unwrap();
    assert_eq!(store.state().mutation_count(), MutationCount::ZERO);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), len_after_init);
}

#[test]
fn file_store_truncates_torn_tail() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.log");
    {
        let mut store = FileStore::open(&path, true).unwrap();
        populate(&mut store, 1);
    }
    let good_len = std::fs::metadata(&path).unwrap().len();

    // Half a frame, as left behind by a crash mid-write.
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&0x4E4F_4D41u32.to_le_bytes()).unwrap();
    file.write_all(&100u32.to_le_bytes()).unwrap();
    file.write_all(&[1, 2, 3]).unwrap();
    drop(file);

    let store = FileStore::open(&path, true).unwrap();
    assert_eq!(store.state().mutation_count().as_u64(), 2);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), good_len);
}

#[test]
fn file_store_detects_corruption() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.log");
    {
        let mut store = FileStore::open(&path, true).unwrap();
        populate(&mut store, 1);
    }

    let mut bytes = std::fs::read(&path).unwrap();
    // Flip a bit in the first frame's payload.
    bytes[10] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    assert!(matches!(
        FileStore::open(&path, true),
        Err(StorageError::CorruptedRecord { position: 0 })
    ));
}

/// Start offset and length of every frame in the log at `path`.
fn frame_extents(path: &std::path::Path) -> Vec<(usize, usize)> {
    let bytes = std::fs::read(path).unwrap();
    let mut extents = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let (_, used) = decode_frame(&bytes[pos..], pos as u64).unwrap();
        extents.push((pos, used));
        pos += used;
    }
    extents
}

#[test_case(|_| 0 ; "start sentinel")]
#[test_case(|_| 4 ; "length low byte")]
#[test_case(|_| 7 ; "length high byte")]
#[test_case(|_| 10 ; "payload")]
#[test_case(|len| len - 5 ; "checksum")]
#[test_case(|len| len - 1 ; "end sentinel")]
fn file_store_refuses_damaged_middle_frame(offset_in_frame: fn(usize) -> usize) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.log");
    {
        let mut store = FileStore::open(&path, true).unwrap();
        populate(&mut store, 3);
    }
    let extents = frame_extents(&path);
    assert_eq!(extents.len(), 7);

    let (start, len) = extents[1];
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[start + offset_in_frame(len)] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    let result = FileStore::open(&path, true);
    assert!(
        matches!(result, Err(StorageError::CorruptedRecord { position }) if position == start as u64),
        "{result:?}"
    );
    // Nothing after the damage was thrown away.
    assert_eq!(std::fs::read(&path).unwrap(), bytes);
}

#[test]
fn file_store_refuses_partial_frame_before_history() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.log");
    let r = record(2, None);
    {
        let mut store = FileStore::open(&path, true).unwrap();
        populate(&mut store, 1);
    }
    let damaged_at = std::fs::metadata(&path).unwrap().len();

    // A partial frame, then more history appended behind it.
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&0x4E4F_4D41u32.to_le_bytes()).unwrap();
    file.write_all(&100u32.to_le_bytes()).unwrap();
    file.write_all(&[1, 2]).unwrap();
    drop(file);
    {
        // Reopening treats the partial frame as the torn tail.
        let mut store = FileStore::open(&path, true).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), damaged_at);
        store.apply(prepare(&r)).unwrap();
    }
    let mut bytes = std::fs::read(&path).unwrap();
    let tail = bytes.split_off(damaged_at as usize);
    bytes.extend_from_slice(&0x4E4F_4D41u32.to_le_bytes());
    bytes.extend_from_slice(&100u32.to_le_bytes());
    bytes.extend_from_slice(&tail);
    std::fs::write(&path, &bytes).unwrap();

    assert!(matches!(
        FileStore::open(&path, true),
        Err(StorageError::CorruptedRecord { position }) if position == damaged_at
    ));
}

#[test]
fn file_store_truncates_damaged_last_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.log");
    {
        let mut store = FileStore::open(&path, true).unwrap();
        populate(&mut store, 3);
    }
    let extents = frame_extents(&path);
    let (start, _) = extents[6];

    let mut bytes = std::fs::read(&path).unwrap();
    bytes[start] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    // The last commit is lost; everything before it survives.
    let store = FileStore::open(&path, true).unwrap();
    assert_eq!(store.state().mutation_count().as_u64(), 5);
    assert_eq!(store.state().mode(), ServerMode::Prepared);
    assert_eq!(store.state().current_version(), Version::new(2));
    assert_eq!(std::fs::metadata(&path).unwrap().len(), start as u64);
}

#[test]
fn file_store_reset_truncates_log() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = FileStore::open_in(dir.path(), true).unwrap();
    populate(&mut store, 2);

    store.reset().unwrap();
    assert!(!store.state().is_initialized());
    assert_eq!(std::fs::metadata(store.path()).unwrap().len(), 0);

    populate(&mut store, 1);
    drop(store);
    let reopened = FileStore::open_in(dir.path(), true).unwrap();
    assert_eq!(reopened.state().history().len(), 1);
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #[test]
    fn mutation_count_tracks_successful_mutations(ops in prop::collection::vec(0u8..3, 1..40)) {
        let mut state = CoordinatorState::new();
        state.apply(&init()).unwrap();

        let mut expected = 0u64;
        let mut version = 0u64;
        let mut open: Option<ChangeRequestRecord> = None;
        for op in ops {
            let change = match (op, &open) {
                (0, None) => {
                    version += 1;
                    let r = record(version, state.latest_change_id());
                    let change = prepare(&r);
                    open = Some(r);
                    change
                }
                (1, Some(r)) => {
                    let change = commit(r);
                    open = None;
                    change
                }
                (2, Some(r)) => {
                    let change = rollback(r);
                    open = None;
                    change
                }
                _ => StateChange::new(RequestKind::Takeover).mutated_by("h", "u", Utc::now()),
            };
            state.apply(&change).unwrap();
            expected += 1;
            prop_assert_eq!(state.mutation_count().as_u64(), expected);
            prop_assert!(state.highest_version() >= state.current_version());
            prop_assert_eq!(
                state.mode() == ServerMode::Prepared,
                state.latest_change().is_some_and(|r| r.state() == ChangeRequestState::Prepared)
            );
        }
    }
}
