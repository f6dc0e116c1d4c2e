mod common;

use std::sync::mpsc;

use common::*;
use partstage_contracts::{OperationEvent, OperationKind, ProgressSink};
use partstage_core::{DeviceSession, SessionError, SessionState};
use partstage_testing::{NativeCallKind, fixtures};
use partstage_types::{FileSystemRegistry, PartitionKind};

/// Stage [Create(X), Resize(root), Delete(swap)].
fn stage_three(session: &mut DeviceSession<partstage_testing::MemoryDisk>) {
    let tail = id_at(session, TAIL_FREE_START);
    session
        .create(tail, request(PartitionKind::Primary, "ext4", 100_000))
        .unwrap();
    let root = id_at(session, P1_START);
    session.resize(root, P1_START, 150_000).unwrap();
    let swap = id_at(session, L6_START);
    session.delete_partition(swap).unwrap();
    assert_eq!(session.log().len(), 3);
}

#[test]
fn commit_replays_in_log_order() {
    let mut session = msdos_session();
    stage_three(&mut session);
    session.native_mut().clear_journal();

    session.commit().unwrap();

    assert_eq!(
        session.native().mutations(),
        vec![
            NativeCallKind::Create,
            NativeCallKind::Format,
            NativeCallKind::Resize,
            NativeCallKind::Delete,
            NativeCallKind::WriteTable,
        ]
    );
    assert_eq!(session.state(), SessionState::Clean);
    assert!(session.log().is_empty());

    let disk = session.native();
    assert_eq!(disk.table_writes(), 1);
    assert_eq!(disk.partition_by_number(4).unwrap().fs_name, "ext4");
    assert_eq!(disk.partition_by_number(1).unwrap().end, 150_000);
    assert!(disk.partition_by_number(6).is_none());

    // the session now shows the committed disk
    let created = session.table().entry_at(TAIL_FREE_START).unwrap();
    assert_eq!(created.index, Some(4));
    assert!(!created.is_pending_create());
    assert_covered(&session);
}

#[test]
fn pending_partition_moved_into_freed_space_commits() {
    let mut session = msdos_session();
    let free = id_at(&session, EXT_FREE_START);
    let created = session
        .create(free, request(PartitionKind::Logical, "ext2", 100_000))
        .unwrap();
    let swap = id_at(&session, L6_START);
    session.delete_partition(swap).unwrap();
    session
        .move_partition(created, L6_START, L6_START + 99_999)
        .unwrap();

    // the create now runs after the delete that frees its sectors
    let order: Vec<String> = session
        .log()
        .records()
        .iter()
        .map(ToString::to_string)
        .collect();
    assert!(order[0].starts_with("delete partition"));
    assert!(order[1].starts_with("create logical partition"));

    session.commit().unwrap();

    assert_eq!(session.state(), SessionState::Clean);
    let disk = session.native();
    let moved = disk
        .partitions()
        .iter()
        .find(|raw| raw.start == L6_START)
        .unwrap();
    assert_eq!(moved.end, L6_START + 99_999);
    assert_eq!(moved.kind, PartitionKind::Logical);
    assert_eq!(moved.fs_name, "ext2");
    assert!(disk.partitions().iter().all(|raw| raw.start != EXT_FREE_START));
    assert_covered(&session);
}

#[test]
fn failed_commit_halts_and_enters_error_state() {
    let mut session = msdos_session();
    stage_three(&mut session);
    session
        .native_mut()
        .fail_next(NativeCallKind::Resize, "simulated resize failure");
    session.native_mut().clear_journal();

    let error = session.commit().unwrap_err();

    assert_eq!(
        error,
        SessionError::NativeFailure {
            index: 1,
            operation: "resize partition #1 to sectors 2048..=150000".to_string(),
            message: "simulated resize failure".to_string(),
        }
    );
    assert_eq!(
        session.native().mutations(),
        vec![
            NativeCallKind::Create,
            NativeCallKind::Format,
            NativeCallKind::Resize
        ]
    );
    assert_eq!(session.state(), SessionState::Error);
    assert!(session.log().is_empty());

    // the device was probed again: the create went through, the delete did not
    assert!(session.native().partition_by_number(6).is_some());
    assert_eq!(
        session.table().entry_at(TAIL_FREE_START).unwrap().index,
        Some(4)
    );

    let free = id_at(&session, EXT_FREE_START);
    assert_eq!(
        session.create(free, request(PartitionKind::Logical, "ext4", 50_000)),
        Err(SessionError::InvalidState {
            operation: "create",
            state: "in error"
        })
    );
    assert!(session.can_undo());

    session.probe().unwrap();
    assert_eq!(session.state(), SessionState::Clean);
}

#[test]
fn table_write_failure_is_reported_after_the_last_record() {
    let mut session = msdos_session();
    let swap = id_at(&session, L6_START);
    session.delete_partition(swap).unwrap();
    session
        .native_mut()
        .fail_next(NativeCallKind::WriteTable, "disk vanished");

    match session.commit() {
        Err(SessionError::NativeFailure { index, message, .. }) => {
            assert_eq!(index, 1);
            assert_eq!(message, "disk vanished");
        }
        other => panic!("expected a native failure, got {other:?}"),
    }

    session.undo().unwrap();
    assert_eq!(session.state(), SessionState::Clean);
}

#[test]
fn commit_requires_staged_edits() {
    let mut session = msdos_session();
    assert_eq!(
        session.commit(),
        Err(SessionError::InvalidState {
            operation: "commit",
            state: "clean"
        })
    );
}

#[test]
fn probe_is_refused_while_edits_are_staged() {
    let mut session = msdos_session();
    let swap = id_at(&session, L6_START);
    session.delete_partition(swap).unwrap();

    assert!(matches!(
        session.probe(),
        Err(SessionError::InvalidState {
            operation: "probe",
            ..
        })
    ));
}

#[test]
fn pending_partitions_are_flagged_after_creation() {
    let mut session = blank_session();
    let free = id_at(&session, 2_048);
    let created = session
        .create(free, request(PartitionKind::Primary, "ext4", 100_000))
        .unwrap();
    session.set_active(created, true).unwrap();

    session.commit().unwrap();

    let disk = session.native();
    let partition = disk.partition_by_number(1).unwrap();
    assert!(partition.flags.active);
    assert_eq!(
        disk.mutations(),
        vec![
            NativeCallKind::Create,
            NativeCallKind::Format,
            NativeCallKind::SetFlag,
            NativeCallKind::WriteTable,
        ]
    );
    assert!(session.table().active().is_some());
}

#[test]
fn events_report_changes_and_commit_progress() {
    let (tx, rx) = mpsc::channel();
    let disk = fixtures::msdos_disk().unwrap();
    let device = disk.geometry().device.clone();
    let mut session = DeviceSession::open(
        device,
        disk,
        FileSystemRegistry::builtin(),
        ProgressSink::channel(tx),
    )
    .unwrap();

    let swap = id_at(&session, L6_START);
    session.delete_partition(swap).unwrap();
    session.commit().unwrap();

    let events: Vec<OperationEvent> = rx.try_iter().collect();

    let revisions: Vec<u64> = events
        .iter()
        .filter_map(|event| match event {
            OperationEvent::TableChanged { revision, .. } => Some(*revision),
            _ => None,
        })
        .collect();
    assert!(revisions.len() >= 2);
    assert!(revisions.windows(2).all(|pair| pair[0] < pair[1]));

    let commit_steps: Vec<(u32, u32)> = events
        .iter()
        .filter_map(|event| match event {
            OperationEvent::Progress(progress) if progress.operation == OperationKind::Commit => {
                Some((progress.step, progress.total_steps))
            }
            _ => None,
        })
        .collect();
    assert_eq!(commit_steps, vec![(1, 2), (2, 2)]);

    assert!(events.iter().any(|event| matches!(
        event,
        OperationEvent::Completed {
            operation: OperationKind::Commit,
            ..
        }
    )));
}
