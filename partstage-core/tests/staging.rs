mod common;

use common::*;
use partstage_core::{
    EntryOrigin, Placement, SessionError, SessionState, StagedOperation,
};
use partstage_testing::{MemoryDisk, fixtures};
use partstage_types::{
    FileSystemRegistry, PartitionFlags, PartitionHandle, PartitionKind, RawEntry,
};

#[test]
fn coverage_holds_after_every_mutation() {
    let mut session = msdos_session();
    assert_covered(&session);

    let tail = id_at(&session, TAIL_FREE_START);
    let created = session
        .create(tail, request(PartitionKind::Primary, "ext4", 100_000))
        .unwrap();
    assert_covered(&session);

    session.resize(created, TAIL_FREE_START, TAIL_FREE_START + 199_999).unwrap();
    assert_covered(&session);

    let nested_free = id_at(&session, EXT_FREE_START);
    let logical = session
        .create(nested_free, request(PartitionKind::Logical, "ext2", 50_000))
        .unwrap();
    assert_covered(&session);

    session.delete_partition(logical).unwrap();
    assert_covered(&session);

    let root = id_at(&session, P1_START);
    session.resize(root, P1_START, 150_000).unwrap();
    assert_covered(&session);

    let swap = id_at(&session, L6_START);
    session.delete_partition(swap).unwrap();
    assert_covered(&session);
    assert_eq!(session.state(), SessionState::Dirty);
}

#[test]
fn fifth_primary_slot_is_refused_but_logicals_are_not() {
    let mut session = blank_session();

    for i in 0..3 {
        let free = id_at(&session, 2_048 + i * 100_000);
        session
            .create(free, request(PartitionKind::Primary, "ext4", 100_000))
            .unwrap();
    }
    let free = id_at(&session, 302_048);
    session
        .create(free, request(PartitionKind::Extended, "", 2_000_000))
        .unwrap();
    assert_eq!(session.table().primary_slots_used(), 4);

    let tail = id_at(&session, 3_000_000);
    assert!(matches!(
        session.create(tail, request(PartitionKind::Primary, "ext4", 100_000)),
        Err(SessionError::TableFull(_))
    ));
    assert!(matches!(
        session.create(tail, request(PartitionKind::Extended, "", 100_000)),
        Err(SessionError::TableFull(_))
    ));

    for i in 0..5 {
        let nested = id_at(&session, 302_049 + i * 100_000);
        session
            .create(nested, request(PartitionKind::Logical, "ext4", 100_000))
            .unwrap();
    }

    let numbers: Vec<u32> = session
        .table()
        .logical_partitions()
        .filter_map(|entry| entry.index)
        .collect();
    assert_eq!(numbers, vec![5, 6, 7, 8, 9]);
    assert_covered(&session);
}

#[test]
fn undo_on_clean_session_changes_nothing() {
    let mut session = msdos_session();
    let before: Vec<_> = session.table().entries().into_iter().cloned().collect();
    let calls = session.native().journal().len();

    session.undo().unwrap();

    let after: Vec<_> = session.table().entries().into_iter().cloned().collect();
    assert_eq!(after, before);
    assert_eq!(session.native().journal().len(), calls);
    assert_eq!(session.state(), SessionState::Clean);
    assert!(!session.can_undo());
}

#[test]
fn undo_discards_staged_edits() {
    let mut session = msdos_session();
    let before = layout(&session);

    let swap = id_at(&session, L6_START);
    session.delete_partition(swap).unwrap();
    assert!(session.can_undo());

    session.undo().unwrap();
    assert_eq!(layout(&session), before);
    assert!(session.log().is_empty());
    assert_eq!(session.native().table_writes(), 0);
}

#[test]
fn create_then_delete_restores_the_table() {
    let mut session = msdos_session();
    let before = layout(&session);

    let tail = id_at(&session, TAIL_FREE_START);
    let mut create = request(PartitionKind::Primary, "fat32", 600_000);
    create.placement = Placement::End;
    let created = session.create(tail, create).unwrap();

    let entry = session.table().get(created).unwrap();
    assert_eq!(entry.end, LAST_SECTOR);
    assert_eq!(entry.index, Some(4));

    session.delete_partition(created).unwrap();
    assert_eq!(layout(&session), before);
    assert!(session.log().is_empty());
    assert_eq!(session.state(), SessionState::Clean);
}

#[test]
fn enlarge_only_filesystems_cannot_shrink() {
    let mut disk = MemoryDisk::new(fixtures::geometry("/dev/sdq", 99_999));
    disk.insert_raw(RawEntry {
        handle: PartitionHandle(1),
        number: 1,
        start: 1_000,
        end: 1_999,
        kind: PartitionKind::Primary,
        fs_name: "xfs".to_string(),
        label: String::new(),
        flags: PartitionFlags::default(),
        min_size: 0,
    });
    let mut xfs = FileSystemRegistry::builtin().spec_for("xfs").unwrap().clone();
    xfs.min_size = 0;
    let mut session = open_with(disk, FileSystemRegistry::new(vec![xfs]));

    let id = id_at(&session, 1_000);
    assert_eq!(
        session.resize(id, 1_000, 1_500),
        Err(SessionError::FilesystemDirection {
            filesystem: "xfs".to_string()
        })
    );
    assert!(session.log().is_empty());

    session.resize(id, 1_000, 2_500).unwrap();
    assert_eq!(session.table().get(id).unwrap().end, 2_500);
    assert_eq!(session.resize_limits(id).unwrap().min_size, 1_501);
}

#[test]
fn at_most_one_partition_is_active() {
    let mut session = msdos_session();
    let root = id_at(&session, P1_START);
    let data = id_at(&session, P2_START);
    assert!(session.table().get(root).unwrap().flags.active);

    session.set_active(data, true).unwrap();

    let active: Vec<_> = session
        .table()
        .entries()
        .into_iter()
        .filter(|entry| entry.flags.active)
        .map(|entry| entry.id)
        .collect();
    assert_eq!(active, vec![data]);

    let records: Vec<String> = session
        .log()
        .records()
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(
        records,
        vec![
            "clear active flag on partition #1",
            "set active flag on partition #2"
        ]
    );
}

#[test]
fn flags_are_limited_by_partition_kind() {
    let mut session = msdos_session();
    let home = id_at(&session, L5_START);
    let extended = id_at(&session, EXT_START);

    assert!(matches!(
        session.set_active(home, true),
        Err(SessionError::InvalidTarget(_))
    ));
    assert!(matches!(
        session.set_hidden(extended, true),
        Err(SessionError::InvalidTarget(_))
    ));

    session.set_hidden(home, true).unwrap();
    assert!(session.table().get(home).unwrap().flags.hidden);
}

#[test]
fn edits_to_pending_partitions_fold_into_the_create_record() {
    let mut session = msdos_session();
    let tail = id_at(&session, TAIL_FREE_START);
    let created = session
        .create(tail, request(PartitionKind::Primary, "ext4", 100_000))
        .unwrap();

    session
        .resize(created, TAIL_FREE_START, TAIL_FREE_START + 299_999)
        .unwrap();
    session.format(created, "ext3", "scratch").unwrap();
    session.set_hidden(created, true).unwrap();

    assert_eq!(session.log().len(), 1);
    match &session.log().records()[0] {
        StagedOperation::Create(record) => {
            assert_eq!(record.end, TAIL_FREE_START + 299_999);
            assert_eq!(record.filesystem, "ext3");
            assert_eq!(record.label, "scratch");
            assert!(record.flags.hidden);
        }
        other => panic!("expected a create record, got {other:?}"),
    }

    session.delete_partition(created).unwrap();
    assert!(session.log().is_empty());
    assert_eq!(session.state(), SessionState::Clean);
}

#[test]
fn deleting_a_pending_extended_drops_its_pending_logicals() {
    let mut session = blank_session();
    let free = id_at(&session, 2_048);
    let extended = session
        .create(free, request(PartitionKind::Extended, "", 1_000_000))
        .unwrap();
    let nested = id_at(&session, 2_049);
    session
        .create(nested, request(PartitionKind::Logical, "ext4", 100_000))
        .unwrap();
    assert_eq!(session.log().len(), 2);

    session.delete_partition(extended).unwrap();

    assert!(session.log().is_empty());
    assert_eq!(
        layout(&session),
        vec![(2_048, LAST_SECTOR, PartitionKind::VirtualFree)]
    );
}

#[test]
fn extended_holding_disk_logicals_cannot_be_deleted() {
    let mut session = msdos_session();
    let extended = id_at(&session, EXT_START);
    assert!(matches!(
        session.delete_partition(extended),
        Err(SessionError::InvalidTarget(_))
    ));
}

#[test]
fn deleting_a_logical_renumbers_later_logicals_only() {
    let mut session = msdos_session();
    let home = id_at(&session, L5_START);
    let swap = id_at(&session, L6_START);
    let root = id_at(&session, P1_START);

    session.delete_partition(home).unwrap();

    assert_eq!(session.table().get(swap).unwrap().index, Some(5));
    assert_eq!(session.table().get(root).unwrap().index, Some(1));
    assert!(matches!(
        session.table().get(swap).unwrap().origin,
        EntryOrigin::OnDisk(PartitionHandle(5))
    ));
}

#[test]
fn create_validates_target_and_size() {
    let mut session = msdos_session();
    let tail = id_at(&session, TAIL_FREE_START);
    let nested = id_at(&session, EXT_FREE_START);
    let root = id_at(&session, P1_START);

    assert!(matches!(
        session.create(root, request(PartitionKind::Primary, "ext4", 100_000)),
        Err(SessionError::InvalidTarget(_))
    ));
    assert!(matches!(
        session.create(tail, request(PartitionKind::Logical, "ext4", 100_000)),
        Err(SessionError::InvalidTarget(_))
    ));
    assert!(matches!(
        session.create(nested, request(PartitionKind::Primary, "ext4", 100_000)),
        Err(SessionError::InvalidTarget(_))
    ));
    assert!(matches!(
        session.create(tail, request(PartitionKind::Primary, "ext4", 0)),
        Err(SessionError::Capacity(_))
    ));
    assert!(matches!(
        session.create(tail, request(PartitionKind::Primary, "ext4", 10_000_000)),
        Err(SessionError::Capacity(_))
    ));
    assert!(matches!(
        session.create(tail, request(PartitionKind::Primary, "fat32", 100_000)),
        Err(SessionError::Capacity(_))
    ));
    assert!(matches!(
        session.create(tail, request(PartitionKind::Primary, "zfs", 100_000)),
        Err(SessionError::NotFound(_))
    ));
    assert!(session.log().is_empty());
}

#[test]
fn free_space_cannot_be_altered() {
    let mut session = msdos_session();
    let tail = id_at(&session, TAIL_FREE_START);

    assert_eq!(
        session.resize(tail, TAIL_FREE_START, LAST_SECTOR - 1),
        Err(SessionError::VirtualTarget)
    );
    assert_eq!(session.delete_partition(tail), Err(SessionError::VirtualTarget));
    assert_eq!(
        session.format(tail, "ext4", ""),
        Err(SessionError::VirtualTarget)
    );
    assert_eq!(
        SessionError::VirtualTarget.to_string(),
        "this is free space, not a partition; it cannot be altered (use undo instead)"
    );
}

#[test]
fn resize_respects_grow_bounds_and_minimums() {
    let mut session = msdos_session();
    let root = id_at(&session, P1_START);

    assert!(matches!(
        session.resize(root, P1_START, P2_START),
        Err(SessionError::OutOfGrowBounds(_))
    ));
    // probe reported 20 MiB of contents
    assert!(matches!(
        session.resize(root, P1_START, P1_START + 30_000),
        Err(SessionError::Capacity(_))
    ));
    assert!(matches!(
        session.resize(root, P1_END, P1_START),
        Err(SessionError::Capacity(_))
    ));

    let limits = session.resize_limits(root).unwrap();
    assert_eq!(limits.min_size, 40_960);
    assert_eq!(limits.bounds.start, P1_START);
    assert_eq!(limits.bounds.end, P1_END);
}

#[test]
fn extended_partitions_resize_but_never_move() {
    let mut session = msdos_session();
    let extended = id_at(&session, EXT_START);

    assert!(matches!(
        session.move_partition(extended, EXT_START + 1, EXT_END + 1),
        Err(SessionError::UnsupportedFilesystem(_))
    ));
    assert!(matches!(
        session.resize(extended, EXT_START, 700_000),
        Err(SessionError::Capacity(_))
    ));

    session.resize(extended, EXT_START, 2_000_000).unwrap();
    assert_eq!(
        session.table().children_range().map(|range| range.end),
        Some(2_000_000)
    );
    assert_covered(&session);
}

#[test]
fn moves_keep_the_size() {
    let mut session = msdos_session();
    let home = id_at(&session, L5_START);

    assert!(matches!(
        session.move_partition(home, L5_START - 1_000, L5_START + 100_000),
        Err(SessionError::Capacity(_))
    ));

    session
        .move_partition(home, L5_START - 2_047, L5_START + 204_799 - 2_047)
        .unwrap();
    let moved = session.table().get(home).unwrap();
    assert_eq!(moved.start, EXT_START + 1);
    assert_eq!(moved.size(), 204_800);
}

#[test]
fn format_checks_the_filesystem() {
    let mut session = msdos_session();
    let data = id_at(&session, P2_START);
    let extended = id_at(&session, EXT_START);

    assert!(matches!(
        session.format(extended, "ext4", ""),
        Err(SessionError::InvalidTarget(_))
    ));
    assert!(matches!(
        session.format(data, "free", ""),
        Err(SessionError::UnsupportedFilesystem(_))
    ));
    assert!(matches!(
        session.format(data, "fat32", ""),
        Err(SessionError::Capacity(_))
    ));

    session.format(data, "ext2", "scratch").unwrap();
    let entry = session.table().get(data).unwrap();
    assert_eq!(entry.filesystem.name, "ext2");
    assert_eq!(entry.label, "scratch");
}

#[test]
fn unformatted_partitions_resize_freely() {
    let mut session = msdos_session();
    let tail = id_at(&session, TAIL_FREE_START);
    let created = session
        .create(tail, request(PartitionKind::Primary, "free", 10))
        .unwrap();

    session
        .resize(created, TAIL_FREE_START, TAIL_FREE_START + 4)
        .unwrap();
    assert_eq!(session.table().get(created).unwrap().size(), 5);
}

#[test]
fn eligible_filesystems_depend_on_size() {
    let session = msdos_session();
    let tail = id_at(&session, TAIL_FREE_START);
    let data = id_at(&session, P2_START);

    let names = |specs: Vec<&partstage_types::FileSystemSpec>| -> Vec<String> {
        specs.into_iter().map(|spec| spec.name.clone()).collect()
    };

    let create = names(session.eligible_filesystems(tail).unwrap());
    assert_eq!(create.first().map(String::as_str), Some("free"));
    assert!(create.iter().any(|name| name == "fat32"));

    let format = names(session.eligible_filesystems(data).unwrap());
    assert!(!format.iter().any(|name| name == "free"));
    assert!(!format.iter().any(|name| name == "fat32"));
    assert!(format.iter().any(|name| name == "ext4"));
}
