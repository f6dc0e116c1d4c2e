#![allow(dead_code)]

use partstage_contracts::ProgressSink;
use partstage_core::{CreatePartition, DeviceSession, EntryId, Placement};
use partstage_testing::MemoryDisk;
use partstage_testing::fixtures;
use partstage_types::{FileSystemRegistry, PartitionKind};

// Layout of the msdos-basic lab spec.
pub const P1_START: u64 = 2_048;
pub const P1_END: u64 = 206_847;
pub const P2_START: u64 = 206_848;
pub const EXT_START: u64 = 411_648;
pub const EXT_END: u64 = 1_435_647;
pub const L5_START: u64 = 413_696;
pub const L6_START: u64 = 618_496;
pub const EXT_FREE_START: u64 = 823_296;
pub const TAIL_FREE_START: u64 = 1_435_648;
pub const LAST_SECTOR: u64 = 4_194_303;

pub fn open(disk: MemoryDisk) -> DeviceSession<MemoryDisk> {
    open_with(disk, FileSystemRegistry::builtin())
}

pub fn open_with(disk: MemoryDisk, registry: FileSystemRegistry) -> DeviceSession<MemoryDisk> {
    let device = disk.geometry().device.clone();
    DeviceSession::open(device, disk, registry, ProgressSink::none()).unwrap()
}

pub fn msdos_session() -> DeviceSession<MemoryDisk> {
    open(fixtures::msdos_disk().unwrap())
}

pub fn blank_session() -> DeviceSession<MemoryDisk> {
    open(fixtures::blank_disk().unwrap())
}

pub fn id_at(session: &DeviceSession<MemoryDisk>, sector: u64) -> EntryId {
    session.table().entry_at(sector).unwrap().id
}

pub fn request(kind: PartitionKind, filesystem: &str, size: u64) -> CreatePartition {
    CreatePartition {
        kind,
        filesystem: filesystem.to_string(),
        placement: Placement::Start,
        size,
        label: String::new(),
    }
}

pub fn layout(session: &DeviceSession<MemoryDisk>) -> Vec<(u64, u64, PartitionKind)> {
    session
        .table()
        .layout()
        .into_iter()
        .map(|(range, kind)| (range.start, range.end, kind))
        .collect()
}

/// Both levels tile their span without gaps or overlaps.
pub fn assert_covered(session: &DeviceSession<MemoryDisk>) {
    let table = session.table();
    table.validate().unwrap();

    let geometry = table.geometry();
    let mut next = geometry.first_sector;
    for entry in table.top_level() {
        assert_eq!(entry.start, next, "gap or overlap before {}", entry.id);
        next = entry.end + 1;
    }
    assert_eq!(next, geometry.last_sector + 1);

    if let Some(children) = table.children_range() {
        let mut next = children.start;
        for entry in table.logicals() {
            assert_eq!(entry.start, next, "gap or overlap before {}", entry.id);
            next = entry.end + 1;
        }
        assert_eq!(next, children.end + 1);
    }
}
