// SPDX-License-Identifier: GPL-3.0-only

//! One slot of the in-memory partition table

use std::fmt;

use partstage_types::{
    FileSystemRegistry, FileSystemSpec, PartitionFlags, PartitionHandle, PartitionKind, RawEntry,
    SectorRange,
};
use serde::Serialize;

use crate::StagedId;

/// Session-local identity of a table entry.
///
/// Real partitions keep their id across edits; free-space fillers keep theirs
/// only while their range is unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EntryId(pub(crate) u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// The sectors a partition could expand into before touching a neighbor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GrowBounds {
    Known { start: u64, end: u64 },
    /// The last scan failed; resize and move are unavailable.
    Unknown,
}

impl GrowBounds {
    pub fn range(&self) -> Option<SectorRange> {
        match self {
            Self::Known { start, end } => Some(SectorRange::new(*start, *end)),
            Self::Unknown => None,
        }
    }
}

/// Where an entry comes from, which decides whether edits amend or append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryOrigin {
    /// Present on disk when the device was last probed.
    OnDisk(PartitionHandle),
    /// Created by a staged operation that has not been committed yet.
    PendingCreate(StagedId),
    /// Synthesized free space.
    Virtual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionEntry {
    pub id: EntryId,

    /// 1-based partition number; `None` for free space
    pub index: Option<u32>,

    /// First sector (inclusive)
    pub start: u64,

    /// Last sector (inclusive)
    pub end: u64,

    pub kind: PartitionKind,
    pub filesystem: FileSystemSpec,
    pub label: String,
    pub flags: PartitionFlags,
    pub grow: GrowBounds,

    /// Smallest size the current contents fit in, as reported by probe
    pub min_size: u64,

    pub origin: EntryOrigin,

    /// Logical partitions and the free space between them
    pub in_extended: bool,
}

impl PartitionEntry {
    pub(crate) fn free(id: EntryId, range: SectorRange, in_extended: bool) -> Self {
        Self {
            id,
            index: None,
            start: range.start,
            end: range.end,
            kind: PartitionKind::VirtualFree,
            filesystem: FileSystemSpec::free(),
            label: String::new(),
            flags: PartitionFlags::default(),
            grow: GrowBounds::Known {
                start: range.start,
                end: range.end,
            },
            min_size: 0,
            origin: EntryOrigin::Virtual,
            in_extended,
        }
    }

    pub(crate) fn from_raw(id: EntryId, raw: &RawEntry, registry: &FileSystemRegistry) -> Self {
        let filesystem = if raw.kind == PartitionKind::Extended {
            FileSystemSpec::extended()
        } else {
            registry.resolve_probed(&raw.fs_name)
        };

        Self {
            id,
            index: Some(raw.number),
            start: raw.start,
            end: raw.end,
            kind: raw.kind,
            filesystem,
            label: raw.label.clone(),
            flags: raw.flags,
            grow: GrowBounds::Unknown,
            min_size: raw.min_size,
            origin: EntryOrigin::OnDisk(raw.handle),
            in_extended: raw.kind == PartitionKind::Logical,
        }
    }

    pub(crate) fn pending(
        id: EntryId,
        staged: StagedId,
        kind: PartitionKind,
        range: SectorRange,
        filesystem: FileSystemSpec,
        label: String,
    ) -> Self {
        Self {
            id,
            index: None,
            start: range.start,
            end: range.end,
            kind,
            filesystem,
            label,
            flags: PartitionFlags::default(),
            grow: GrowBounds::Unknown,
            min_size: 0,
            origin: EntryOrigin::PendingCreate(staged),
            in_extended: kind == PartitionKind::Logical,
        }
    }

    pub fn range(&self) -> SectorRange {
        SectorRange::new(self.start, self.end)
    }

    /// Size in sectors
    pub fn size(&self) -> u64 {
        self.range().len()
    }

    pub fn is_virtual(&self) -> bool {
        self.kind == PartitionKind::VirtualFree
    }

    pub fn is_pending_create(&self) -> bool {
        matches!(self.origin, EntryOrigin::PendingCreate(_))
    }

    /// Native handle, for partitions that exist on disk
    pub fn handle(&self) -> Option<PartitionHandle> {
        match self.origin {
            EntryOrigin::OnDisk(handle) => Some(handle),
            _ => None,
        }
    }

    /// Only primary partitions can carry the boot flag on msdos tables.
    pub fn can_be_active(&self) -> bool {
        self.kind == PartitionKind::Primary
    }

    pub fn can_be_hidden(&self) -> bool {
        matches!(self.kind, PartitionKind::Primary | PartitionKind::Logical)
    }

    /// Unformatted partitions carry no contents, so any extent change is safe.
    pub(crate) fn is_unformatted(&self) -> bool {
        !self.is_virtual() && self.filesystem.is_free()
    }
}
