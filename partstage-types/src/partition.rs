//! Partition records as reported by the native library
//!
//! These are the raw, flat shapes that cross the native boundary. The staging
//! core turns them into its own table entries.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::SectorRange;

/// Number of primary slots in an msdos partition table.
pub const MAX_PRIMARY_SLOTS: u32 = 4;

/// First partition number used for logical partitions.
pub const FIRST_LOGICAL_NUMBER: u32 = 5;

/// Role of a partition slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionKind {
    Primary,
    Extended,
    Logical,
    /// Synthesized unallocated gap; never written to disk.
    VirtualFree,
}

impl PartitionKind {
    /// Whether this kind takes one of the four primary slots.
    pub fn uses_primary_slot(self) -> bool {
        matches!(self, Self::Primary | Self::Extended)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Extended => "extended",
            Self::Logical => "logical",
            Self::VirtualFree => "free",
        }
    }

    /// Parse the names used by lab specs and scripts
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "primary" => Some(Self::Primary),
            "extended" => Some(Self::Extended),
            "logical" => Some(Self::Logical),
            "free" => Some(Self::VirtualFree),
            _ => None,
        }
    }
}

impl fmt::Display for PartitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-toggleable partition flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionFlags {
    /// Boot/active flag; at most one partition per device carries it.
    #[serde(default)]
    pub active: bool,

    #[serde(default)]
    pub hidden: bool,
}

impl PartitionFlags {
    pub fn get(&self, flag: PartitionFlag) -> bool {
        match flag {
            PartitionFlag::Active => self.active,
            PartitionFlag::Hidden => self.hidden,
        }
    }

    pub fn set(&mut self, flag: PartitionFlag, value: bool) {
        match flag {
            PartitionFlag::Active => self.active = value,
            PartitionFlag::Hidden => self.hidden = value,
        }
    }

    /// Flags currently set, in a stable order.
    pub fn set_flags(&self) -> Vec<PartitionFlag> {
        [PartitionFlag::Active, PartitionFlag::Hidden]
            .into_iter()
            .filter(|flag| self.get(*flag))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionFlag {
    Active,
    Hidden,
}

impl PartitionFlag {
    /// Flag name understood by the native library
    pub fn native_name(self) -> &'static str {
        match self {
            Self::Active => "boot",
            Self::Hidden => "hidden",
        }
    }
}

impl fmt::Display for PartitionFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Active => "active",
            Self::Hidden => "hidden",
        })
    }
}

/// Opaque native handle of an on-disk partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionHandle(pub u64);

impl fmt::Display for PartitionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One partition as reported by probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEntry {
    pub handle: PartitionHandle,

    /// Partition number on disk (1-based)
    pub number: u32,

    /// First sector (inclusive)
    pub start: u64,

    /// Last sector (inclusive)
    pub end: u64,

    pub kind: PartitionKind,

    /// Filesystem name as reported by the native library; empty when unformatted
    #[serde(default)]
    pub fs_name: String,

    #[serde(default)]
    pub label: String,

    #[serde(default)]
    pub flags: PartitionFlags,

    /// Smallest size the current filesystem contents fit in, if known
    #[serde(default)]
    pub min_size: u64,
}

impl RawEntry {
    pub fn range(&self) -> SectorRange {
        SectorRange::new(self.start, self.end)
    }
}
