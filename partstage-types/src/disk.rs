//! Device geometry and probe results

use serde::{Deserialize, Serialize};

use crate::{LOGICAL_SECTOR_SIZE, RawEntry, SectorRange};

/// Geometry and state of one device as reported by probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceGeometry {
    /// Device path (e.g., "/dev/sda")
    pub device: String,

    /// Model name reported by the hardware
    #[serde(default)]
    pub model: String,

    /// Logical sector size in bytes
    #[serde(default = "default_sector_size")]
    pub sector_size: u64,

    /// First addressable sector for partitions (inclusive)
    pub first_sector: u64,

    /// Last addressable sector for partitions (inclusive)
    pub last_sector: u64,

    /// Whether the geometry can be written back
    #[serde(default)]
    pub read_only: bool,

    /// Whether any partition is currently in use (mounted, swap, ...)
    #[serde(default)]
    pub busy: bool,

    /// Whether the device carries a partition table at all
    #[serde(default = "default_has_table")]
    pub has_table: bool,
}

fn default_sector_size() -> u64 {
    LOGICAL_SECTOR_SIZE
}

fn default_has_table() -> bool {
    true
}

impl DeviceGeometry {
    pub fn range(&self) -> SectorRange {
        SectorRange::new(self.first_sector, self.last_sector)
    }

    pub fn total_sectors(&self) -> u64 {
        self.range().len()
    }

    pub fn contains(&self, sector: u64) -> bool {
        self.range().contains(sector)
    }

    /// Whether staged edits can ever be committed to this device
    pub fn is_writable(&self) -> bool {
        !self.read_only && self.has_table
    }

    /// Display name of partition `number` on this device
    pub fn partition_name(&self, number: u32) -> String {
        let needs_separator = self
            .device
            .chars()
            .last()
            .is_some_and(|c| c.is_ascii_digit());
        if needs_separator {
            format!("{}p{}", self.device, number)
        } else {
            format!("{}{}", self.device, number)
        }
    }
}

/// Result of probing one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub geometry: DeviceGeometry,
    pub entries: Vec<RawEntry>,
}
