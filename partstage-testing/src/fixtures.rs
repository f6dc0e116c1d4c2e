//! Ready-made disks for tests
//!
//! The lab specs under `resources/lab-specs` are compiled in, so fixtures do
//! not depend on the working directory.

use partstage_types::DeviceGeometry;

use crate::errors::Result;
use crate::memory::MemoryDisk;
use crate::spec;

pub const MSDOS_BASIC: &str = include_str!("../../resources/lab-specs/msdos-basic.toml");
pub const BUSY_DISK: &str = include_str!("../../resources/lab-specs/busy-disk.toml");
pub const OVERLAP: &str = include_str!("../../resources/lab-specs/overlap.toml");
pub const BLANK: &str = include_str!("../../resources/lab-specs/blank.toml");

/// Writable geometry covering sectors `0..=last_sector`.
pub fn geometry(device: &str, last_sector: u64) -> DeviceGeometry {
    DeviceGeometry {
        device: device.to_string(),
        model: "memory disk".to_string(),
        sector_size: 512,
        first_sector: 0,
        last_sector,
        read_only: false,
        busy: false,
        has_table: true,
    }
}

pub fn disk_from_toml(raw: &str) -> Result<MemoryDisk> {
    MemoryDisk::from_spec(&spec::parse(raw)?)
}

/// `/dev/sdt`: ext4 (active) and xfs primaries, an extended partition with
/// ext3 and swap logicals, free space inside and after the extended partition.
pub fn msdos_disk() -> Result<MemoryDisk> {
    disk_from_toml(MSDOS_BASIC)
}

/// `/dev/sdw`: empty partition table.
pub fn blank_disk() -> Result<MemoryDisk> {
    disk_from_toml(BLANK)
}

/// `/dev/sdu`: ext4 and fat16 primaries with a mounted filesystem.
pub fn busy_disk() -> Result<MemoryDisk> {
    disk_from_toml(BUSY_DISK)
}

/// `/dev/sdv`: two overlapping primaries and a third, well-formed one.
pub fn overlapping_disk() -> Result<MemoryDisk> {
    disk_from_toml(OVERLAP)
}
