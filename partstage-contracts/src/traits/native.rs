// SPDX-License-Identifier: GPL-3.0-only

use partstage_types::{DeviceGeometry, PartitionFlag, PartitionHandle, PartitionKind, ProbeReport};

use crate::NativeError;

/// The native partitioning library.
///
/// Every call is blocking. Failures carry the library's diagnostic text; callers
/// treat any failure as recoverable by probing the device again.
pub trait NativePartitioner: Send {
    /// Read geometry and partition records of `device`.
    fn probe(&mut self, device: &str) -> Result<ProbeReport, NativeError>;

    /// Create a partition of `kind` covering `start..=end`.
    fn create_partition(
        &mut self,
        geometry: &DeviceGeometry,
        kind: PartitionKind,
        start: u64,
        end: u64,
    ) -> Result<PartitionHandle, NativeError>;

    /// Change the extent of a partition together with its filesystem.
    fn resize_partition(
        &mut self,
        handle: PartitionHandle,
        start: u64,
        end: u64,
    ) -> Result<(), NativeError>;

    /// Relocate a partition and its contents to `start..=end`.
    fn move_partition(
        &mut self,
        handle: PartitionHandle,
        start: u64,
        end: u64,
    ) -> Result<(), NativeError>;

    fn delete_partition(&mut self, handle: PartitionHandle) -> Result<(), NativeError>;

    fn format_partition(
        &mut self,
        handle: PartitionHandle,
        fs_name: &str,
        label: &str,
    ) -> Result<(), NativeError>;

    fn set_flag(
        &mut self,
        handle: PartitionHandle,
        flag: PartitionFlag,
        value: bool,
    ) -> Result<(), NativeError>;

    /// Flush the partition table of `device` to disk.
    fn write_table(&mut self, device: &str) -> Result<(), NativeError>;
}
