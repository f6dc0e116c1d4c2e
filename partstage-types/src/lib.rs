// SPDX-License-Identifier: GPL-3.0-only

//! Canonical data models for partstage
//!
//! This crate defines the types shared by every layer of the stack:
//!
//! - **partstage-contracts**: native library boundary expressed in these types
//! - **partstage-core**: builds its staged partition table from them
//! - **partstage-testing**: simulates a device using them
//!
//! Filesystem capabilities live in a static catalog compiled into the crate
//! (`resources/filesystems.toml`), exposed through [`FileSystemRegistry`].

pub mod common;
pub mod disk;
pub mod filesystem;
pub mod partition;

pub use common::{LOGICAL_SECTOR_SIZE, SectorRange, pretty_to_sectors, sectors_to_pretty};
pub use disk::{DeviceGeometry, ProbeReport};
pub use filesystem::{
    BUILTIN_FILESYSTEMS, EXTENDED_FS, FREE_FS, FileSystemRegistry, FileSystemSpec, RegistryError,
    ResizeDirection, UNKNOWN_FS,
};
pub use partition::{
    FIRST_LOGICAL_NUMBER, MAX_PRIMARY_SLOTS, PartitionFlag, PartitionFlags, PartitionHandle,
    PartitionKind, RawEntry,
};
