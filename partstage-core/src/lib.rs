// SPDX-License-Identifier: GPL-3.0-only

//! Staged partition-table transactions
//!
//! A [`DeviceSession`] probes one device into an in-memory [`PartitionTable`],
//! validates every edit against the table and the filesystem catalog, and
//! records accepted edits in a [`StagedOperationLog`]. Nothing reaches the disk
//! until [`DeviceSession::commit`] replays the log through the
//! [`partstage_contracts::NativePartitioner`]; [`DeviceSession::undo`] throws
//! the log away and probes again.

pub mod entry;
pub mod error;
pub mod log;
pub mod session;
pub mod table;

pub use entry::{EntryId, EntryOrigin, GrowBounds, PartitionEntry};
pub use error::{Result, SessionError, TableError};
pub use log::{
    CreateRecord, PartitionRef, ReplayFailure, ReplayReport, StagedId, StagedOperation,
    StagedOperationLog,
};
pub use session::{CreatePartition, DeviceSession, Placement, ResizeLimits, SessionState};
pub use table::{PartitionTable, Renumbered};
