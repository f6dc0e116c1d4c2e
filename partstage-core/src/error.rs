// SPDX-License-Identifier: GPL-3.0-only

use partstage_contracts::NativeError;
use thiserror::Error;

use crate::EntryId;

/// Structural failures of [`crate::PartitionTable`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    #[error("malformed partition geometry: {0}")]
    Geometry(String),

    #[error("sector {sector} is outside the device (sectors {first}..={last})")]
    OutOfRange { sector: u64, first: u64, last: u64 },

    #[error("partition table invariant violated: {0}")]
    InvariantViolation(String),

    #[error("no partition table entry with id {0}")]
    NotFound(EntryId),
}

/// Why a [`crate::DeviceSession`] rejected an operation.
///
/// Every message names the rule that blocked the operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("malformed partition geometry: {0}")]
    Geometry(String),

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("this is free space, not a partition; it cannot be altered (use undo instead)")]
    VirtualTarget,

    #[error("size out of bounds: {0}")]
    Capacity(String),

    #[error("range outside grow bounds: {0}")]
    OutOfGrowBounds(String),

    #[error("filesystem {filesystem} can only be enlarged")]
    FilesystemDirection { filesystem: String },

    #[error("partition table full: {0}")]
    TableFull(String),

    #[error("partition table invariant violated: {0}")]
    InvariantViolation(String),

    #[error("unsupported filesystem: {0}")]
    UnsupportedFilesystem(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("out of range: {0}")]
    OutOfRange(String),

    #[error("{operation} is not possible while the session is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("device is read-only: {0}")]
    ReadOnlyDevice(String),

    #[error("device is busy: {0}")]
    DeviceBusy(String),

    #[error("probe failed: {0}")]
    ProbeFailed(NativeError),

    #[error("operation {index} ({operation}) failed: {message}")]
    NativeFailure {
        index: usize,
        operation: String,
        message: String,
    },
}

impl From<TableError> for SessionError {
    fn from(error: TableError) -> Self {
        match error {
            TableError::Geometry(message) => Self::Geometry(message),
            TableError::InvariantViolation(message) => Self::InvariantViolation(message),
            TableError::NotFound(id) => Self::NotFound(format!("partition table entry {id}")),
            out_of_range @ TableError::OutOfRange { .. } => {
                Self::OutOfRange(out_of_range.to_string())
            }
        }
    }
}

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, SessionError>;
