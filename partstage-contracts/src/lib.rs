// SPDX-License-Identifier: GPL-3.0-only

//! Contracts between the partstage core and its collaborators
//!
//! - [`traits::NativePartitioner`]: the native partitioning library the core
//!   replays staged operations through
//! - [`protocol`]: progress and change notifications emitted to callers

pub mod protocol;
pub mod traits;

pub use protocol::{
    NativeError, NativeErrorKind, OperationEvent, OperationId, OperationKind, OperationProgress,
    ProgressSink,
};
pub use traits::NativePartitioner;
