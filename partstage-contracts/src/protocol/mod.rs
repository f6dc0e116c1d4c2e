// SPDX-License-Identifier: GPL-3.0-only

pub mod errors;
pub mod ids;
pub mod operations;
pub mod progress;

pub use errors::{NativeError, NativeErrorKind};
pub use ids::OperationId;
pub use operations::{OperationEvent, OperationKind, OperationProgress};
pub use progress::ProgressSink;
