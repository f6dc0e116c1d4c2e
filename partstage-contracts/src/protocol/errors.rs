// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NativeErrorKind {
    InvalidInput,
    NotFound,
    PermissionDenied,
    Unsupported,
    Busy,
    Io,
    Internal,
}

/// Failure reported by the native partitioning library.
///
/// `message` is the library's own diagnostic text and is shown to the user as is.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct NativeError {
    pub kind: NativeErrorKind,
    pub message: String,
}

impl NativeError {
    pub fn new(kind: NativeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn busy(message: impl Into<String>) -> Self {
        Self::new(NativeErrorKind::Busy, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(NativeErrorKind::NotFound, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(NativeErrorKind::InvalidInput, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_error_roundtrips() {
        let error = NativeError::busy("device /dev/sda is in use");
        let json = serde_json::to_string(&error).expect("serialize error");
        let parsed: NativeError = serde_json::from_str(&json).expect("deserialize error");
        assert_eq!(parsed, error);
    }

    #[test]
    fn display_keeps_library_diagnostic() {
        let error = NativeError::not_found("no partition 9");
        assert_eq!(error.to_string(), "NotFound: no partition 9");
    }
}
