use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TestingError {
    #[error("spec not found for '{spec_name}' in resources/lab-specs")]
    SpecNotFound { spec_name: String },
    #[error("invalid spec '{spec_name}': {reason}")]
    SpecInvalid { spec_name: String, reason: String },
    #[error("io error for {path:?}: {reason}")]
    Io { path: PathBuf, reason: String },
}

pub type Result<T> = std::result::Result<T, TestingError>;
