//! Test support for partstage
//!
//! - [`memory::MemoryDisk`]: an in-memory native partitioner with a call
//!   journal and failure injection
//! - [`spec`]: TOML lab specs describing simulated devices
//! - [`fixtures`]: the lab specs under `resources/lab-specs`, compiled in

pub mod errors;
pub mod fixtures;
pub mod memory;
pub mod spec;

pub use errors::{Result, TestingError};
pub use memory::{MemoryDisk, NativeCall, NativeCallKind};
pub use spec::LabSpec;
