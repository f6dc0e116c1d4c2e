//! Filesystem capability descriptors and the registry that catalogs them
//!
//! Capabilities are plain data: every check made by the staging core is a field
//! comparison on a [`FileSystemSpec`], never a call into filesystem-specific code.

mod catalog;
mod registry;

use serde::{Deserialize, Serialize};

pub use catalog::BUILTIN_FILESYSTEMS;
pub use registry::{FileSystemRegistry, RegistryError};

/// Name of the well-known spec bound to unallocated space.
pub const FREE_FS: &str = "free";

/// Name of the well-known spec bound to extended container partitions.
pub const EXTENDED_FS: &str = "extended";

/// Name given to filesystems reported by probe that the catalog does not know.
pub const UNKNOWN_FS: &str = "unknown";

/// Which way a filesystem may be resized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeDirection {
    /// Grow and shrink are both supported.
    #[default]
    Any,
    /// The filesystem can only be enlarged.
    EnlargeOnly,
}

/// Immutable capability descriptor of one filesystem type.
///
/// Sizes are in 512-byte sectors; `max_size == 0` means unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileSystemSpec {
    pub name: String,
    pub can_create: bool,
    pub can_resize: bool,
    pub can_move: bool,
    pub min_size: u64,
    #[serde(default)]
    pub max_size: u64,
    #[serde(default)]
    pub resize_direction: ResizeDirection,
    /// Operations go through an external tool that refuses busy devices.
    #[serde(default)]
    pub external: bool,
}

impl FileSystemSpec {
    /// Unallocated space. Creatable (an unformatted partition) but never resized or moved.
    pub fn free() -> Self {
        Self {
            name: FREE_FS.to_string(),
            can_create: true,
            can_resize: false,
            can_move: false,
            min_size: 0,
            max_size: 0,
            resize_direction: ResizeDirection::Any,
            external: false,
        }
    }

    /// Container spec for extended partitions.
    pub fn extended() -> Self {
        Self {
            name: EXTENDED_FS.to_string(),
            can_create: false,
            can_resize: true,
            can_move: false,
            min_size: 0,
            max_size: 0,
            resize_direction: ResizeDirection::Any,
            external: false,
        }
    }

    /// Placeholder for a filesystem the catalog does not describe.
    pub fn unknown() -> Self {
        Self {
            name: UNKNOWN_FS.to_string(),
            can_create: false,
            can_resize: false,
            can_move: false,
            min_size: 0,
            max_size: 0,
            resize_direction: ResizeDirection::Any,
            external: false,
        }
    }

    pub fn is_free(&self) -> bool {
        self.name == FREE_FS
    }

    pub fn is_extended(&self) -> bool {
        self.name == EXTENDED_FS
    }

    /// Whether a partition of `size` sectors is within this filesystem's limits.
    pub fn fits(&self, size: u64) -> bool {
        self.min_size <= size && (self.max_size == 0 || self.max_size >= size)
    }

    pub fn enlarge_only(&self) -> bool {
        self.resize_direction == ResizeDirection::EnlargeOnly
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_max_size_fits_anything_above_min() {
        let mut spec = FileSystemSpec::free();
        spec.min_size = 100;
        assert!(!spec.fits(99));
        assert!(spec.fits(100));
        assert!(spec.fits(u64::MAX));

        spec.max_size = 200;
        assert!(spec.fits(200));
        assert!(!spec.fits(201));
    }

    #[test]
    fn resize_direction_uses_snake_case() {
        let json = serde_json::to_string(&ResizeDirection::EnlargeOnly).expect("serialize");
        assert_eq!(json, "\"enlarge_only\"");
    }
}
