use thiserror::Error;

use super::{BUILTIN_FILESYSTEMS, FileSystemSpec};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("unknown filesystem '{0}'")]
    NotFound(String),
}

/// Static catalog of supported filesystems.
///
/// Lookups and filters are pure functions of the registered specs; the registry
/// never changes after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSystemRegistry {
    specs: Vec<FileSystemSpec>,
}

impl FileSystemRegistry {
    /// Build a registry from explicit specs. The well-known `free` and `extended`
    /// specs are registered first when missing.
    pub fn new(specs: Vec<FileSystemSpec>) -> Self {
        let mut all = Vec::with_capacity(specs.len() + 2);
        if !specs.iter().any(FileSystemSpec::is_free) {
            all.push(FileSystemSpec::free());
        }
        if !specs.iter().any(FileSystemSpec::is_extended) {
            all.push(FileSystemSpec::extended());
        }
        all.extend(specs);
        Self { specs: all }
    }

    /// Registry backed by the compiled-in catalog.
    pub fn builtin() -> Self {
        Self::new(BUILTIN_FILESYSTEMS.clone())
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileSystemSpec> {
        self.specs.iter()
    }

    pub fn spec_for(&self, name: &str) -> Result<&FileSystemSpec, RegistryError> {
        self.specs
            .iter()
            .find(|spec| spec.name == name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Map a filesystem name reported by probe to a spec, using the `unknown`
    /// placeholder for names outside the catalog.
    pub fn resolve_probed(&self, name: &str) -> FileSystemSpec {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return FileSystemSpec::free();
        }
        self.spec_for(trimmed)
            .cloned()
            .unwrap_or_else(|_| FileSystemSpec::unknown())
    }

    pub fn free(&self) -> &FileSystemSpec {
        self.specs
            .iter()
            .find(|spec| spec.is_free())
            .unwrap_or_else(|| unreachable!("free spec is always registered"))
    }

    /// Filesystems a partition of `candidate_size` sectors can be created with,
    /// in registration order.
    pub fn eligible_for_create(&self, candidate_size: u64) -> Vec<&FileSystemSpec> {
        self.specs
            .iter()
            .filter(|spec| spec.can_create && spec.fits(candidate_size))
            .collect()
    }

    /// Same as [`Self::eligible_for_create`], dropping filesystems whose tools
    /// refuse to run while the device is busy.
    pub fn eligible_for_create_on(&self, candidate_size: u64, busy: bool) -> Vec<&FileSystemSpec> {
        self.eligible_for_create(candidate_size)
            .into_iter()
            .filter(|spec| !(busy && spec.external))
            .collect()
    }

    /// Filesystems an existing partition of `size` sectors can be formatted with.
    pub fn eligible_for_format(&self, size: u64) -> Vec<&FileSystemSpec> {
        self.eligible_for_create(size)
            .into_iter()
            .filter(|spec| !spec.is_free())
            .collect()
    }
}

impl Default for FileSystemRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
