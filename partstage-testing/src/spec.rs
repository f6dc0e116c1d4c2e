use std::fs;
use std::path::{Path, PathBuf};

use partstage_types::{
    DeviceGeometry, LOGICAL_SECTOR_SIZE, PartitionFlags, PartitionHandle, PartitionKind,
    ProbeReport, RawEntry, pretty_to_sectors,
};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, TestingError};

/// A simulated device and the partitions on it.
///
/// Positions and sizes are strings understood by [`pretty_to_sectors`]: a bare
/// number is a sector, a value with a unit ("1 MiB") is converted to sectors.
/// Partition ends are inclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabSpec {
    pub name: String,
    pub device: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub sector_size: Option<u64>,
    pub first_sector: String,
    pub last_sector: String,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub busy: bool,
    #[serde(default = "default_true")]
    pub has_table: bool,
    #[serde(default)]
    pub partitions: Vec<PartitionSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionSpec {
    pub index: u32,
    pub start: String,
    pub end: String,
    pub r#type: String,
    pub fs: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub flags: Vec<String>,
    /// Smallest size the contents fit in
    #[serde(default)]
    pub min_size: Option<String>,
}

fn default_true() -> bool {
    true
}

pub fn workspace_root() -> PathBuf {
    if let Ok(value) = std::env::var("PARTSTAGE_TESTING_WORKSPACE_ROOT") {
        return PathBuf::from(value);
    }

    if let Ok(current_dir) = std::env::current_dir()
        && current_dir.join("resources/lab-specs").exists()
    {
        return current_dir;
    }

    let manifest_root = Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();

    if manifest_root.join("resources/lab-specs").exists() {
        return manifest_root;
    }

    PathBuf::from(".")
}

pub fn specs_root() -> PathBuf {
    workspace_root().join("resources/lab-specs")
}

pub fn spec_path_for_name(spec_name: &str) -> PathBuf {
    specs_root().join(format!("{}.toml", spec_name))
}

pub fn load_by_name(spec_name: &str) -> Result<LabSpec> {
    let path = spec_path_for_name(spec_name);
    if !path.exists() {
        return Err(TestingError::SpecNotFound {
            spec_name: spec_name.to_string(),
        });
    }
    load_from_path(&path)
}

pub fn load_from_path(path: &Path) -> Result<LabSpec> {
    let raw = fs::read_to_string(path).map_err(|error| TestingError::Io {
        path: path.to_path_buf(),
        reason: error.to_string(),
    })?;
    parse(&raw)
}

pub fn parse(raw: &str) -> Result<LabSpec> {
    let spec: LabSpec = toml::from_str(raw).map_err(|error| TestingError::SpecInvalid {
        spec_name: "<unparsed>".to_string(),
        reason: error.to_string(),
    })?;

    validate(&spec)?;
    Ok(spec)
}

/// Check the fields that cannot be represented at all.
///
/// Layout problems (overlaps, orphaned logicals) are deliberately accepted so
/// that malformed tables can be simulated.
pub fn validate(spec: &LabSpec) -> Result<()> {
    let invalid = |reason: String| TestingError::SpecInvalid {
        spec_name: spec.name.clone(),
        reason,
    };

    if spec.name.is_empty() {
        return Err(TestingError::SpecInvalid {
            spec_name: "<unknown>".to_string(),
            reason: "name must not be empty".to_string(),
        });
    }

    if spec.device.is_empty() {
        return Err(invalid("device must not be empty".to_string()));
    }

    if spec.sector_size == Some(0) {
        return Err(invalid("sector_size must not be zero".to_string()));
    }

    let geometry = spec.geometry()?;
    if geometry.last_sector < geometry.first_sector {
        return Err(invalid("last_sector lies before first_sector".to_string()));
    }

    for partition in &spec.partitions {
        if partition.index == 0 {
            return Err(invalid("partition indexes start at 1".to_string()));
        }
        if PartitionKind::parse(&partition.r#type).is_none_or(|kind| kind == PartitionKind::VirtualFree)
        {
            return Err(invalid(format!(
                "partition {} has unknown type '{}'",
                partition.index, partition.r#type
            )));
        }
        for flag in &partition.flags {
            if flag != "active" && flag != "hidden" {
                return Err(invalid(format!(
                    "partition {} has unknown flag '{}'",
                    partition.index, flag
                )));
            }
        }
    }

    Ok(())
}

impl LabSpec {
    fn sectors(&self, value: &str, field: &str) -> Result<u64> {
        let sector_size = self.sector_size.unwrap_or(LOGICAL_SECTOR_SIZE);
        pretty_to_sectors(value, sector_size).map_err(|error| TestingError::SpecInvalid {
            spec_name: self.name.clone(),
            reason: format!("{field} '{value}': {error}"),
        })
    }

    pub fn geometry(&self) -> Result<DeviceGeometry> {
        Ok(DeviceGeometry {
            device: self.device.clone(),
            model: self.model.clone().unwrap_or_default(),
            sector_size: self.sector_size.unwrap_or(LOGICAL_SECTOR_SIZE),
            first_sector: self.sectors(&self.first_sector, "first_sector")?,
            last_sector: self.sectors(&self.last_sector, "last_sector")?,
            read_only: self.read_only,
            busy: self.busy,
            has_table: self.has_table,
        })
    }

    /// Raw entries in spec order. Handles are assigned from 1 in that order.
    pub fn entries(&self) -> Result<Vec<RawEntry>> {
        self.partitions
            .iter()
            .zip(1..)
            .map(|(partition, handle)| {
                let kind = PartitionKind::parse(&partition.r#type).ok_or_else(|| {
                    TestingError::SpecInvalid {
                        spec_name: self.name.clone(),
                        reason: format!("unknown partition type '{}'", partition.r#type),
                    }
                })?;

                let mut flags = PartitionFlags::default();
                flags.active = partition.flags.iter().any(|flag| flag == "active");
                flags.hidden = partition.flags.iter().any(|flag| flag == "hidden");

                let min_size = match &partition.min_size {
                    Some(value) => self.sectors(value, "min_size")?,
                    None => 0,
                };

                Ok(RawEntry {
                    handle: PartitionHandle(handle),
                    number: partition.index,
                    start: self.sectors(&partition.start, "start")?,
                    end: self.sectors(&partition.end, "end")?,
                    kind,
                    fs_name: partition.fs.clone().unwrap_or_default(),
                    label: partition.label.clone().unwrap_or_default(),
                    flags,
                    min_size,
                })
            })
            .collect()
    }

    pub fn report(&self) -> Result<ProbeReport> {
        Ok(ProbeReport {
            geometry: self.geometry()?,
            entries: self.entries()?,
        })
    }
}
