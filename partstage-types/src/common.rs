//! Common utility types shared across models

use anyhow::Result;
use num_format::{Locale, ToFormattedString};
use serde::{Deserialize, Serialize};

/// Sector size assumed by filesystem size limits in the catalog.
pub const LOGICAL_SECTOR_SIZE: u64 = 512;

/// An inclusive sector range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SectorRange {
    /// First sector (inclusive)
    pub start: u64,

    /// Last sector (inclusive)
    pub end: u64,
}

impl SectorRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Number of sectors covered; zero for an inverted range
    pub fn len(&self) -> u64 {
        if self.end < self.start {
            0
        } else {
            self.end - self.start + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, sector: u64) -> bool {
        self.start <= sector && sector <= self.end
    }

    /// Whether `other` lies completely inside this range
    pub fn encloses(&self, other: &SectorRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn overlaps(&self, other: &SectorRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

/// Convert sectors to human-readable format (e.g., "1.50 GB")
pub fn sectors_to_pretty(sectors: u64, sector_size: u64, add_bytes: bool) -> String {
    let bytes = sectors.saturating_mul(sector_size);
    let mut steps = 0;
    let mut val: f64 = bytes as f64;

    while val > 1024. && steps <= 8 {
        val /= 1024.;
        steps += 1;
    }

    let unit = match steps {
        0 => "B",
        1 => "KB",
        2 => "MB",
        3 => "GB",
        4 => "TB",
        5 => "PB",
        6 => "EB",
        7 => "ZB",
        8 => "YB",
        _ => "Not Supported",
    };

    if add_bytes {
        let bytes_str = bytes.to_formatted_string(&Locale::en);
        format!("{:.2} {} ({} bytes)", val, unit, bytes_str)
    } else {
        format!("{:.2} {}", val, unit)
    }
}

/// Parse a human-readable size into sectors (e.g., "1.5 GB", "2048 s").
///
/// The `s` unit takes a raw sector count. Byte sizes round down to whole sectors.
pub fn pretty_to_sectors(pretty: &str, sector_size: u64) -> Result<u64> {
    let split = pretty.split_whitespace().collect::<Vec<&str>>();
    let string_value = split
        .first()
        .ok_or_else(|| anyhow::anyhow!("Invalid input"))?;

    let mut val: f64 = string_value.parse()?;
    let unit = if split.len() > 1 {
        *split
            .last()
            .ok_or_else(|| anyhow::anyhow!("Invalid input"))?
    } else {
        "s"
    };

    if unit == "s" {
        return Ok(val as u64);
    }

    let mut steps = match unit {
        "B" => 0,
        "KB" | "KiB" => 1,
        "MB" | "MiB" => 2,
        "GB" | "GiB" => 3,
        "TB" | "TiB" => 4,
        "PB" | "PiB" => 5,
        _ => return Err(anyhow::anyhow!("Invalid unit: {}", unit)),
    };

    while steps > 0 {
        val *= 1024.;
        steps -= 1;
    }

    if sector_size == 0 {
        return Err(anyhow::anyhow!("Sector size must not be zero"));
    }

    Ok(val as u64 / sector_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inclusive_range_lengths() {
        assert_eq!(SectorRange::new(10, 10).len(), 1);
        assert_eq!(SectorRange::new(10, 19).len(), 10);
        assert!(SectorRange::new(10, 9).is_empty());
    }

    #[test]
    fn ranges_sharing_a_sector_overlap() {
        let a = SectorRange::new(0, 99);
        assert!(a.overlaps(&SectorRange::new(99, 120)));
        assert!(!a.overlaps(&SectorRange::new(100, 120)));
        assert!(a.encloses(&SectorRange::new(10, 99)));
    }

    #[test]
    fn pretty_sizes_convert_to_sectors() {
        assert_eq!(pretty_to_sectors("1 MiB", 512).unwrap(), 2048);
        assert_eq!(pretty_to_sectors("4096 s", 512).unwrap(), 4096);
        assert_eq!(pretty_to_sectors("300", 512).unwrap(), 300);
        assert!(pretty_to_sectors("3 parsecs", 512).is_err());
    }

    #[test]
    fn sectors_render_with_units() {
        assert_eq!(sectors_to_pretty(2048, 512, false), "1024.00 KB");
        assert_eq!(
            sectors_to_pretty(4096, 512, true),
            "2.00 MB (2,097,152 bytes)"
        );
    }
}
