// SPDX-License-Identifier: GPL-3.0-only

//! Text and JSON renderings of a session

use std::fmt::Write;

use partstage_contracts::NativePartitioner;
use partstage_core::{DeviceSession, PartitionEntry, SessionState, StagedOperation};
use partstage_types::{
    DeviceGeometry, FileSystemSpec, PartitionKind, ResizeDirection, sectors_to_pretty,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct SessionView<'a> {
    pub device: &'a str,
    pub model: &'a str,
    pub sector_size: u64,
    pub total_sectors: u64,
    pub state: SessionState,
    pub revision: u64,
    pub degraded: bool,
    pub probe_error: Option<&'a str>,
    pub entries: Vec<&'a PartitionEntry>,
    pub staged: Vec<StagedView<'a>>,
    #[serde(skip)]
    geometry: &'a DeviceGeometry,
}

#[derive(Debug, Serialize)]
pub struct StagedView<'a> {
    pub description: String,
    pub record: &'a StagedOperation,
}

impl<'a> SessionView<'a> {
    pub fn of<N: NativePartitioner>(session: &'a DeviceSession<N>) -> Self {
        let geometry = session.geometry();
        Self {
            device: session.device(),
            model: &geometry.model,
            sector_size: geometry.sector_size,
            total_sectors: geometry.total_sectors(),
            state: session.state(),
            revision: session.revision(),
            degraded: session.table().is_degraded(),
            probe_error: session.last_probe_error(),
            entries: session.table().entries(),
            staged: session
                .log()
                .records()
                .iter()
                .map(|record| StagedView {
                    description: record.to_string(),
                    record,
                })
                .collect(),
            geometry,
        }
    }
}

pub fn render_session(view: &SessionView<'_>, add_bytes: bool) -> String {
    let mut out = String::new();

    let _ = writeln!(
        out,
        "{} ({}), {} sectors of {} bytes, {}",
        view.device, view.model, view.total_sectors, view.sector_size, view.state
    );
    if view.degraded {
        let reason = view.probe_error.unwrap_or("unknown problem");
        let _ = writeln!(out, "table is degraded, resize and move disabled: {reason}");
    }
    let _ = writeln!(out);

    let _ = writeln!(
        out,
        "{:<14} {:<10} {:>12} {:>12} {:<12} {:<12} {:<10} {}",
        "PARTITION", "KIND", "START", "END", "SIZE", "FILESYSTEM", "LABEL", "FLAGS"
    );
    for entry in &view.entries {
        let _ = writeln!(out, "{}", entry_row(view, entry, add_bytes));
    }

    if !view.staged.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "staged operations:");
        for (index, staged) in view.staged.iter().enumerate() {
            let _ = writeln!(out, "  {}. {}", index + 1, staged.description);
        }
    }

    out
}

fn entry_row(view: &SessionView<'_>, entry: &PartitionEntry, add_bytes: bool) -> String {
    let name = match entry.index {
        Some(number) => view.geometry.partition_name(number),
        None => "-".to_string(),
    };
    // numbers of pending partitions are provisional
    let name = if entry.is_pending_create() {
        format!("{name}*")
    } else {
        name
    };
    let kind = if entry.in_extended {
        format!("  {}", entry.kind)
    } else {
        entry.kind.to_string()
    };
    let filesystem = match entry.kind {
        PartitionKind::VirtualFree | PartitionKind::Extended => String::new(),
        _ => entry.filesystem.name.clone(),
    };

    let mut flags = Vec::new();
    if entry.flags.active {
        flags.push("active");
    }
    if entry.flags.hidden {
        flags.push("hidden");
    }

    format!(
        "{:<14} {:<10} {:>12} {:>12} {:<12} {:<12} {:<10} {}",
        name,
        kind,
        entry.start,
        entry.end,
        sectors_to_pretty(entry.size(), view.sector_size, add_bytes),
        filesystem,
        entry.label,
        flags.join(",")
    )
}

pub fn render_filesystems<'a>(specs: impl IntoIterator<Item = &'a FileSystemSpec>) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<12} {:<7} {:<7} {:<5} {:>14} {:>14} {}",
        "NAME", "CREATE", "RESIZE", "MOVE", "MIN SECTORS", "MAX SECTORS", "NOTES"
    );

    for spec in specs {
        let mut notes = Vec::new();
        if spec.resize_direction == ResizeDirection::EnlargeOnly {
            notes.push("enlarge only");
        }
        if spec.external {
            notes.push("external tool");
        }
        let max = if spec.max_size == 0 {
            "-".to_string()
        } else {
            spec.max_size.to_string()
        };

        let _ = writeln!(
            out,
            "{:<12} {:<7} {:<7} {:<5} {:>14} {:>14} {}",
            spec.name,
            yes_no(spec.can_create),
            yes_no(spec.can_resize),
            yes_no(spec.can_move),
            spec.min_size,
            max,
            notes.join(", ")
        );
    }

    out
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partstage_contracts::ProgressSink;
    use partstage_testing::{MemoryDisk, fixtures};
    use partstage_types::FileSystemRegistry;

    fn msdos_session() -> DeviceSession<MemoryDisk> {
        let disk = fixtures::msdos_disk().unwrap();
        let device = disk.geometry().device.clone();
        DeviceSession::open(
            device,
            disk,
            FileSystemRegistry::builtin(),
            ProgressSink::none(),
        )
        .unwrap()
    }

    #[test]
    fn text_view_lists_nested_entries_and_staged_edits() {
        let mut session = msdos_session();
        let swap = session.table().entry_at(618_496).unwrap().id;
        session.delete_partition(swap).unwrap();

        let text = render_session(&SessionView::of(&session), false);

        assert!(text.starts_with(
            "/dev/sdt (partstage lab disk), 4192256 sectors of 512 bytes, dirty"
        ));
        assert!(text.contains("/dev/sdt5"));
        assert!(text.contains("  logical"));
        assert!(text.contains("root"));
        assert!(text.contains("staged operations:"));
        assert!(text.contains("1. delete partition #"));
    }

    #[test]
    fn json_view_carries_state_and_records() {
        let mut session = msdos_session();
        let swap = session.table().entry_at(618_496).unwrap().id;
        session.delete_partition(swap).unwrap();

        let json = serde_json::to_value(SessionView::of(&session)).unwrap();

        assert_eq!(json["state"], "dirty");
        assert_eq!(json["degraded"], false);
        assert_eq!(json["staged"][0]["record"]["op"], "delete");
        assert_eq!(
            json["entries"].as_array().unwrap().len(),
            session.table().entries().len()
        );
    }

    #[test]
    fn filesystem_listing_marks_restrictions() {
        let registry = FileSystemRegistry::builtin();
        let text = render_filesystems(registry.iter());

        let xfs = text.lines().find(|line| line.starts_with("xfs")).unwrap();
        assert!(xfs.contains("enlarge only"));
    }
}
