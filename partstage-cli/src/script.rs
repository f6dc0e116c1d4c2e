// SPDX-License-Identifier: GPL-3.0-only

//! Edit scripts: TOML lists of staged operations applied to a session
//!
//! Partitions are addressed by any sector inside them (`at`), so a script
//! stays valid while earlier steps split and merge free regions.
//!
//! ```toml
//! [[op]]
//! action = "create"
//! at = "1435648"
//! kind = "primary"
//! fs = "ext4"
//! size = "100 MiB"
//! ```

use std::fs;
use std::path::Path;

use anyhow::Context;
use partstage_contracts::NativePartitioner;
use partstage_core::{CreatePartition, DeviceSession, EntryId, Placement};
use partstage_types::{PartitionKind, pretty_to_sectors};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Script {
    #[serde(rename = "op", default)]
    pub steps: Vec<ScriptStep>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScriptStep {
    Create {
        at: String,
        kind: PartitionKind,
        #[serde(default)]
        fs: String,
        size: String,
        #[serde(default)]
        placement: Placement,
        #[serde(default)]
        label: String,
    },
    Resize {
        at: String,
        start: String,
        end: String,
    },
    Move {
        at: String,
        start: String,
        end: String,
    },
    Delete {
        at: String,
    },
    Format {
        at: String,
        fs: String,
        #[serde(default)]
        label: String,
    },
    SetActive {
        at: String,
        #[serde(default = "enabled")]
        value: bool,
    },
    SetHidden {
        at: String,
        #[serde(default = "enabled")]
        value: bool,
    },
    Undo,
    Commit,
}

fn enabled() -> bool {
    true
}

impl ScriptStep {
    pub fn action(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Resize { .. } => "resize",
            Self::Move { .. } => "move",
            Self::Delete { .. } => "delete",
            Self::Format { .. } => "format",
            Self::SetActive { .. } => "set_active",
            Self::SetHidden { .. } => "set_hidden",
            Self::Undo => "undo",
            Self::Commit => "commit",
        }
    }
}

impl Script {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        toml::from_str(raw).context("parse edit script")
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read edit script {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("in {}", path.display()))
    }

    /// Apply every step in order, stopping at the first rejected one.
    ///
    /// Steps already applied stay staged (or committed) on failure.
    pub fn run<N: NativePartitioner>(&self, session: &mut DeviceSession<N>) -> anyhow::Result<()> {
        for (index, step) in self.steps.iter().enumerate() {
            let number = index + 1;
            tracing::info!("step {number}: {}", step.action());
            apply(session, step)
                .with_context(|| format!("step {number} ({}) rejected", step.action()))?;
        }
        Ok(())
    }
}

fn apply<N: NativePartitioner>(
    session: &mut DeviceSession<N>,
    step: &ScriptStep,
) -> anyhow::Result<()> {
    match step {
        ScriptStep::Create {
            at,
            kind,
            fs,
            size,
            placement,
            label,
        } => {
            let target = resolve(session, at)?;
            let request = CreatePartition {
                kind: *kind,
                filesystem: fs.clone(),
                placement: *placement,
                size: sectors(session, size)?,
                label: label.clone(),
            };
            let id = session.create(target, request)?;
            tracing::debug!("created entry {id}");
        }
        ScriptStep::Resize { at, start, end } => {
            let target = resolve(session, at)?;
            let (start, end) = (sectors(session, start)?, sectors(session, end)?);
            session.resize(target, start, end)?;
        }
        ScriptStep::Move { at, start, end } => {
            let target = resolve(session, at)?;
            let (start, end) = (sectors(session, start)?, sectors(session, end)?);
            session.move_partition(target, start, end)?;
        }
        ScriptStep::Delete { at } => {
            let target = resolve(session, at)?;
            session.delete_partition(target)?;
        }
        ScriptStep::Format { at, fs, label } => {
            let target = resolve(session, at)?;
            session.format(target, fs, label)?;
        }
        ScriptStep::SetActive { at, value } => {
            let target = resolve(session, at)?;
            session.set_active(target, *value)?;
        }
        ScriptStep::SetHidden { at, value } => {
            let target = resolve(session, at)?;
            session.set_hidden(target, *value)?;
        }
        ScriptStep::Undo => session.undo()?,
        ScriptStep::Commit => session.commit()?,
    }
    Ok(())
}

fn sectors<N: NativePartitioner>(session: &DeviceSession<N>, value: &str) -> anyhow::Result<u64> {
    pretty_to_sectors(value, session.geometry().sector_size)
        .with_context(|| format!("invalid position or size {value:?}"))
}

/// Entry covering the sector `at` names.
fn resolve<N: NativePartitioner>(session: &DeviceSession<N>, at: &str) -> anyhow::Result<EntryId> {
    let sector = sectors(session, at)?;
    let entry = session.table().entry_at(sector)?;
    Ok(entry.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use partstage_contracts::ProgressSink;
    use partstage_core::SessionState;
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
    fn steps_parse_with_defaults() {
        let script = Script::parse(
            r#"
            [[op]]
            action = "create"
            at = "1435648"
            kind = "primary"
            fs = "ext4"
            size = "100 MiB"

            [[op]]
            action = "set_active"
            at = "1435648"

            [[op]]
            action = "commit"
            "#,
        )
        .unwrap();

        assert_eq!(script.steps.len(), 3);
        assert!(matches!(
            &script.steps[0],
            ScriptStep::Create { placement: Placement::Start, label, .. } if label.is_empty()
        ));
        assert_eq!(
            script.steps[1],
            ScriptStep::SetActive {
                at: "1435648".to_string(),
                value: true
            }
        );
        assert_eq!(script.steps[2], ScriptStep::Commit);
    }

    #[test]
    fn unknown_actions_are_rejected() {
        assert!(Script::parse("[[op]]\naction = \"shred\"\nat = \"0\"").is_err());
    }

    #[test]
    fn scripts_stage_edits_in_order() {
        let mut session = msdos_session();
        let script = Script::parse(
            r#"
            [[op]]
            action = "create"
            at = "1435648"
            kind = "primary"
            fs = "ext4"
            size = "100 MiB"
            label = "scratch"

            [[op]]
            action = "resize"
            at = "2048"
            start = "2048"
            end = "150000"
            "#,
        )
        .unwrap();

        script.run(&mut session).unwrap();

        assert_eq!(session.state(), SessionState::Dirty);
        assert_eq!(session.log().len(), 2);
        let created = session.table().entry_at(1_435_648).unwrap();
        assert_eq!(created.size(), 204_800);
        assert_eq!(created.label, "scratch");
        assert_eq!(session.table().entry_at(2_048).unwrap().end, 150_000);
    }

    #[test]
    fn demo_script_commits_to_the_lab_disk() {
        let mut session = msdos_session();
        let script =
            Script::parse(include_str!("../../resources/scripts/msdos-reshuffle.toml")).unwrap();

        script.run(&mut session).unwrap();

        assert_eq!(session.state(), SessionState::Clean);
        let disk = session.native();
        assert_eq!(disk.partition_by_number(5).unwrap().end, 823_295);
        let scratch = disk.partition_by_number(6).unwrap();
        assert_eq!(scratch.label, "scratch");
        assert_eq!(scratch.start, 823_296);
        assert!(disk.partition_by_number(2).unwrap().flags.active);
        assert!(!disk.partition_by_number(1).unwrap().flags.active);
    }

    #[test]
    fn failing_steps_name_their_position() {
        let mut session = msdos_session();
        let script = Script::parse(
            r#"
            [[op]]
            action = "delete"
            at = "618496"

            [[op]]
            action = "delete"
            at = "1435648"
            "#,
        )
        .unwrap();

        let error = script.run(&mut session).unwrap_err();

        assert!(format!("{error:#}").contains("step 2 (delete) rejected"));
        // the first step stays staged
        assert_eq!(session.log().len(), 1);
    }
}
