// SPDX-License-Identifier: GPL-3.0-only

//! One device, its in-memory table and the log of staged edits
//!
//! Every mutation is validated against the current table first and only then
//! applied to the table and recorded in the log. Nothing touches the disk until
//! [`DeviceSession::commit`].

use std::fmt;

use partstage_contracts::{
    NativePartitioner, OperationEvent, OperationId, OperationKind, OperationProgress,
    ProgressSink,
};
use partstage_types::{
    DeviceGeometry, FileSystemRegistry, FileSystemSpec, MAX_PRIMARY_SLOTS, PartitionFlag,
    PartitionKind, ProbeReport, SectorRange,
};
use serde::{Deserialize, Serialize};

use crate::entry::{EntryId, EntryOrigin, PartitionEntry};
use crate::error::{Result, SessionError};
use crate::log::{CreateRecord, PartitionRef, StagedOperation, StagedOperationLog};
use crate::table::PartitionTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// The table matches the disk.
    Clean,
    /// Edits are staged and not yet committed.
    Dirty,
    /// A commit failed midway; probe or undo before editing again.
    Error,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::Dirty => "dirty",
            Self::Error => "in error",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which end of the free region a new partition is placed at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    #[default]
    Start,
    End,
}

/// Parameters of [`DeviceSession::create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePartition {
    pub kind: PartitionKind,
    /// Filesystem name; ignored for extended partitions
    pub filesystem: String,
    pub placement: Placement,
    /// Size in sectors
    pub size: u64,
    pub label: String,
}

/// Sizes a partition can be resized to, in sectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResizeLimits {
    pub min_size: u64,
    /// 0 when only the grow bounds limit the size
    pub max_size: u64,
    pub bounds: SectorRange,
}

#[derive(Debug, Clone, Copy)]
enum Reshape {
    Resize,
    Move,
}

impl Reshape {
    fn name(self) -> &'static str {
        match self {
            Self::Resize => "resize",
            Self::Move => "move",
        }
    }
}

pub struct DeviceSession<N: NativePartitioner> {
    device: String,
    native: N,
    registry: FileSystemRegistry,
    table: PartitionTable,
    log: StagedOperationLog,
    state: SessionState,
    events: ProgressSink,
    revision: u64,
    last_probe_error: Option<String>,
}

impl<N: NativePartitioner> DeviceSession<N> {
    /// Probe `device` and start a clean session on it.
    ///
    /// A malformed table does not fail the session: the degraded table is
    /// installed and the problem is kept in [`Self::last_probe_error`].
    pub fn open(
        device: impl Into<String>,
        mut native: N,
        registry: FileSystemRegistry,
        events: ProgressSink,
    ) -> Result<Self> {
        let device = device.into();
        let operation_id = OperationId::new();
        let report = probe_native(&mut native, &device, &events, operation_id)?;
        let (table, last_probe_error) = build_table(report, &registry);

        let session = Self {
            device,
            native,
            registry,
            table,
            log: StagedOperationLog::new(),
            state: SessionState::Clean,
            events,
            revision: 0,
            last_probe_error,
        };
        session.finish_probe(operation_id);

        tracing::info!(
            "opened {} with {} entries",
            session.device,
            session.table.entries().len()
        );
        Ok(session)
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn geometry(&self) -> &DeviceGeometry {
        self.table.geometry()
    }

    pub fn table(&self) -> &PartitionTable {
        &self.table
    }

    pub fn log(&self) -> &StagedOperationLog {
        &self.log
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn registry(&self) -> &FileSystemRegistry {
        &self.registry
    }

    /// Increases on every change of the in-memory table.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn can_undo(&self) -> bool {
        self.state != SessionState::Clean
    }

    /// Why the last probe produced a degraded table, if it did.
    pub fn last_probe_error(&self) -> Option<&str> {
        self.last_probe_error.as_deref()
    }

    pub fn native(&self) -> &N {
        &self.native
    }

    pub fn native_mut(&mut self) -> &mut N {
        &mut self.native
    }

    /// Re-read the device. Refused while edits are staged.
    pub fn probe(&mut self) -> Result<()> {
        if self.state == SessionState::Dirty {
            return Err(SessionError::InvalidState {
                operation: "probe",
                state: self.state.as_str(),
            });
        }
        self.refresh()
    }

    /// Discard staged edits and re-read the device.
    pub fn undo(&mut self) -> Result<()> {
        if self.state == SessionState::Clean {
            tracing::debug!("nothing to undo on {}", self.device);
            return Ok(());
        }

        tracing::info!(
            "discarding {} staged operations on {}",
            self.log.len(),
            self.device
        );
        self.log.clear();
        self.refresh()
    }

    /// Replay the staged edits on disk, in order.
    ///
    /// The device is probed again afterwards whatever the outcome. A failure
    /// leaves the session in [`SessionState::Error`].
    pub fn commit(&mut self) -> Result<()> {
        if self.state != SessionState::Dirty {
            return Err(SessionError::InvalidState {
                operation: "commit",
                state: self.state.as_str(),
            });
        }
        self.ensure_writable()?;

        let operation_id = OperationId::new();
        let geometry = self.table.geometry().clone();
        tracing::info!(
            "committing {} staged operations to {}",
            self.log.len(),
            self.device
        );

        let outcome = self
            .log
            .replay(&mut self.native, &geometry, &self.events, operation_id);
        self.log.clear();

        match outcome {
            Ok(report) => {
                tracing::info!(
                    "commit on {} applied {} operations",
                    self.device,
                    report.applied
                );
                self.events.emit(OperationEvent::Completed {
                    operation_id,
                    operation: OperationKind::Commit,
                });
                self.refresh()
            }
            Err(failure) => {
                tracing::error!(
                    "commit on {} failed at operation {} ({}): {}",
                    self.device,
                    failure.index,
                    failure.operation,
                    failure.error
                );
                self.events.emit(OperationEvent::Failed {
                    operation_id,
                    operation: OperationKind::Commit,
                    error: failure.error.message.clone(),
                });

                self.state = SessionState::Error;
                if let Err(e) = self.reload() {
                    tracing::warn!("re-probe after failed commit on {}: {e}", self.device);
                }

                Err(SessionError::NativeFailure {
                    index: failure.index,
                    operation: failure.operation,
                    message: failure.error.message,
                })
            }
        }
    }

    /// Stage a new partition inside the free entry `target`.
    pub fn create(&mut self, target: EntryId, request: CreatePartition) -> Result<EntryId> {
        self.ensure_mutable("create")?;
        let free = self.entry(target)?;

        if !free.is_virtual() {
            return Err(SessionError::InvalidTarget(format!(
                "entry {target} is a {} partition, not free space",
                free.kind
            )));
        }
        match (request.kind, free.in_extended) {
            (PartitionKind::VirtualFree, _) => {
                return Err(SessionError::InvalidTarget(
                    "free space cannot be created".to_string(),
                ));
            }
            (PartitionKind::Logical, false) => {
                return Err(SessionError::InvalidTarget(
                    "logical partitions can only be created inside the extended partition"
                        .to_string(),
                ));
            }
            (PartitionKind::Primary | PartitionKind::Extended, true) => {
                return Err(SessionError::InvalidTarget(format!(
                    "{} partitions cannot be created inside the extended partition",
                    request.kind
                )));
            }
            _ => {}
        }

        if request.kind == PartitionKind::Extended && self.table.extended().is_some() {
            return Err(SessionError::TableFull(
                "the device already has an extended partition".to_string(),
            ));
        }
        if request.kind.uses_primary_slot()
            && self.table.primary_slots_used() >= MAX_PRIMARY_SLOTS
        {
            return Err(SessionError::TableFull(format!(
                "all {MAX_PRIMARY_SLOTS} primary slots are in use"
            )));
        }

        let filesystem = if request.kind == PartitionKind::Extended {
            FileSystemSpec::extended()
        } else {
            let spec = self.lookup_filesystem(&request.filesystem)?;
            if !spec.can_create {
                return Err(SessionError::UnsupportedFilesystem(format!(
                    "{} cannot be created",
                    spec.name
                )));
            }
            self.ensure_tool_usable(&spec)?;
            spec
        };

        let available = free.size();
        if request.size == 0 {
            return Err(SessionError::Capacity(
                "a partition needs at least one sector".to_string(),
            ));
        }
        if request.size > available {
            return Err(SessionError::Capacity(format!(
                "{} sectors requested but only {available} are free",
                request.size
            )));
        }
        if request.size < filesystem.min_size {
            return Err(SessionError::Capacity(format!(
                "{} needs at least {} sectors",
                filesystem.name, filesystem.min_size
            )));
        }
        if filesystem.max_size != 0 && request.size > filesystem.max_size {
            return Err(SessionError::Capacity(format!(
                "{} holds at most {} sectors",
                filesystem.name, filesystem.max_size
            )));
        }

        let range = match request.placement {
            Placement::Start => SectorRange::new(free.start, free.start + request.size - 1),
            Placement::End => SectorRange::new(free.end + 1 - request.size, free.end),
        };

        let staged = self.log.next_staged_id();
        let id = self.table.allocate_id();
        let entry = PartitionEntry::pending(
            id,
            staged,
            request.kind,
            range,
            filesystem.clone(),
            request.label.clone(),
        );
        self.table.replace(target, vec![entry])?;

        self.log.append(StagedOperation::Create(CreateRecord {
            staged,
            kind: request.kind,
            start: range.start,
            end: range.end,
            filesystem: filesystem.name,
            label: request.label,
            flags: Default::default(),
        }));

        tracing::info!(
            "staged {} partition {id} at sectors {}..={} on {}",
            request.kind,
            range.start,
            range.end,
            self.device
        );
        self.mark_changed();
        Ok(id)
    }

    /// Change the extent of a partition in place.
    pub fn resize(&mut self, target: EntryId, start: u64, end: u64) -> Result<()> {
        self.reshape(Reshape::Resize, target, start, end)
    }

    /// Relocate a partition; the size must stay the same.
    pub fn move_partition(&mut self, target: EntryId, start: u64, end: u64) -> Result<()> {
        self.reshape(Reshape::Move, target, start, end)
    }

    pub fn delete_partition(&mut self, target: EntryId) -> Result<()> {
        self.ensure_mutable("delete")?;
        let entry = self.entry(target)?;
        if entry.is_virtual() {
            return Err(SessionError::VirtualTarget);
        }

        let mut nested_creates = Vec::new();
        if entry.kind == PartitionKind::Extended {
            for logical in self.table.logical_partitions() {
                match logical.origin {
                    EntryOrigin::PendingCreate(staged) => nested_creates.push(staged),
                    _ => {
                        return Err(SessionError::InvalidTarget(
                            "the extended partition still holds logical partitions; delete them first"
                                .to_string(),
                        ));
                    }
                }
            }
        }

        self.table.replace(target, Vec::new())?;

        match entry.origin {
            EntryOrigin::PendingCreate(staged) => {
                self.log.remove_create(staged);
            }
            EntryOrigin::OnDisk(handle) => self.log.append(StagedOperation::Delete {
                target: PartitionRef::OnDisk(handle),
            }),
            EntryOrigin::Virtual => {}
        }
        for staged in nested_creates {
            self.log.remove_create(staged);
        }

        tracing::info!("staged delete of {} partition {target} on {}", entry.kind, self.device);
        self.mark_changed();
        Ok(())
    }

    /// Bind a new filesystem and label to an existing partition.
    pub fn format(&mut self, target: EntryId, filesystem: &str, label: &str) -> Result<()> {
        self.ensure_mutable("format")?;
        let entry = self.entry(target)?;
        if entry.is_virtual() {
            return Err(SessionError::VirtualTarget);
        }
        if entry.kind == PartitionKind::Extended {
            return Err(SessionError::InvalidTarget(
                "an extended partition cannot be formatted".to_string(),
            ));
        }

        let spec = self.lookup_filesystem(filesystem)?;
        if spec.is_free() || !spec.can_create {
            return Err(SessionError::UnsupportedFilesystem(format!(
                "{} cannot be created",
                spec.name
            )));
        }
        self.ensure_tool_usable(&spec)?;
        if !spec.fits(entry.size()) {
            return Err(SessionError::Capacity(format!(
                "a {}-sector partition is outside the {} size limits",
                entry.size(),
                spec.name
            )));
        }

        let name = spec.name.clone();
        let label = label.to_string();
        self.table.update(target, |entry| {
            entry.filesystem = spec;
            entry.label = label.clone();
            entry.min_size = 0;
        })?;

        self.stage(
            &entry,
            |record| {
                record.filesystem = name.clone();
                record.label = label.clone();
            },
            |target| StagedOperation::Format {
                target,
                filesystem: name.clone(),
                label: label.clone(),
            },
        );

        tracing::info!("staged format of partition {target} as {name} on {}", self.device);
        self.mark_changed();
        Ok(())
    }

    /// Set or clear the active (boot) flag. Setting it clears the previous holder.
    pub fn set_active(&mut self, target: EntryId, value: bool) -> Result<()> {
        self.ensure_mutable("set active")?;
        let entry = self.entry(target)?;
        if entry.is_virtual() {
            return Err(SessionError::VirtualTarget);
        }
        if !entry.can_be_active() {
            return Err(SessionError::InvalidTarget(format!(
                "only primary partitions can be marked active, not {}",
                entry.kind
            )));
        }
        if entry.flags.active == value {
            return Ok(());
        }

        let previous = self.table.set_active(target, value)?;
        if let Some(previous) = previous.and_then(|id| self.table.get(id).cloned()) {
            self.stage_flag(&previous, PartitionFlag::Active, false);
        }
        self.stage_flag(&entry, PartitionFlag::Active, value);

        self.mark_changed();
        Ok(())
    }

    pub fn set_hidden(&mut self, target: EntryId, value: bool) -> Result<()> {
        self.ensure_mutable("set hidden")?;
        let entry = self.entry(target)?;
        if entry.is_virtual() {
            return Err(SessionError::VirtualTarget);
        }
        if !entry.can_be_hidden() {
            return Err(SessionError::InvalidTarget(format!(
                "only primary and logical partitions can be hidden, not {}",
                entry.kind
            )));
        }
        if entry.flags.hidden == value {
            return Ok(());
        }

        self.table
            .update(target, |entry| entry.flags.hidden = value)?;
        self.stage_flag(&entry, PartitionFlag::Hidden, value);

        self.mark_changed();
        Ok(())
    }

    /// Filesystems the entry can be created or formatted with, in catalog order.
    pub fn eligible_filesystems(&self, target: EntryId) -> Result<Vec<&FileSystemSpec>> {
        let entry = self.entry(target)?;
        let busy = self.geometry().busy;

        let specs = if entry.is_virtual() {
            self.registry.eligible_for_create_on(entry.size(), busy)
        } else {
            self.registry
                .eligible_for_format(entry.size())
                .into_iter()
                .filter(|spec| !(busy && spec.external))
                .collect()
        };
        Ok(specs)
    }

    /// Sizes and sectors `target` may be resized to.
    pub fn resize_limits(&self, target: EntryId) -> Result<ResizeLimits> {
        let entry = self.entry(target)?;
        if entry.is_virtual() {
            return Err(SessionError::VirtualTarget);
        }
        let bounds = self.grow_range(&entry)?;

        let min_size = if entry.filesystem.enlarge_only() {
            entry.size()
        } else {
            minimum_size(&entry)
        };
        let max_size = if entry.is_unformatted() {
            0
        } else {
            entry.filesystem.max_size
        };

        Ok(ResizeLimits {
            min_size,
            max_size,
            bounds,
        })
    }

    fn reshape(&mut self, reshape: Reshape, target: EntryId, start: u64, end: u64) -> Result<()> {
        self.ensure_mutable(reshape.name())?;
        let entry = self.entry(target)?;
        if entry.is_virtual() {
            return Err(SessionError::VirtualTarget);
        }
        if end < start {
            return Err(SessionError::Capacity(format!(
                "end sector {end} lies before start sector {start}"
            )));
        }
        let bounds = self.grow_range(&entry)?;

        let filesystem = &entry.filesystem;
        if !entry.is_unformatted() {
            let capable = match reshape {
                Reshape::Resize => filesystem.can_resize,
                Reshape::Move => filesystem.can_move,
            };
            if !capable {
                return Err(SessionError::UnsupportedFilesystem(format!(
                    "{} partitions cannot be {}d",
                    filesystem.name,
                    reshape.name()
                )));
            }
            self.ensure_tool_usable(filesystem)?;
        }

        let requested = SectorRange::new(start, end);
        if !bounds.encloses(&requested) {
            return Err(SessionError::OutOfGrowBounds(format!(
                "sectors {start}..={end} exceed the available sectors {}..={}",
                bounds.start, bounds.end
            )));
        }

        let new_size = requested.len();
        if let Reshape::Move = reshape
            && new_size != entry.size()
        {
            return Err(SessionError::Capacity(format!(
                "a move keeps the partition size of {} sectors",
                entry.size()
            )));
        }
        if filesystem.enlarge_only() && new_size < entry.size() {
            return Err(SessionError::FilesystemDirection {
                filesystem: filesystem.name.clone(),
            });
        }
        if !entry.is_unformatted() {
            let min_size = minimum_size(&entry);
            if new_size < min_size {
                return Err(SessionError::Capacity(format!(
                    "{} partition cannot shrink below {min_size} sectors",
                    filesystem.name
                )));
            }
            if filesystem.max_size != 0 && new_size > filesystem.max_size {
                return Err(SessionError::Capacity(format!(
                    "{} holds at most {} sectors",
                    filesystem.name, filesystem.max_size
                )));
            }
        }
        if entry.kind == PartitionKind::Extended {
            let children = SectorRange::new(start.saturating_add(1), end);
            if self
                .table
                .logical_partitions()
                .any(|logical| !children.encloses(&logical.range()))
            {
                return Err(SessionError::Capacity(
                    "the extended partition must still contain its logical partitions"
                        .to_string(),
                ));
            }
        }

        if requested == entry.range() {
            tracing::debug!("{} of {target} leaves it unchanged", reshape.name());
            return Ok(());
        }

        let mut updated = entry.clone();
        updated.start = start;
        updated.end = end;
        self.table.replace(target, vec![updated])?;

        self.stage(
            &entry,
            |record| {
                record.start = start;
                record.end = end;
            },
            |target| match reshape {
                Reshape::Resize => StagedOperation::Resize { target, start, end },
                Reshape::Move => StagedOperation::Move { target, start, end },
            },
        );

        tracing::info!(
            "staged {} of partition {target} to sectors {start}..={end} on {}",
            reshape.name(),
            self.device
        );
        self.mark_changed();
        Ok(())
    }

    fn grow_range(&self, entry: &PartitionEntry) -> Result<SectorRange> {
        if self.table.is_degraded() {
            return Err(SessionError::OutOfGrowBounds(format!(
                "the last scan of {} failed; probe the device again first",
                self.device
            )));
        }
        entry.grow.range().ok_or_else(|| {
            SessionError::OutOfGrowBounds(
                "grow bounds are unknown after an internal error during partition scan"
                    .to_string(),
            )
        })
    }

    fn entry(&self, id: EntryId) -> Result<PartitionEntry> {
        self.table
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(format!("partition table entry {id}")))
    }

    fn lookup_filesystem(&self, name: &str) -> Result<FileSystemSpec> {
        self.registry
            .spec_for(name)
            .cloned()
            .map_err(|e| SessionError::NotFound(e.to_string()))
    }

    fn ensure_writable(&self) -> Result<()> {
        let geometry = self.table.geometry();
        if !geometry.has_table {
            return Err(SessionError::ReadOnlyDevice(format!(
                "{} has no partition table",
                self.device
            )));
        }
        if geometry.read_only {
            return Err(SessionError::ReadOnlyDevice(format!(
                "{} is opened read-only",
                self.device
            )));
        }
        Ok(())
    }

    fn ensure_mutable(&self, operation: &'static str) -> Result<()> {
        if self.state == SessionState::Error {
            return Err(SessionError::InvalidState {
                operation,
                state: self.state.as_str(),
            });
        }
        self.ensure_writable()?;
        if self.table.geometry().busy && !self.log.is_empty() {
            return Err(SessionError::DeviceBusy(format!(
                "{} has partitions in use; commit or undo the pending change first",
                self.device
            )));
        }
        Ok(())
    }

    fn ensure_tool_usable(&self, spec: &FileSystemSpec) -> Result<()> {
        if spec.external && self.table.geometry().busy {
            return Err(SessionError::UnsupportedFilesystem(format!(
                "{} needs an external tool that refuses to run while {} is busy",
                spec.name, self.device
            )));
        }
        Ok(())
    }

    /// Record an edit of `entry`: folded into its create record when it is
    /// still pending, appended otherwise.
    fn stage(
        &mut self,
        entry: &PartitionEntry,
        amend: impl FnOnce(&mut CreateRecord),
        operation: impl FnOnce(PartitionRef) -> StagedOperation,
    ) {
        match entry.origin {
            EntryOrigin::PendingCreate(staged) => {
                if !self.log.amend_create(staged, amend) {
                    tracing::warn!("no staged create for pending partition {staged}");
                }
            }
            EntryOrigin::OnDisk(handle) => {
                self.log.append(operation(PartitionRef::OnDisk(handle)));
            }
            EntryOrigin::Virtual => {}
        }
    }

    fn stage_flag(&mut self, entry: &PartitionEntry, flag: PartitionFlag, value: bool) {
        self.stage(
            entry,
            |record| record.flags.set(flag, value),
            |target| StagedOperation::SetFlag {
                target,
                flag,
                value,
            },
        );
    }

    fn mark_changed(&mut self) {
        self.state = if self.log.is_empty() {
            SessionState::Clean
        } else {
            SessionState::Dirty
        };
        self.revision += 1;
        self.events.emit(OperationEvent::TableChanged {
            device: self.device.clone(),
            revision: self.revision,
        });
    }

    /// Probe again and settle the state: clean on success or a degraded
    /// table, error when the device could not be read.
    fn refresh(&mut self) -> Result<()> {
        match self.reload() {
            Ok(()) => {
                self.state = SessionState::Clean;
                Ok(())
            }
            Err(e @ SessionError::Geometry(_)) => {
                self.state = SessionState::Clean;
                Err(e)
            }
            Err(e) => {
                self.state = SessionState::Error;
                Err(e)
            }
        }
    }

    /// Replace the table with a fresh probe. A malformed table is installed
    /// degraded and reported as [`SessionError::Geometry`].
    fn reload(&mut self) -> Result<()> {
        let operation_id = OperationId::new();
        let report = probe_native(&mut self.native, &self.device, &self.events, operation_id)?;
        let (table, last_probe_error) = build_table(report, &self.registry);

        self.table = table;
        self.last_probe_error = last_probe_error;
        self.finish_probe(operation_id);
        self.revision += 1;
        self.events.emit(OperationEvent::TableChanged {
            device: self.device.clone(),
            revision: self.revision,
        });

        match &self.last_probe_error {
            Some(message) => Err(SessionError::Geometry(message.clone())),
            None => Ok(()),
        }
    }

    fn finish_probe(&self, operation_id: OperationId) {
        self.events.emit(OperationEvent::Progress(OperationProgress::new(
            operation_id,
            OperationKind::Probe,
            "build partition table",
            2,
            2,
        )));
        self.events.emit(OperationEvent::Completed {
            operation_id,
            operation: OperationKind::Probe,
        });
    }
}

/// Minimum size the contents of `entry` fit in.
fn minimum_size(entry: &PartitionEntry) -> u64 {
    if entry.is_unformatted() {
        return 1;
    }
    entry.filesystem.min_size.max(entry.min_size).max(1)
}

fn probe_native<N: NativePartitioner + ?Sized>(
    native: &mut N,
    device: &str,
    events: &ProgressSink,
    operation_id: OperationId,
) -> Result<ProbeReport> {
    events.emit(OperationEvent::Progress(OperationProgress::new(
        operation_id,
        OperationKind::Probe,
        format!("probe {device}"),
        1,
        2,
    )));

    native.probe(device).map_err(|e| {
        tracing::error!("probe of {device} failed: {e}");
        events.emit(OperationEvent::Failed {
            operation_id,
            operation: OperationKind::Probe,
            error: e.message.clone(),
        });
        SessionError::ProbeFailed(e)
    })
}

fn build_table(report: ProbeReport, registry: &FileSystemRegistry) -> (PartitionTable, Option<String>) {
    let ProbeReport { geometry, entries } = report;
    match PartitionTable::load(geometry.clone(), &entries, registry) {
        Ok(table) => (table, None),
        Err(e) => {
            tracing::warn!("showing degraded table for {}: {e}", geometry.device);
            (
                PartitionTable::load_degraded(geometry, &entries, registry),
                Some(e.to_string()),
            )
        }
    }
}
