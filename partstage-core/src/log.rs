// SPDX-License-Identifier: GPL-3.0-only

//! Ordered record of staged mutations
//!
//! Records are replayed through the native library exactly in the order they
//! appear in the log. Edits to partitions that only exist as a pending create
//! are folded into that create record instead of being appended; one that
//! changes the extent also moves the record to the end of the log.

use std::collections::HashMap;
use std::fmt;

use partstage_contracts::{
    NativeError, NativePartitioner, OperationEvent, OperationId, OperationKind,
    OperationProgress, ProgressSink,
};
use partstage_types::{
    DeviceGeometry, FREE_FS, PartitionFlag, PartitionFlags, PartitionHandle, PartitionKind,
};
use serde::Serialize;

/// Identity of a partition created by a staged operation, valid until commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct StagedId(u64);

impl fmt::Display for StagedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "new#{}", self.0)
    }
}

/// The partition a record acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionRef {
    OnDisk(PartitionHandle),
    Staged(StagedId),
}

impl fmt::Display for PartitionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OnDisk(handle) => handle.fmt(f),
            Self::Staged(staged) => staged.fmt(f),
        }
    }
}

/// Everything needed to create, format and flag one new partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateRecord {
    pub staged: StagedId,
    pub kind: PartitionKind,
    pub start: u64,
    pub end: u64,
    pub filesystem: String,
    pub label: String,
    pub flags: PartitionFlags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum StagedOperation {
    Create(CreateRecord),
    Resize {
        target: PartitionRef,
        start: u64,
        end: u64,
    },
    Move {
        target: PartitionRef,
        start: u64,
        end: u64,
    },
    Delete {
        target: PartitionRef,
    },
    Format {
        target: PartitionRef,
        filesystem: String,
        label: String,
    },
    SetFlag {
        target: PartitionRef,
        flag: PartitionFlag,
        value: bool,
    },
}

impl fmt::Display for StagedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create(record) => {
                write!(
                    f,
                    "create {} partition {} at sectors {}..={}",
                    record.kind, record.staged, record.start, record.end
                )?;
                if record.filesystem != FREE_FS && record.kind != PartitionKind::Extended {
                    write!(f, " formatted {}", record.filesystem)?;
                }
                Ok(())
            }
            Self::Resize { target, start, end } => {
                write!(f, "resize partition {target} to sectors {start}..={end}")
            }
            Self::Move { target, start, end } => {
                write!(f, "move partition {target} to sectors {start}..={end}")
            }
            Self::Delete { target } => write!(f, "delete partition {target}"),
            Self::Format {
                target, filesystem, ..
            } => write!(f, "format partition {target} as {filesystem}"),
            Self::SetFlag {
                target,
                flag,
                value,
            } => {
                let verb = if *value { "set" } else { "clear" };
                write!(f, "{verb} {flag} flag on partition {target}")
            }
        }
    }
}

/// A record that failed during replay. Records after `index` were not run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayFailure {
    /// Position of the failing record; equal to the record count when the
    /// final table write failed.
    pub index: usize,
    pub operation: String,
    pub error: NativeError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub applied: usize,
    pub created: Vec<(StagedId, PartitionHandle)>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StagedOperationLog {
    records: Vec<StagedOperation>,
    #[serde(skip)]
    next_staged: u64,
}

impl StagedOperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_staged_id(&mut self) -> StagedId {
        self.next_staged += 1;
        StagedId(self.next_staged)
    }

    pub fn append(&mut self, operation: StagedOperation) {
        tracing::debug!("staged: {operation}");
        self.records.push(operation);
    }

    pub fn records(&self) -> &[StagedOperation] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Edit the pending create record of `staged`. Returns false when there is none.
    ///
    /// An edit that changes the extent moves the record to the end of the log,
    /// after any record that frees its new sectors. A pending extended
    /// partition takes the creates of its pending logicals along, still after
    /// it and in their original order.
    pub fn amend_create(&mut self, staged: StagedId, edit: impl FnOnce(&mut CreateRecord)) -> bool {
        let Some(position) = self.records.iter().position(
            |operation| matches!(operation, StagedOperation::Create(record) if record.staged == staged),
        ) else {
            return false;
        };

        let StagedOperation::Create(record) = &mut self.records[position] else {
            return false;
        };
        let extent = (record.start, record.end);
        edit(record);
        let reshaped = (record.start, record.end) != extent;
        let extended = record.kind == PartitionKind::Extended;
        tracing::debug!("amended staged create {staged}");

        if reshaped {
            let amended = self.records.remove(position);
            let (logicals, mut records): (Vec<_>, Vec<_>) =
                std::mem::take(&mut self.records)
                    .into_iter()
                    .partition(|operation| {
                        extended
                            && matches!(
                                operation,
                                StagedOperation::Create(record)
                                    if record.kind == PartitionKind::Logical
                            )
                    });
            records.push(amended);
            records.extend(logicals);
            self.records = records;
        }
        true
    }

    /// Drop the pending create record of `staged`. Returns false when there is none.
    pub fn remove_create(&mut self, staged: StagedId) -> bool {
        let before = self.records.len();
        self.records.retain(|operation| {
            !matches!(operation, StagedOperation::Create(record) if record.staged == staged)
        });
        before != self.records.len()
    }

    /// Run every record through `native`, then write the table.
    ///
    /// Stops at the first failure. The device is left in whatever state the
    /// native library reached, so the caller must probe again either way.
    pub fn replay<N: NativePartitioner + ?Sized>(
        &self,
        native: &mut N,
        geometry: &DeviceGeometry,
        progress: &ProgressSink,
        operation_id: OperationId,
    ) -> Result<ReplayReport, ReplayFailure> {
        let total_steps = self.records.len() as u32 + 1;
        let mut created: HashMap<StagedId, PartitionHandle> = HashMap::new();
        let mut report = ReplayReport::default();

        for (index, operation) in self.records.iter().enumerate() {
            let description = operation.to_string();
            progress.emit(OperationEvent::Progress(OperationProgress::new(
                operation_id,
                OperationKind::Commit,
                description.clone(),
                index as u32 + 1,
                total_steps,
            )));
            tracing::info!("replaying {}/{}: {description}", index + 1, self.records.len());

            let fail = |error: NativeError| ReplayFailure {
                index,
                operation: description.clone(),
                error,
            };

            match operation {
                StagedOperation::Create(record) => {
                    let handle = apply_create(native, geometry, record).map_err(fail)?;
                    created.insert(record.staged, handle);
                    report.created.push((record.staged, handle));
                }
                StagedOperation::Resize { target, start, end } => {
                    let handle = resolve(*target, &created).map_err(fail)?;
                    native
                        .resize_partition(handle, *start, *end)
                        .map_err(fail)?;
                }
                StagedOperation::Move { target, start, end } => {
                    let handle = resolve(*target, &created).map_err(fail)?;
                    native.move_partition(handle, *start, *end).map_err(fail)?;
                }
                StagedOperation::Delete { target } => {
                    let handle = resolve(*target, &created).map_err(fail)?;
                    native.delete_partition(handle).map_err(fail)?;
                }
                StagedOperation::Format {
                    target,
                    filesystem,
                    label,
                } => {
                    let handle = resolve(*target, &created).map_err(fail)?;
                    native
                        .format_partition(handle, filesystem, label)
                        .map_err(fail)?;
                }
                StagedOperation::SetFlag {
                    target,
                    flag,
                    value,
                } => {
                    let handle = resolve(*target, &created).map_err(fail)?;
                    native.set_flag(handle, *flag, *value).map_err(fail)?;
                }
            }

            report.applied += 1;
        }

        progress.emit(OperationEvent::Progress(OperationProgress::new(
            operation_id,
            OperationKind::Commit,
            "write partition table",
            total_steps,
            total_steps,
        )));
        native
            .write_table(&geometry.device)
            .map_err(|error| ReplayFailure {
                index: self.records.len(),
                operation: format!("write partition table of {}", geometry.device),
                error,
            })?;

        Ok(report)
    }
}

fn apply_create<N: NativePartitioner + ?Sized>(
    native: &mut N,
    geometry: &DeviceGeometry,
    record: &CreateRecord,
) -> Result<PartitionHandle, NativeError> {
    let handle = native.create_partition(geometry, record.kind, record.start, record.end)?;

    if record.kind != PartitionKind::Extended && record.filesystem != FREE_FS {
        native.format_partition(handle, &record.filesystem, &record.label)?;
    }
    for flag in record.flags.set_flags() {
        native.set_flag(handle, flag, true)?;
    }

    Ok(handle)
}

fn resolve(
    target: PartitionRef,
    created: &HashMap<StagedId, PartitionHandle>,
) -> Result<PartitionHandle, NativeError> {
    match target {
        PartitionRef::OnDisk(handle) => Ok(handle),
        PartitionRef::Staged(staged) => created.get(&staged).copied().ok_or_else(|| {
            NativeError::not_found(format!("partition {staged} was never created"))
        }),
    }
}
