//! In-memory stand-in for the native partitioning library
//!
//! [`MemoryDisk`] keeps an msdos-style partition list, applies every call
//! immediately, journals the calls it receives and can be told to fail a
//! specific call. It enforces the same layout rules a real library would, so a
//! bad replay shows up as an error rather than a corrupt simulated disk.

use chrono::{DateTime, Utc};
use partstage_contracts::{NativeError, NativeErrorKind, NativePartitioner};
use partstage_types::{
    DeviceGeometry, FIRST_LOGICAL_NUMBER, MAX_PRIMARY_SLOTS, PartitionFlag, PartitionHandle,
    PartitionKind, ProbeReport, RawEntry, SectorRange,
};
use serde::Serialize;

use crate::errors::Result;
use crate::spec::LabSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NativeCallKind {
    Probe,
    Create,
    Resize,
    Move,
    Delete,
    Format,
    SetFlag,
    WriteTable,
}

/// One call received by the disk, successful or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NativeCall {
    pub kind: NativeCallKind,
    pub handle: Option<PartitionHandle>,
    pub detail: String,
    pub failed: bool,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct InjectedFailure {
    kind: Option<NativeCallKind>,
    /// 1-based count of matching calls
    nth: usize,
    seen: usize,
    message: String,
}

#[derive(Debug, Clone)]
pub struct MemoryDisk {
    geometry: DeviceGeometry,
    partitions: Vec<RawEntry>,
    next_handle: u64,
    journal: Vec<NativeCall>,
    failures: Vec<InjectedFailure>,
    table_writes: usize,
}

impl MemoryDisk {
    pub fn new(geometry: DeviceGeometry) -> Self {
        Self {
            geometry,
            partitions: Vec::new(),
            next_handle: 1,
            journal: Vec::new(),
            failures: Vec::new(),
            table_writes: 0,
        }
    }

    /// Disk described by a lab spec. Partitions are taken as written, even
    /// when they do not form a valid table.
    pub fn from_spec(spec: &LabSpec) -> Result<Self> {
        let report = spec.report()?;
        let mut disk = Self::new(report.geometry);
        for entry in report.entries {
            disk.insert_raw(entry);
        }
        tracing::debug!(
            "memory disk {} built from spec {}",
            disk.geometry.device,
            spec.name
        );
        Ok(disk)
    }

    /// Add a partition without any validation.
    pub fn insert_raw(&mut self, entry: RawEntry) {
        self.next_handle = self.next_handle.max(entry.handle.0 + 1);
        self.partitions.push(entry);
    }

    pub fn geometry(&self) -> &DeviceGeometry {
        &self.geometry
    }

    pub fn geometry_mut(&mut self) -> &mut DeviceGeometry {
        &mut self.geometry
    }

    /// Partitions currently on the simulated disk, in insertion order.
    pub fn partitions(&self) -> &[RawEntry] {
        &self.partitions
    }

    pub fn partition(&self, handle: PartitionHandle) -> Option<&RawEntry> {
        self.partitions.iter().find(|entry| entry.handle == handle)
    }

    pub fn partition_by_number(&self, number: u32) -> Option<&RawEntry> {
        self.partitions.iter().find(|entry| entry.number == number)
    }

    pub fn journal(&self) -> &[NativeCall] {
        &self.journal
    }

    /// Journaled call kinds, excluding probes.
    pub fn mutations(&self) -> Vec<NativeCallKind> {
        self.journal
            .iter()
            .filter(|call| call.kind != NativeCallKind::Probe)
            .map(|call| call.kind)
            .collect()
    }

    pub fn clear_journal(&mut self) {
        self.journal.clear();
    }

    pub fn table_writes(&self) -> usize {
        self.table_writes
    }

    /// Fail the `nth` call of `kind` (any kind when `None`) from now on.
    pub fn fail_nth(&mut self, kind: Option<NativeCallKind>, nth: usize, message: impl Into<String>) {
        self.failures.push(InjectedFailure {
            kind,
            nth: nth.max(1),
            seen: 0,
            message: message.into(),
        });
    }

    pub fn fail_next(&mut self, kind: NativeCallKind, message: impl Into<String>) {
        self.fail_nth(Some(kind), 1, message);
    }

    /// Journal the call and fire an injected failure if one is due.
    fn enter(
        &mut self,
        kind: NativeCallKind,
        handle: Option<PartitionHandle>,
        detail: String,
    ) -> std::result::Result<(), NativeError> {
        let mut injected = None;
        for failure in &mut self.failures {
            if failure.kind.is_none_or(|expected| expected == kind) {
                failure.seen += 1;
                if failure.seen == failure.nth && injected.is_none() {
                    injected = Some(failure.message.clone());
                }
            }
        }

        self.journal.push(NativeCall {
            kind,
            handle,
            detail,
            failed: injected.is_some(),
            at: Utc::now(),
        });

        match injected {
            Some(message) => Err(NativeError::new(NativeErrorKind::Io, message)),
            None => Ok(()),
        }
    }

    fn mark_failed(&mut self) {
        if let Some(call) = self.journal.last_mut() {
            call.failed = true;
        }
    }

    fn index_of(&self, handle: PartitionHandle) -> std::result::Result<usize, NativeError> {
        self.partitions
            .iter()
            .position(|entry| entry.handle == handle)
            .ok_or_else(|| NativeError::not_found(format!("no partition with handle {handle}")))
    }

    fn ensure_writable(&self) -> std::result::Result<(), NativeError> {
        if self.geometry.read_only || !self.geometry.has_table {
            return Err(NativeError::new(
                NativeErrorKind::PermissionDenied,
                format!("{} cannot be written", self.geometry.device),
            ));
        }
        Ok(())
    }

    fn extended(&self) -> Option<&RawEntry> {
        self.partitions
            .iter()
            .find(|entry| entry.kind == PartitionKind::Extended)
    }

    /// Check that `range` can hold a partition of `kind`, ignoring `skip`.
    fn check_placement(
        &self,
        kind: PartitionKind,
        range: SectorRange,
        skip: Option<PartitionHandle>,
    ) -> std::result::Result<(), NativeError> {
        if range.is_empty() || !self.geometry.range().encloses(&range) {
            return Err(NativeError::invalid_input(format!(
                "sectors {}..={} are outside {}",
                range.start, range.end, self.geometry.device
            )));
        }

        if kind == PartitionKind::Logical {
            let extended = self
                .extended()
                .ok_or_else(|| NativeError::invalid_input("no extended partition"))?;
            let children = SectorRange::new(extended.start + 1, extended.end);
            if !children.encloses(&range) {
                return Err(NativeError::invalid_input(format!(
                    "sectors {}..={} are outside the extended partition",
                    range.start, range.end
                )));
            }
        }

        let nested = kind == PartitionKind::Logical;
        let clash = self.partitions.iter().find(|entry| {
            Some(entry.handle) != skip
                && (entry.kind == PartitionKind::Logical) == nested
                && entry.range().overlaps(&range)
        });
        if let Some(other) = clash {
            return Err(NativeError::invalid_input(format!(
                "sectors {}..={} overlap partition {}",
                range.start, range.end, other.number
            )));
        }

        Ok(())
    }

    fn renumber_logicals(&mut self) {
        let mut logicals: Vec<(u64, PartitionHandle)> = self
            .partitions
            .iter()
            .filter(|entry| entry.kind == PartitionKind::Logical)
            .map(|entry| (entry.start, entry.handle))
            .collect();
        logicals.sort();

        for (number, (_, handle)) in (FIRST_LOGICAL_NUMBER..).zip(logicals) {
            if let Some(entry) = self.partitions.iter_mut().find(|entry| entry.handle == handle) {
                entry.number = number;
            }
        }
    }

    fn reshape(
        &mut self,
        kind: NativeCallKind,
        handle: PartitionHandle,
        start: u64,
        end: u64,
    ) -> std::result::Result<(), NativeError> {
        self.enter(kind, Some(handle), format!("{start}..={end}"))?;
        let result = self.apply_reshape(kind, handle, SectorRange::new(start, end));
        if result.is_err() {
            self.mark_failed();
        }
        result
    }

    fn apply_reshape(
        &mut self,
        kind: NativeCallKind,
        handle: PartitionHandle,
        range: SectorRange,
    ) -> std::result::Result<(), NativeError> {
        self.ensure_writable()?;
        let index = self.index_of(handle)?;
        let entry = self.partitions[index].clone();

        if kind == NativeCallKind::Move && range.len() != entry.range().len() {
            return Err(NativeError::invalid_input("a move must keep the partition size"));
        }
        self.check_placement(entry.kind, range, Some(handle))?;

        if entry.kind == PartitionKind::Extended {
            let children = SectorRange::new(range.start + 1, range.end);
            let orphaned = self.partitions.iter().any(|other| {
                other.kind == PartitionKind::Logical && !children.encloses(&other.range())
            });
            if orphaned {
                return Err(NativeError::invalid_input(
                    "extended partition would no longer contain its logical partitions",
                ));
            }
        }

        let entry = &mut self.partitions[index];
        entry.start = range.start;
        entry.end = range.end;
        if entry.kind == PartitionKind::Logical {
            self.renumber_logicals();
        }
        Ok(())
    }

    fn apply_create(
        &mut self,
        kind: PartitionKind,
        range: SectorRange,
    ) -> std::result::Result<PartitionHandle, NativeError> {
        self.ensure_writable()?;
        if kind == PartitionKind::VirtualFree {
            return Err(NativeError::invalid_input("free space cannot be created"));
        }
        if kind == PartitionKind::Extended && self.extended().is_some() {
            return Err(NativeError::invalid_input("an extended partition already exists"));
        }
        self.check_placement(kind, range, None)?;

        let number = if kind.uses_primary_slot() {
            (1..=MAX_PRIMARY_SLOTS)
                .find(|number| {
                    !self
                        .partitions
                        .iter()
                        .any(|entry| entry.kind.uses_primary_slot() && entry.number == *number)
                })
                .ok_or_else(|| NativeError::invalid_input("no free primary slot"))?
        } else {
            0
        };

        let handle = PartitionHandle(self.next_handle);
        self.next_handle += 1;
        self.partitions.push(RawEntry {
            handle,
            number,
            start: range.start,
            end: range.end,
            kind,
            fs_name: String::new(),
            label: String::new(),
            flags: Default::default(),
            min_size: 0,
        });
        if kind == PartitionKind::Logical {
            self.renumber_logicals();
        }

        Ok(handle)
    }

    fn apply_delete(&mut self, handle: PartitionHandle) -> std::result::Result<(), NativeError> {
        self.ensure_writable()?;
        let index = self.index_of(handle)?;
        let entry = &self.partitions[index];

        if entry.kind == PartitionKind::Extended
            && self
                .partitions
                .iter()
                .any(|other| other.kind == PartitionKind::Logical)
        {
            return Err(NativeError::busy(
                "extended partition still holds logical partitions",
            ));
        }

        let removed = self.partitions.remove(index);
        if removed.kind == PartitionKind::Logical {
            self.renumber_logicals();
        }
        Ok(())
    }
}

impl NativePartitioner for MemoryDisk {
    fn probe(&mut self, device: &str) -> std::result::Result<ProbeReport, NativeError> {
        self.enter(NativeCallKind::Probe, None, device.to_string())?;
        if device != self.geometry.device {
            self.mark_failed();
            return Err(NativeError::not_found(format!("no device {device}")));
        }

        let mut entries = self.partitions.clone();
        entries.sort_by_key(|entry| (entry.kind == PartitionKind::Logical, entry.start));
        Ok(ProbeReport {
            geometry: self.geometry.clone(),
            entries,
        })
    }

    fn create_partition(
        &mut self,
        geometry: &DeviceGeometry,
        kind: PartitionKind,
        start: u64,
        end: u64,
    ) -> std::result::Result<PartitionHandle, NativeError> {
        self.enter(NativeCallKind::Create, None, format!("{kind} {start}..={end}"))?;
        if geometry.device != self.geometry.device {
            self.mark_failed();
            return Err(NativeError::not_found(format!("no device {}", geometry.device)));
        }

        match self.apply_create(kind, SectorRange::new(start, end)) {
            Ok(handle) => {
                if let Some(call) = self.journal.last_mut() {
                    call.handle = Some(handle);
                }
                Ok(handle)
            }
            Err(e) => {
                self.mark_failed();
                Err(e)
            }
        }
    }

    fn resize_partition(
        &mut self,
        handle: PartitionHandle,
        start: u64,
        end: u64,
    ) -> std::result::Result<(), NativeError> {
        self.reshape(NativeCallKind::Resize, handle, start, end)
    }

    fn move_partition(
        &mut self,
        handle: PartitionHandle,
        start: u64,
        end: u64,
    ) -> std::result::Result<(), NativeError> {
        self.reshape(NativeCallKind::Move, handle, start, end)
    }

    fn delete_partition(&mut self, handle: PartitionHandle) -> std::result::Result<(), NativeError> {
        self.enter(NativeCallKind::Delete, Some(handle), String::new())?;
        let result = self.apply_delete(handle);
        if result.is_err() {
            self.mark_failed();
        }
        result
    }

    fn format_partition(
        &mut self,
        handle: PartitionHandle,
        fs_name: &str,
        label: &str,
    ) -> std::result::Result<(), NativeError> {
        self.enter(NativeCallKind::Format, Some(handle), fs_name.to_string())?;
        let result = self.ensure_writable().and_then(|()| self.index_of(handle));
        match result {
            Ok(index) if self.partitions[index].kind == PartitionKind::Extended => {
                self.mark_failed();
                Err(NativeError::new(
                    NativeErrorKind::Unsupported,
                    "extended partitions cannot be formatted",
                ))
            }
            Ok(index) => {
                let entry = &mut self.partitions[index];
                entry.fs_name = fs_name.to_string();
                entry.label = label.to_string();
                entry.min_size = 0;
                Ok(())
            }
            Err(e) => {
                self.mark_failed();
                Err(e)
            }
        }
    }

    fn set_flag(
        &mut self,
        handle: PartitionHandle,
        flag: PartitionFlag,
        value: bool,
    ) -> std::result::Result<(), NativeError> {
        self.enter(
            NativeCallKind::SetFlag,
            Some(handle),
            format!("{}={value}", flag.native_name()),
        )?;
        let index = match self.ensure_writable().and_then(|()| self.index_of(handle)) {
            Ok(index) => index,
            Err(e) => {
                self.mark_failed();
                return Err(e);
            }
        };

        // The boot flag is exclusive on msdos tables.
        if flag == PartitionFlag::Active && value {
            for entry in &mut self.partitions {
                entry.flags.active = false;
            }
        }
        self.partitions[index].flags.set(flag, value);
        Ok(())
    }

    fn write_table(&mut self, device: &str) -> std::result::Result<(), NativeError> {
        self.enter(NativeCallKind::WriteTable, None, device.to_string())?;
        if let Err(e) = self.ensure_writable() {
            self.mark_failed();
            return Err(e);
        }
        self.table_writes += 1;
        Ok(())
    }
}
