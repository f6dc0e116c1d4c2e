// SPDX-License-Identifier: GPL-3.0-only

//! In-memory partition table
//!
//! The table is kept as two sorted levels: the device level (primary, extended
//! and free entries covering the whole device) and the extended level (logical
//! and free entries covering the extended partition after its boot record).
//! Both levels are always gap-free: unallocated space is represented by
//! synthesized free entries that are regenerated after every structural edit.

use std::collections::{BTreeSet, HashMap, HashSet};

use partstage_types::{
    DeviceGeometry, FIRST_LOGICAL_NUMBER, FileSystemRegistry, MAX_PRIMARY_SLOTS, PartitionKind,
    RawEntry, SectorRange,
};
use serde::Serialize;

use crate::entry::{EntryId, GrowBounds, PartitionEntry};
use crate::error::TableError;

/// A partition number assigned or changed by [`PartitionTable::replace`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Renumbered {
    pub id: EntryId,
    pub from: Option<u32>,
    pub to: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct PartitionTable {
    geometry: DeviceGeometry,
    top: Vec<PartitionEntry>,
    logical: Vec<PartitionEntry>,
    degraded: bool,
    #[serde(skip)]
    next_id: u64,
}

impl PartitionTable {
    fn empty(geometry: DeviceGeometry) -> Self {
        Self {
            geometry,
            top: Vec::new(),
            logical: Vec::new(),
            degraded: false,
            next_id: 1,
        }
    }

    /// Build a table from probe output.
    ///
    /// Malformed input is rejected with [`TableError::Geometry`]; use
    /// [`Self::load_degraded`] to obtain the best-effort view in that case.
    pub fn load(
        geometry: DeviceGeometry,
        raw: &[RawEntry],
        registry: &FileSystemRegistry,
    ) -> Result<Self, TableError> {
        check_raw(&geometry, raw)?;

        let mut table = Self::empty(geometry);
        for raw_entry in raw {
            let id = table.allocate_id();
            table.push(PartitionEntry::from_raw(id, raw_entry, registry));
        }
        table.normalize();
        table.validate().map_err(TableError::Geometry)?;

        Ok(table)
    }

    /// Best-effort table for input that [`Self::load`] rejected.
    ///
    /// Entries that cannot be placed at all are left out; everything else is
    /// shown as reported. Grow bounds are unknown for every entry.
    pub fn load_degraded(
        geometry: DeviceGeometry,
        raw: &[RawEntry],
        registry: &FileSystemRegistry,
    ) -> Self {
        let device = geometry.range();
        let children = raw
            .iter()
            .find(|entry| {
                entry.kind == PartitionKind::Extended
                    && entry.start <= entry.end
                    && device.encloses(&entry.range())
            })
            .map(|entry| entry.handle);

        let mut table = Self::empty(geometry);
        table.degraded = true;

        for raw_entry in raw {
            let range = raw_entry.range();
            let placeable = raw_entry.kind != PartitionKind::VirtualFree
                && raw_entry.start <= raw_entry.end
                && device.encloses(&range);
            if !placeable {
                tracing::warn!(
                    "dropping unplaceable partition {} ({}..={}) from degraded table",
                    raw_entry.number,
                    raw_entry.start,
                    raw_entry.end
                );
                continue;
            }
            if raw_entry.kind == PartitionKind::Extended && Some(raw_entry.handle) != children {
                tracing::warn!(
                    "dropping additional extended partition {} from degraded table",
                    raw_entry.number
                );
                continue;
            }

            let id = table.allocate_id();
            table.push(PartitionEntry::from_raw(id, raw_entry, registry));
        }

        // Logicals must sit inside the extended partition that was kept.
        if let Some(span) = table.children_range() {
            table.logical.retain(|entry| span.encloses(&entry.range()));
        } else {
            table.logical.clear();
        }

        table.normalize();
        table
    }

    pub fn geometry(&self) -> &DeviceGeometry {
        &self.geometry
    }

    /// Whether the last load failed; resize and move are refused until a
    /// fresh probe succeeds.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Device-level entries, sorted by start sector.
    pub fn top_level(&self) -> &[PartitionEntry] {
        &self.top
    }

    /// Entries inside the extended partition, sorted by start sector.
    pub fn logicals(&self) -> &[PartitionEntry] {
        &self.logical
    }

    /// All entries in disk order, each logical level listed right after its
    /// extended partition.
    pub fn entries(&self) -> Vec<&PartitionEntry> {
        let mut out = Vec::with_capacity(self.top.len() + self.logical.len());
        for entry in &self.top {
            out.push(entry);
            if entry.kind == PartitionKind::Extended {
                out.extend(self.logical.iter());
            }
        }
        out
    }

    /// Range and kind of every entry, in disk order.
    pub fn layout(&self) -> Vec<(SectorRange, PartitionKind)> {
        self.entries()
            .into_iter()
            .map(|entry| (entry.range(), entry.kind))
            .collect()
    }

    pub fn get(&self, id: EntryId) -> Option<&PartitionEntry> {
        self.top
            .iter()
            .chain(self.logical.iter())
            .find(|entry| entry.id == id)
    }

    fn get_mut(&mut self, id: EntryId) -> Option<&mut PartitionEntry> {
        self.top
            .iter_mut()
            .chain(self.logical.iter_mut())
            .find(|entry| entry.id == id)
    }

    pub fn extended(&self) -> Option<&PartitionEntry> {
        self.top
            .iter()
            .find(|entry| entry.kind == PartitionKind::Extended)
    }

    pub fn active(&self) -> Option<&PartitionEntry> {
        self.top
            .iter()
            .chain(self.logical.iter())
            .find(|entry| entry.flags.active)
    }

    /// Real logical partitions (on disk or pending).
    pub fn logical_partitions(&self) -> impl Iterator<Item = &PartitionEntry> {
        self.logical.iter().filter(|entry| !entry.is_virtual())
    }

    /// Number of the four primary slots taken by primary and extended entries.
    pub fn primary_slots_used(&self) -> u32 {
        self.top
            .iter()
            .filter(|entry| entry.kind.uses_primary_slot())
            .count() as u32
    }

    /// Sectors available to logical partitions: the extended partition minus
    /// its leading boot record sector.
    pub fn children_range(&self) -> Option<SectorRange> {
        self.extended()
            .map(|entry| SectorRange::new(entry.start.saturating_add(1), entry.end))
    }

    /// The entry covering `sector`; the innermost one inside the extended partition.
    pub fn entry_at(&self, sector: u64) -> Result<&PartitionEntry, TableError> {
        let out_of_range = || TableError::OutOfRange {
            sector,
            first: self.geometry.first_sector,
            last: self.geometry.last_sector,
        };

        if !self.geometry.contains(sector) {
            return Err(out_of_range());
        }

        let position = self.top.partition_point(|entry| entry.start <= sector);
        let entry = position
            .checked_sub(1)
            .and_then(|i| self.top.get(i))
            .ok_or_else(out_of_range)?;

        if entry.kind == PartitionKind::Extended && sector > entry.start {
            let position = self.logical.partition_point(|child| child.start <= sector);
            if let Some(child) = position.checked_sub(1).and_then(|i| self.logical.get(i))
                && child.range().contains(sector)
            {
                return Ok(child);
            }
        }

        Ok(entry)
    }

    pub(crate) fn allocate_id(&mut self) -> EntryId {
        let id = EntryId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Remove `old` and splice `new_entries` in its place.
    ///
    /// Free entries among `new_entries` are only hints: free space is always
    /// regenerated from the real entries, so adjacent gaps merge. Removing the
    /// extended partition removes everything nested in it. The edit is atomic;
    /// on failure the table is left untouched.
    pub fn replace(
        &mut self,
        old: EntryId,
        new_entries: Vec<PartitionEntry>,
    ) -> Result<Vec<Renumbered>, TableError> {
        let mut candidate = self.clone();

        let removed = if let Some(i) = candidate.top.iter().position(|entry| entry.id == old) {
            candidate.top.remove(i)
        } else if let Some(i) = candidate.logical.iter().position(|entry| entry.id == old) {
            candidate.logical.remove(i)
        } else {
            return Err(TableError::NotFound(old));
        };

        let keeps_extended = new_entries
            .iter()
            .any(|entry| entry.kind == PartitionKind::Extended);
        if removed.kind == PartitionKind::Extended && !keeps_extended {
            candidate.logical.clear();
        }

        for entry in new_entries {
            candidate.push(entry);
        }

        candidate.normalize();
        self.admit(&candidate)?;

        let renumbered = candidate.renumber();
        for change in &renumbered {
            tracing::debug!(
                "entry {} renumbered from {:?} to {}",
                change.id,
                change.from,
                change.to
            );
        }

        *self = candidate;
        Ok(renumbered)
    }

    /// Apply a non-structural edit (filesystem, label, flags) to one entry.
    pub fn update(
        &mut self,
        id: EntryId,
        edit: impl FnOnce(&mut PartitionEntry),
    ) -> Result<(), TableError> {
        let mut candidate = self.clone();
        let entry = candidate.get_mut(id).ok_or(TableError::NotFound(id))?;
        edit(entry);
        self.admit(&candidate)?;
        *self = candidate;
        Ok(())
    }

    /// Set or clear the active flag of `id`. Setting it clears the flag on the
    /// previous holder, whose id is returned.
    pub fn set_active(&mut self, id: EntryId, active: bool) -> Result<Option<EntryId>, TableError> {
        let mut candidate = self.clone();
        if candidate.get(id).is_none() {
            return Err(TableError::NotFound(id));
        }

        let mut previous = None;
        if active {
            for entry in candidate.top.iter_mut().chain(candidate.logical.iter_mut()) {
                if entry.flags.active && entry.id != id {
                    entry.flags.active = false;
                    previous = Some(entry.id);
                }
            }
        }

        if let Some(entry) = candidate.get_mut(id) {
            entry.flags.active = active;
        }
        self.admit(&candidate)?;

        *self = candidate;
        Ok(previous)
    }

    fn push(&mut self, mut entry: PartitionEntry) {
        if entry.kind == PartitionKind::Logical {
            entry.in_extended = true;
            self.logical.push(entry);
        } else if entry.kind == PartitionKind::VirtualFree && entry.in_extended {
            self.logical.push(entry);
        } else {
            self.top.push(entry);
        }
    }

    /// Sort both levels, regenerate free space and recompute grow bounds.
    fn normalize(&mut self) {
        let reusable: HashMap<(u64, u64, bool), EntryId> = self
            .top
            .iter()
            .chain(self.logical.iter())
            .filter(|entry| entry.is_virtual())
            .map(|entry| ((entry.start, entry.end, entry.in_extended), entry.id))
            .collect();

        let top_real: Vec<PartitionEntry> = self
            .top
            .drain(..)
            .filter(|entry| !entry.is_virtual())
            .collect();
        let mut logical_real: Vec<PartitionEntry> = self
            .logical
            .drain(..)
            .filter(|entry| !entry.is_virtual())
            .collect();

        let device = self.geometry.range();
        self.top = self.fill_gaps(top_real, device, false, &reusable);

        self.logical = match self.children_range() {
            Some(span) if !span.is_empty() => self.fill_gaps(logical_real, span, true, &reusable),
            _ => {
                logical_real.sort_by_key(|entry| (entry.start, entry.end));
                logical_real
            }
        };

        let degraded = self.degraded;
        compute_grow_bounds(&mut self.top, degraded);
        compute_grow_bounds(&mut self.logical, degraded);
    }

    fn fill_gaps(
        &mut self,
        mut real: Vec<PartitionEntry>,
        span: SectorRange,
        in_extended: bool,
        reusable: &HashMap<(u64, u64, bool), EntryId>,
    ) -> Vec<PartitionEntry> {
        real.sort_by_key(|entry| (entry.start, entry.end));

        let mut out = Vec::with_capacity(real.len() * 2 + 1);
        let mut cursor = Some(span.start);

        for entry in real {
            if let Some(next_free) = cursor
                && entry.start > next_free
                && next_free <= span.end
            {
                let gap = SectorRange::new(next_free, (entry.start - 1).min(span.end));
                out.push(self.filler(gap, in_extended, reusable));
            }
            if cursor.is_some_and(|next_free| entry.end >= next_free) {
                cursor = entry.end.checked_add(1);
            }
            out.push(entry);
        }

        if let Some(next_free) = cursor
            && next_free <= span.end
        {
            let gap = SectorRange::new(next_free, span.end);
            out.push(self.filler(gap, in_extended, reusable));
        }

        out
    }

    fn filler(
        &mut self,
        range: SectorRange,
        in_extended: bool,
        reusable: &HashMap<(u64, u64, bool), EntryId>,
    ) -> PartitionEntry {
        let id = match reusable.get(&(range.start, range.end, in_extended)) {
            Some(id) => *id,
            None => self.allocate_id(),
        };
        PartitionEntry::free(id, range, in_extended)
    }

    /// Assign numbers to new primaries and keep logicals numbered in disk order.
    fn renumber(&mut self) -> Vec<Renumbered> {
        let mut changes = Vec::new();

        let mut used: BTreeSet<u32> = self
            .top
            .iter()
            .filter(|entry| !entry.is_virtual())
            .filter_map(|entry| entry.index)
            .collect();

        for entry in self
            .top
            .iter_mut()
            .filter(|entry| !entry.is_virtual() && entry.index.is_none())
        {
            let slot = (1..=MAX_PRIMARY_SLOTS)
                .find(|slot| !used.contains(slot))
                .unwrap_or_else(|| used.iter().max().map_or(1, |max| max + 1));
            used.insert(slot);
            entry.index = Some(slot);
            changes.push(Renumbered {
                id: entry.id,
                from: None,
                to: slot,
            });
        }

        let mut next = FIRST_LOGICAL_NUMBER;
        for entry in self.logical.iter_mut().filter(|entry| !entry.is_virtual()) {
            if entry.index != Some(next) {
                changes.push(Renumbered {
                    id: entry.id,
                    from: entry.index,
                    to: next,
                });
                entry.index = Some(next);
            }
            next += 1;
        }

        changes
    }

    /// Accept `candidate` as the result of an edit of this table. A degraded
    /// table keeps the overlaps it was loaded with; the edit may not add any.
    fn admit(&self, candidate: &Self) -> Result<(), TableError> {
        let known = if self.degraded {
            overlapping_pairs(&self.top)
                .chain(overlapping_pairs(&self.logical))
                .collect()
        } else {
            HashSet::new()
        };
        candidate
            .check(&known)
            .map_err(TableError::InvariantViolation)
    }

    /// Check every structural invariant; the message names the first violation.
    pub fn validate(&self) -> Result<(), String> {
        self.check(&HashSet::new())
    }

    fn check(&self, known: &HashSet<(EntryId, EntryId)>) -> Result<(), String> {
        check_level(&self.top, self.geometry.range(), false, known)?;

        if let Some(entry) = self
            .top
            .iter()
            .find(|entry| entry.kind == PartitionKind::Logical)
        {
            return Err(format!(
                "logical partition at sector {} lies outside the extended partition",
                entry.start
            ));
        }

        let extended = self
            .top
            .iter()
            .filter(|entry| entry.kind == PartitionKind::Extended)
            .count();
        if extended > 1 {
            return Err(format!(
                "{extended} extended partitions; at most one is allowed"
            ));
        }

        let slots = self.primary_slots_used();
        if slots > MAX_PRIMARY_SLOTS {
            return Err(format!(
                "{slots} primary partitions; the table holds at most {MAX_PRIMARY_SLOTS}"
            ));
        }

        match self.children_range() {
            Some(span) if !span.is_empty() => check_level(&self.logical, span, true, known)?,
            _ => {
                if !self.logical.is_empty() {
                    return Err("logical partitions without room in an extended partition".into());
                }
            }
        }

        if let Some(entry) = self.logical.iter().find(|entry| {
            !matches!(
                entry.kind,
                PartitionKind::Logical | PartitionKind::VirtualFree
            )
        }) {
            return Err(format!(
                "{} partition at sector {} nested inside the extended partition",
                entry.kind, entry.start
            ));
        }

        let entries = self.entries();
        if let Some(entry) = entries
            .iter()
            .find(|entry| entry.is_virtual() && entry.flags.active)
        {
            return Err(format!("free space at sector {} marked active", entry.start));
        }
        let active = entries.iter().filter(|entry| entry.flags.active).count();
        if active > 1 {
            return Err(format!("{active} active partitions; at most one is allowed"));
        }

        Ok(())
    }
}

/// Reject probe output that cannot describe a valid table.
fn check_raw(geometry: &DeviceGeometry, raw: &[RawEntry]) -> Result<(), TableError> {
    let device = geometry.range();

    for entry in raw {
        if entry.kind == PartitionKind::VirtualFree {
            return Err(TableError::Geometry(format!(
                "partition {} is reported as free space",
                entry.number
            )));
        }
        if entry.end < entry.start {
            return Err(TableError::Geometry(format!(
                "partition {} ends at sector {} before it starts at sector {}",
                entry.number, entry.end, entry.start
            )));
        }
        if !device.encloses(&entry.range()) {
            return Err(TableError::Geometry(format!(
                "partition {} ({}..={}) lies outside the device ({}..={})",
                entry.number, entry.start, entry.end, device.start, device.end
            )));
        }
    }

    let extended: Vec<&RawEntry> = raw
        .iter()
        .filter(|entry| entry.kind == PartitionKind::Extended)
        .collect();
    if extended.len() > 1 {
        return Err(TableError::Geometry(format!(
            "{} extended partitions reported; at most one is allowed",
            extended.len()
        )));
    }

    let slots = raw
        .iter()
        .filter(|entry| entry.kind.uses_primary_slot())
        .count();
    if slots > MAX_PRIMARY_SLOTS as usize {
        return Err(TableError::Geometry(format!(
            "{slots} primary partitions reported; the table holds at most {MAX_PRIMARY_SLOTS}"
        )));
    }

    let children = extended
        .first()
        .map(|entry| SectorRange::new(entry.start.saturating_add(1), entry.end));
    for entry in raw.iter().filter(|entry| entry.kind == PartitionKind::Logical) {
        match children {
            None => {
                return Err(TableError::Geometry(format!(
                    "logical partition {} has no extended partition",
                    entry.number
                )));
            }
            Some(span) if !span.encloses(&entry.range()) => {
                return Err(TableError::Geometry(format!(
                    "logical partition {} ({}..={}) is not inside the extended partition",
                    entry.number, entry.start, entry.end
                )));
            }
            Some(_) => {}
        }
    }

    let mut top: Vec<&RawEntry> = raw
        .iter()
        .filter(|entry| entry.kind != PartitionKind::Logical)
        .collect();
    let mut logical: Vec<&RawEntry> = raw
        .iter()
        .filter(|entry| entry.kind == PartitionKind::Logical)
        .collect();
    check_raw_overlaps(&mut top)?;
    check_raw_overlaps(&mut logical)?;

    let active = raw.iter().filter(|entry| entry.flags.active).count();
    if active > 1 {
        return Err(TableError::Geometry(format!(
            "{active} partitions are marked active"
        )));
    }

    Ok(())
}

fn check_raw_overlaps(entries: &mut [&RawEntry]) -> Result<(), TableError> {
    entries.sort_by_key(|entry| (entry.start, entry.end));
    for pair in entries.windows(2) {
        if pair[1].start <= pair[0].end {
            return Err(TableError::Geometry(format!(
                "partitions {} and {} overlap at sector {}",
                pair[0].number, pair[1].number, pair[1].start
            )));
        }
    }
    Ok(())
}

/// Pairs of entries on one level sharing sectors, each paired with the entry
/// before it that reaches furthest.
fn overlapping_pairs(entries: &[PartitionEntry]) -> impl Iterator<Item = (EntryId, EntryId)> + '_ {
    let mut reach: Option<&PartitionEntry> = None;
    entries.iter().filter_map(move |entry| {
        let pair = reach
            .filter(|covering| entry.start <= covering.end)
            .map(|covering| (covering.id, entry.id));
        if reach.is_none_or(|covering| entry.end > covering.end) {
            reach = Some(entry);
        }
        pair
    })
}

/// `known` lists overlapping pairs that are tolerated.
fn check_level(
    entries: &[PartitionEntry],
    span: SectorRange,
    nested: bool,
    known: &HashSet<(EntryId, EntryId)>,
) -> Result<(), String> {
    let Some(first) = entries.first() else {
        return Err(format!(
            "sectors {}..={} are not covered by any entry",
            span.start, span.end
        ));
    };

    if first.start != span.start {
        return Err(format!(
            "first entry starts at sector {} instead of {}",
            first.start, span.start
        ));
    }

    for entry in entries {
        if entry.end < entry.start {
            return Err(format!(
                "entry {} ends at sector {} before it starts at sector {}",
                entry.id, entry.end, entry.start
            ));
        }
        if entry.in_extended != nested {
            return Err(format!(
                "entry {} at sector {} is on the wrong nesting level",
                entry.id, entry.start
            ));
        }
    }

    let mut reach = first;
    for pair in entries.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if b.start <= reach.end {
            if !known.contains(&(reach.id, b.id)) {
                return Err(format!(
                    "entries {} and {} overlap at sector {}",
                    reach.id, b.id, b.start
                ));
            }
        } else if b.start != reach.end + 1 {
            return Err(format!(
                "sectors {}..={} are not covered by any entry",
                reach.end + 1,
                b.start - 1
            ));
        }
        if a.is_virtual() && b.is_virtual() {
            return Err(format!(
                "adjacent free space at sectors {} and {} was not merged",
                a.start, b.start
            ));
        }
        if b.end > reach.end {
            reach = b;
        }
    }

    if reach.end != span.end {
        return Err(format!(
            "last entry ends at sector {} instead of {}",
            reach.end, span.end
        ));
    }

    Ok(())
}

fn compute_grow_bounds(entries: &mut [PartitionEntry], degraded: bool) {
    for i in 0..entries.len() {
        if degraded {
            entries[i].grow = GrowBounds::Unknown;
            continue;
        }

        let start = match i.checked_sub(1).map(|prev| &entries[prev]) {
            Some(prev) if prev.is_virtual() && !entries[i].is_virtual() => prev.start,
            _ => entries[i].start,
        };
        let end = match entries.get(i + 1) {
            Some(next) if next.is_virtual() && !entries[i].is_virtual() => next.end,
            _ => entries[i].end,
        };
        entries[i].grow = GrowBounds::Known { start, end };
    }
}
