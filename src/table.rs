// SPDX-License-Identifier: AGPL-3.0-or-later
// SochDB - LLM-Optimized Embedded Database
// Copyright (C) 2026 Sushanth Reddy Vanagala (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! In-Memory Table Store: Extents and Slots
//!
//! The managed unit of the tuner is a `Table`: an append-mostly sequence
//! of fixed-capacity `Extent`s. Each extent holds a slot array of
//! fixed-width integer rows plus per-slot visibility metadata owned by
//! the transaction manager.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │ Table                                                │
//! │   extents: [ Extent 0 | Extent 1 | ... | Extent E-1 ]│
//! │   extent_count (monotonic)                           │
//! │   catalog: IndexCatalog    ring: SampleRing          │
//! └──────────────────────────────────────────────────────┘
//!
//! Extent e:
//!   slot 0: [header: owner, begin_ts, version, live][row data]
//!   slot 1: ...
//!   slot C-1
//! ```
//!
//! A row version is addressed by `ItemPointer(extent, offset)` - the
//! stable address used by every secondary index. Extents are never
//! reordered or deleted, so the pointer stays valid for the table's
//! lifetime.
//!
//! The per-slot `version` counter is bumped on every in-place update.
//! The incremental index builder snapshots it before reading a row and
//! re-checks it after inserting the index entry, which is what makes the
//! lock-free builder/updater coordination sound (see `builder.rs`).

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::catalog::IndexCatalog;
use crate::error::{Result, TunerError};
use crate::sample::{Sample, SampleRing};

/// Table identifier
pub type TableId = u64;

/// Column identifier within a table schema
pub type ColumnId = u32;

/// Extent identifier (position in the table's extent sequence)
pub type ExtentId = u64;

/// Slot offset within an extent
pub type SlotOffset = u32;

/// Sentinel for an unowned slot
pub const NO_OWNER: u64 = 0;

/// Default capacity of the per-table sample ring
pub const DEFAULT_SAMPLE_RING_CAPACITY: usize = 4096;

/// Stable address of a row version: (extent id, slot offset)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemPointer {
    pub extent: ExtentId,
    pub offset: SlotOffset,
}

impl ItemPointer {
    pub fn new(extent: ExtentId, offset: SlotOffset) -> Self {
        Self { extent, offset }
    }

    /// Smallest possible pointer, for index range probes
    pub const MIN: ItemPointer = ItemPointer {
        extent: 0,
        offset: 0,
    };

    /// Largest possible pointer, for index range probes
    pub const MAX: ItemPointer = ItemPointer {
        extent: ExtentId::MAX,
        offset: SlotOffset::MAX,
    };
}

// ============================================================================
// Slot - Row Storage + Visibility Header
// ============================================================================

/// Per-slot visibility and ownership metadata.
///
/// The fields are written only through the transaction manager; the
/// builder and scans read them directly.
#[derive(Debug)]
pub struct SlotHeader {
    /// Owning transaction id, `NO_OWNER` when free
    pub(crate) owner: AtomicU64,
    /// Commit timestamp of the current version
    pub(crate) begin_ts: AtomicU64,
    /// Bumped on every in-place update of this slot
    pub(crate) version: AtomicU64,
    /// Whether the slot holds a live row
    pub(crate) live: AtomicBool,
}

impl SlotHeader {
    fn new() -> Self {
        Self {
            owner: AtomicU64::new(NO_OWNER),
            begin_ts: AtomicU64::new(0),
            version: AtomicU64::new(0),
            live: AtomicBool::new(false),
        }
    }

    /// Snapshot of the update counter, for builder re-validation
    #[inline]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }
}

/// One slot: visibility header plus the row payload.
#[derive(Debug)]
pub struct Slot {
    header: SlotHeader,
    data: RwLock<Vec<i64>>,
}

impl Slot {
    fn new() -> Self {
        Self {
            header: SlotHeader::new(),
            data: RwLock::new(Vec::new()),
        }
    }

    #[inline]
    pub fn header(&self) -> &SlotHeader {
        &self.header
    }

    /// Copy of the current row, `None` if the slot is not live
    pub fn row(&self) -> Option<Vec<i64>> {
        if !self.header.is_live() {
            return None;
        }
        Some(self.data.read().clone())
    }

    /// Overwrite the row bytes in place. The caller must hold slot
    /// ownership through the transaction manager.
    pub(crate) fn overwrite(&self, row: &[i64]) {
        let mut data = self.data.write();
        data.clear();
        data.extend_from_slice(row);
    }
}

// ============================================================================
// Extent - Fixed-Capacity Slot Array
// ============================================================================

/// A fixed-capacity, append-only slab of tuple slots.
pub struct Extent {
    id: ExtentId,
    capacity: u32,
    /// Slots claimed so far; claimed slots become visible once `live` is set
    len: AtomicU32,
    slots: Box<[Slot]>,
}

impl Extent {
    fn new(id: ExtentId, capacity: u32) -> Self {
        let slots = (0..capacity).map(|_| Slot::new()).collect::<Vec<_>>();
        Self {
            id,
            capacity,
            len: AtomicU32::new(0),
            slots: slots.into_boxed_slice(),
        }
    }

    #[inline]
    pub fn id(&self) -> ExtentId {
        self.id
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of claimed slots
    #[inline]
    pub fn len(&self) -> u32 {
        self.len.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    #[inline]
    pub fn slot(&self, offset: SlotOffset) -> Option<&Slot> {
        if offset >= self.len() {
            return None;
        }
        Some(&self.slots[offset as usize])
    }

    /// Claim the next free slot and fill it. Returns `None` when full.
    fn try_append(&self, row: &[i64]) -> Option<SlotOffset> {
        let offset = loop {
            let cur = self.len.load(Ordering::Relaxed);
            if cur >= self.capacity {
                return None;
            }
            if self
                .len
                .compare_exchange_weak(cur, cur + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                break cur;
            }
        };
        let slot = &self.slots[offset as usize];
        slot.overwrite(row);
        slot.header.live.store(true, Ordering::Release);
        Some(offset)
    }

    /// Iterate copies of the live rows in this extent, in slot order.
    pub fn live_slots(&self) -> impl Iterator<Item = (SlotOffset, Vec<i64>)> + '_ {
        let len = self.len();
        (0..len).filter_map(move |offset| {
            let slot = &self.slots[offset as usize];
            slot.row().map(|row| (offset, row))
        })
    }
}

// ============================================================================
// Table - Extent Sequence + Catalog + Sample Ring
// ============================================================================

/// An append-mostly table: the unit managed by the index tuner.
pub struct Table {
    id: TableId,
    column_count: usize,
    extent_capacity: u32,
    extents: RwLock<Vec<Arc<Extent>>>,
    /// Monotonically non-decreasing; published after the extent itself
    extent_count: AtomicU64,
    catalog: IndexCatalog,
    ring: SampleRing,
}

impl Table {
    pub fn new(id: TableId, column_count: usize, extent_capacity: u32) -> Self {
        Self::with_ring_capacity(id, column_count, extent_capacity, DEFAULT_SAMPLE_RING_CAPACITY)
    }

    pub fn with_ring_capacity(
        id: TableId,
        column_count: usize,
        extent_capacity: u32,
        ring_capacity: usize,
    ) -> Self {
        Self {
            id,
            column_count,
            extent_capacity,
            extents: RwLock::new(Vec::new()),
            extent_count: AtomicU64::new(0),
            catalog: IndexCatalog::new(),
            ring: SampleRing::new(ring_capacity),
        }
    }

    #[inline]
    pub fn id(&self) -> TableId {
        self.id
    }

    #[inline]
    pub fn column_count(&self) -> usize {
        self.column_count
    }

    /// Monotonic extent count
    #[inline]
    pub fn extent_count(&self) -> u64 {
        self.extent_count.load(Ordering::Acquire)
    }

    #[inline]
    pub fn catalog(&self) -> &IndexCatalog {
        &self.catalog
    }

    #[inline]
    pub fn ring(&self) -> &SampleRing {
        &self.ring
    }

    /// Record a workload sample. Never blocks the caller for unbounded
    /// time; overflow drops the oldest sample.
    pub fn record_sample(&self, sample: Sample) {
        self.ring.record(sample);
    }

    pub fn extent(&self, e: ExtentId) -> Option<Arc<Extent>> {
        self.extents.read().get(e as usize).cloned()
    }

    /// Append a row, growing the extent sequence as needed.
    pub fn insert_row(&self, row: Vec<i64>) -> Result<ItemPointer> {
        if row.len() != self.column_count {
            return Err(TunerError::InvalidArgument(format!(
                "row has {} columns, table {} expects {}",
                row.len(),
                self.id,
                self.column_count
            )));
        }
        loop {
            {
                let extents = self.extents.read();
                if let Some(last) = extents.last() {
                    if let Some(offset) = last.try_append(&row) {
                        return Ok(ItemPointer::new(last.id(), offset));
                    }
                }
            }
            // Last extent full (or none yet): append a new one.
            let mut extents = self.extents.write();
            let needs_new = match extents.last() {
                Some(last) => last.is_full(),
                None => true,
            };
            if needs_new {
                let id = extents.len() as ExtentId;
                extents.push(Arc::new(Extent::new(id, self.extent_capacity)));
                self.extent_count.store(extents.len() as u64, Ordering::Release);
            }
        }
    }

    /// Copy of the row at `ptr`, `None` if out of bounds or not live.
    pub fn row(&self, ptr: ItemPointer) -> Option<Vec<i64>> {
        let extent = self.extent(ptr.extent)?;
        extent.slot(ptr.offset)?.row()
    }

    /// Total live rows, mostly for tests and stats.
    pub fn live_row_count(&self) -> usize {
        let extents = self.extents.read().clone();
        extents.iter().map(|e| e.live_slots().count()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extent_growth() {
        let table = Table::new(1, 3, 4);
        assert_eq!(table.extent_count(), 0);

        for i in 0..10 {
            let ptr = table.insert_row(vec![i, i * 2, i * 3]).unwrap();
            assert_eq!(ptr.extent, (i as u64) / 4);
            assert_eq!(ptr.offset, (i as u32) % 4);
        }
        assert_eq!(table.extent_count(), 3);
        assert_eq!(table.live_row_count(), 10);
    }

    #[test]
    fn test_row_width_validated() {
        let table = Table::new(1, 2, 4);
        assert!(table.insert_row(vec![1, 2, 3]).is_err());
        assert!(table.insert_row(vec![1, 2]).is_ok());
    }

    #[test]
    fn test_row_lookup_by_pointer() {
        let table = Table::new(1, 2, 2);
        let a = table.insert_row(vec![10, 20]).unwrap();
        let b = table.insert_row(vec![30, 40]).unwrap();
        let c = table.insert_row(vec![50, 60]).unwrap();

        assert_eq!(table.row(a), Some(vec![10, 20]));
        assert_eq!(table.row(b), Some(vec![30, 40]));
        assert_eq!(table.row(c), Some(vec![50, 60]));
        assert_eq!(c.extent, 1);
        assert_eq!(table.row(ItemPointer::new(5, 0)), None);
    }

    #[test]
    fn test_live_slots_order() {
        let table = Table::new(1, 1, 8);
        for i in 0..5 {
            table.insert_row(vec![i]).unwrap();
        }
        let extent = table.extent(0).unwrap();
        let rows: Vec<_> = extent.live_slots().collect();
        assert_eq!(rows.len(), 5);
        for (i, (offset, row)) in rows.iter().enumerate() {
            assert_eq!(*offset, i as u32);
            assert_eq!(row[0], i as i64);
        }
    }

    #[test]
    fn test_concurrent_inserts() {
        use std::thread;

        let table = Arc::new(Table::new(1, 1, 16));
        let mut handles = vec![];
        for t in 0..4 {
            let table = table.clone();
            handles.push(thread::spawn(move || {
                for i in 0..100 {
                    table.insert_row(vec![t * 1000 + i]).unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(table.live_row_count(), 400);
        // Extent count covers exactly the claimed slots.
        assert_eq!(table.extent_count(), 25);
    }
}
