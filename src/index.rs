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

//! Secondary Index over a Concurrent Skip List
//!
//! Each index maps an order-preserving encoding of its key columns to
//! the `ItemPointer`s of matching rows. Entries are keyed by the pair
//! `(key bytes, pointer)`, which gives two properties the build and
//! update paths rely on:
//!
//! - Duplicate rows with equal key values coexist (the pointer breaks
//!   the tie).
//! - Re-inserting the same `(key, pointer)` is an idempotent no-op, so
//!   the lock-free builder and a concurrent updater may both insert the
//!   same entry without coordination.
//!
//! ## Key Encoding
//!
//! Column values are `i64`. Each value is encoded as 8 bytes big-endian
//! with the sign bit flipped, so unsigned byte order equals signed value
//! order. Composite keys concatenate the encoded columns in canonical
//! schema order; all keys of one index therefore share a fixed width,
//! and a range probe on the leading column is a plain byte-range scan.
//!
//! ## Coverage Prefix
//!
//! `indexed_extents` is the number of leading extents this index fully
//! covers (`p` in the tuner's terms). It only moves forward; scans
//! snapshot it once and treat the snapshot as authoritative.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};

use byteorder::{BigEndian, ByteOrder};
use crossbeam_skiplist::SkipMap;
use smallvec::SmallVec;

use crate::error::{Result, TunerError};
use crate::table::{ColumnId, ItemPointer};

/// Index identifier
pub type IndexOid = u64;

/// Bytes per encoded key column
pub const KEY_COLUMN_WIDTH: usize = 8;

// ============================================================================
// KeySchema - Canonical Column Set
// ============================================================================

/// Non-empty, canonically ordered (ascending, deduplicated) set of
/// column ids. Both index definitions and workload samples use this
/// shape, so set equality is plain `==`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeySchema(SmallVec<[ColumnId; 4]>);

impl KeySchema {
    pub fn new(columns: impl IntoIterator<Item = ColumnId>) -> Result<Self> {
        let mut cols: SmallVec<[ColumnId; 4]> = columns.into_iter().collect();
        cols.sort_unstable();
        cols.dedup();
        if cols.is_empty() {
            return Err(TunerError::InvalidArgument(
                "key schema must name at least one column".into(),
            ));
        }
        Ok(Self(cols))
    }

    #[inline]
    pub fn columns(&self) -> &[ColumnId] {
        &self.0
    }

    /// Leading (smallest) column id
    #[inline]
    pub fn leading_column(&self) -> ColumnId {
        self.0[0]
    }

    /// Width in bytes of an encoded key for this schema
    #[inline]
    pub fn key_width(&self) -> usize {
        self.0.len() * KEY_COLUMN_WIDTH
    }
}

impl std::ops::Deref for KeySchema {
    type Target = [ColumnId];

    fn deref(&self) -> &[ColumnId] {
        &self.0
    }
}

impl std::fmt::Display for KeySchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, col) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", col)?;
        }
        Ok(())
    }
}

// ============================================================================
// Key Encoding
// ============================================================================

/// Encode one column value order-preservingly: flip the sign bit and
/// write big-endian, so memcmp order equals i64 order.
#[inline]
pub fn encode_column_value(value: i64) -> [u8; KEY_COLUMN_WIDTH] {
    let mut buf = [0u8; KEY_COLUMN_WIDTH];
    BigEndian::write_u64(&mut buf, (value as u64) ^ (1 << 63));
    buf
}

/// Construct the composite key for `row` under `schema`. Returns `None`
/// if the row is too narrow for the schema (a corrupt row; callers log
/// and skip).
pub fn encode_key(row: &[i64], schema: &KeySchema) -> Option<Vec<u8>> {
    let mut key = Vec::with_capacity(schema.key_width());
    for &col in schema.columns() {
        let value = *row.get(col as usize)?;
        key.extend_from_slice(&encode_column_value(value));
    }
    Some(key)
}

// ============================================================================
// Index Metadata
// ============================================================================

/// FULL indexes must cover every extent before they may serve scans;
/// PARTIAL indexes may serve any covered prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    Full,
    Partial,
}

/// Lifecycle state. A DROPPING index is invisible to new scans; its
/// storage is freed when the last reference drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    Active,
    Dropping,
}

const STATE_ACTIVE: u8 = 0;
const STATE_DROPPING: u8 = 1;

/// Entry key: encoded column values, tie-broken by row address.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct EntryKey {
    pub key: Vec<u8>,
    pub ptr: ItemPointer,
}

// ============================================================================
// SecondaryIndex
// ============================================================================

pub struct SecondaryIndex {
    oid: IndexOid,
    schema: KeySchema,
    kind: IndexKind,
    key_width: usize,
    entries: SkipMap<EntryKey, ()>,
    /// Number of leading extents fully covered (`p`); non-decreasing
    indexed_extents: AtomicU64,
    /// Smoothed utility score, stored as f64 bits
    utility_bits: AtomicU64,
    state: AtomicU8,
    /// Consecutive analyzer passes with utility below threshold
    below_streak: AtomicU32,
    /// Structural corruption flag; a poisoned index is retired
    poisoned: AtomicBool,
}

impl SecondaryIndex {
    pub fn new(oid: IndexOid, schema: KeySchema, kind: IndexKind) -> Self {
        let key_width = schema.key_width();
        Self {
            oid,
            schema,
            kind,
            key_width,
            entries: SkipMap::new(),
            indexed_extents: AtomicU64::new(0),
            utility_bits: AtomicU64::new(0f64.to_bits()),
            state: AtomicU8::new(STATE_ACTIVE),
            below_streak: AtomicU32::new(0),
            poisoned: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn oid(&self) -> IndexOid {
        self.oid
    }

    #[inline]
    pub fn schema(&self) -> &KeySchema {
        &self.schema
    }

    #[inline]
    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    pub fn state(&self) -> IndexState {
        match self.state.load(Ordering::Acquire) {
            STATE_ACTIVE => IndexState::Active,
            _ => IndexState::Dropping,
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.state() == IndexState::Active
    }

    /// Transition to DROPPING. Idempotent.
    pub fn mark_dropping(&self) {
        self.state.store(STATE_DROPPING, Ordering::Release);
    }

    /// Covered prefix length `p`
    #[inline]
    pub fn indexed_extents(&self) -> u64 {
        self.indexed_extents.load(Ordering::Acquire)
    }

    /// Publish a larger covered prefix. Rejects non-increasing values.
    pub fn advance_prefix(&self, new_p: u64) -> Result<()> {
        let mut current = self.indexed_extents.load(Ordering::Acquire);
        loop {
            if new_p <= current {
                return Err(TunerError::NonMonotonicPrefix {
                    oid: self.oid,
                    current,
                    requested: new_p,
                });
            }
            match self.indexed_extents.compare_exchange_weak(
                current,
                new_p,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    pub fn utility(&self) -> f64 {
        f64::from_bits(self.utility_bits.load(Ordering::Acquire))
    }

    pub fn set_utility(&self, utility: f64) {
        self.utility_bits.store(utility.to_bits(), Ordering::Release);
    }

    /// Atomic read-modify-write utility bump.
    pub fn bump_utility(&self, delta: f64) {
        let mut bits = self.utility_bits.load(Ordering::Acquire);
        loop {
            let next = (f64::from_bits(bits) + delta).to_bits();
            match self.utility_bits.compare_exchange_weak(
                bits,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => bits = actual,
            }
        }
    }

    /// Track consecutive below-threshold analyzer passes; returns the
    /// updated streak length.
    pub fn note_utility_pass(&self, below_threshold: bool) -> u32 {
        if below_threshold {
            self.below_streak.fetch_add(1, Ordering::AcqRel) + 1
        } else {
            self.below_streak.store(0, Ordering::Release);
            0
        }
    }

    #[inline]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    /// Number of entries currently stored
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Insert an entry. Re-inserting an existing `(key, pointer)` is a
    /// no-op. A key of the wrong width poisons the index.
    pub fn insert(&self, key: Vec<u8>, ptr: ItemPointer) -> Result<()> {
        if key.len() != self.key_width {
            self.poisoned.store(true, Ordering::Release);
            return Err(TunerError::IndexCorruption {
                oid: self.oid,
                detail: format!(
                    "entry key width {} does not match schema width {}",
                    key.len(),
                    self.key_width
                ),
            });
        }
        self.entries.insert(EntryKey { key, ptr }, ());
        Ok(())
    }

    /// Remove an exact `(key, pointer)` entry. Returns whether it was
    /// present.
    pub fn remove(&self, key: &[u8], ptr: ItemPointer) -> bool {
        let entry = EntryKey {
            key: key.to_vec(),
            ptr,
        };
        self.entries.remove(&entry).is_some()
    }

    /// All pointers stored under an exact key.
    pub fn lookup(&self, key: &[u8]) -> Vec<ItemPointer> {
        let lo = EntryKey {
            key: key.to_vec(),
            ptr: ItemPointer::MIN,
        };
        let hi = EntryKey {
            key: key.to_vec(),
            ptr: ItemPointer::MAX,
        };
        self.entries.range(lo..=hi).map(|e| e.key().ptr).collect()
    }

    /// Pointers whose leading key column falls in `[lo, hi)`. Trailing
    /// columns are unconstrained; the scan re-checks the full predicate
    /// against the fetched row.
    pub fn probe_leading_range(&self, lo: i64, hi: i64) -> Vec<ItemPointer> {
        if lo >= hi {
            return Vec::new();
        }
        let lo_key = EntryKey {
            key: encode_column_value(lo).to_vec(),
            ptr: ItemPointer::MIN,
        };
        let hi_key = EntryKey {
            key: encode_column_value(hi).to_vec(),
            ptr: ItemPointer::MIN,
        };
        self.entries
            .range(lo_key..hi_key)
            .map(|e| e.key().ptr)
            .collect()
    }
}

impl std::fmt::Debug for SecondaryIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecondaryIndex")
            .field("oid", &self.oid)
            .field("schema", &self.schema)
            .field("kind", &self.kind)
            .field("p", &self.indexed_extents())
            .field("utility", &self.utility())
            .field("state", &self.state())
            .field("entries", &self.entry_count())
            .finish()
    }
}
