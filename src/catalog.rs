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

//! Per-Table Index Catalog
//!
//! Single-writer, many-reader set of secondary indexes with atomic
//! publish/retire. The catalog follows the SuperVersion discipline: the
//! current index set is an immutable snapshot behind an `ArcSwap`, and
//! every mutation (add, retire) builds a new snapshot and swaps it in.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ IndexCatalog                                 │
//! │   current: ArcSwap<CatalogSnapshot> ◄── O(1) │
//! │   writer:  Mutex (serializes add/retire)     │
//! └──────────────────────────────────────────────┘
//!                      │
//!                      ▼
//!         CatalogSnapshot { Vec<Arc<SecondaryIndex>> }
//! ```
//!
//! Readers load the snapshot once per scan and never block the writer.
//! `retire` marks the index DROPPING and publishes a snapshot without
//! it; the index memory is reclaimed when the last scan's `Arc` drops,
//! so physical deletion is naturally deferred.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Result, TunerError};
use crate::index::{IndexKind, IndexOid, IndexState, KeySchema, SecondaryIndex};

/// One row of `list()` output: a consistent view of index metadata.
#[derive(Debug, Clone)]
pub struct IndexInfo {
    pub oid: IndexOid,
    pub schema: KeySchema,
    pub kind: IndexKind,
    pub state: IndexState,
    pub indexed_extents: u64,
    pub utility: f64,
}

/// Immutable snapshot of the ACTIVE index set.
#[derive(Default)]
pub struct CatalogSnapshot {
    indexes: Vec<Arc<SecondaryIndex>>,
}

impl CatalogSnapshot {
    #[inline]
    pub fn indexes(&self) -> &[Arc<SecondaryIndex>] {
        &self.indexes
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    pub fn get(&self, oid: IndexOid) -> Option<&Arc<SecondaryIndex>> {
        self.indexes.iter().find(|i| i.oid() == oid)
    }

    pub fn find(&self, schema: &KeySchema, kind: IndexKind) -> Option<&Arc<SecondaryIndex>> {
        self.indexes
            .iter()
            .find(|i| i.schema() == schema && i.kind() == kind)
    }

    /// Is `schema` present under any kind?
    pub fn contains_schema(&self, schema: &KeySchema) -> bool {
        self.indexes.iter().any(|i| i.schema() == schema)
    }
}

/// Per-table mutable index set with atomic snapshot publication.
pub struct IndexCatalog {
    current: ArcSwap<CatalogSnapshot>,
    writer: Mutex<()>,
    next_oid: AtomicU64,
}

impl IndexCatalog {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(CatalogSnapshot::default()),
            writer: Mutex::new(()),
            next_oid: AtomicU64::new(1),
        }
    }

    /// Lock-free consistent snapshot of the ACTIVE index set. Hold it
    /// for the duration of one scan.
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.current.load_full()
    }

    /// Metadata listing, for stats and tests.
    pub fn list(&self) -> Vec<IndexInfo> {
        self.snapshot()
            .indexes()
            .iter()
            .map(|i| IndexInfo {
                oid: i.oid(),
                schema: i.schema().clone(),
                kind: i.kind(),
                state: i.state(),
                indexed_extents: i.indexed_extents(),
                utility: i.utility(),
            })
            .collect()
    }

    /// Number of ACTIVE indexes
    pub fn index_count(&self) -> usize {
        self.snapshot().len()
    }

    /// Create a new ACTIVE index with `p = 0`, `u = 0`. Fails with
    /// `DuplicateSchema` if an ACTIVE index with the same key schema and
    /// kind exists.
    pub fn add(&self, schema: KeySchema, kind: IndexKind) -> Result<IndexOid> {
        let _writer = self.writer.lock();
        let snapshot = self.current.load();
        if snapshot.find(&schema, kind).is_some() {
            return Err(TunerError::DuplicateSchema {
                schema: schema.to_string(),
            });
        }
        let oid = self.next_oid.fetch_add(1, Ordering::Relaxed);
        let index = Arc::new(SecondaryIndex::new(oid, schema, kind));
        debug!(oid, schema = %index.schema(), ?kind, "adding index");

        let mut indexes = snapshot.indexes.clone();
        indexes.push(index);
        self.current.store(Arc::new(CatalogSnapshot { indexes }));
        Ok(oid)
    }

    /// Transition an index to DROPPING and hide it from subsequent
    /// snapshots. Scans already holding a snapshot keep the index alive
    /// until they finish.
    pub fn retire(&self, oid: IndexOid) -> Result<()> {
        let _writer = self.writer.lock();
        let snapshot = self.current.load();
        let index = snapshot
            .get(oid)
            .ok_or(TunerError::IndexNotFound { oid })?;
        index.mark_dropping();
        debug!(oid, schema = %index.schema(), "retiring index");

        let indexes = snapshot
            .indexes
            .iter()
            .filter(|i| i.oid() != oid)
            .cloned()
            .collect();
        self.current.store(Arc::new(CatalogSnapshot { indexes }));
        Ok(())
    }

    /// Monotonic prefix advance, delegated to the index.
    pub fn advance_prefix(&self, oid: IndexOid, new_p: u64) -> Result<()> {
        let snapshot = self.current.load();
        let index = snapshot
            .get(oid)
            .ok_or(TunerError::IndexNotFound { oid })?;
        index.advance_prefix(new_p)
    }

    /// Atomic utility bump, delegated to the index. Smoothing is the
    /// analyzer's job, not the catalog's.
    pub fn bump_utility(&self, oid: IndexOid, delta: f64) -> Result<()> {
        let snapshot = self.current.load();
        let index = snapshot
            .get(oid)
            .ok_or(TunerError::IndexNotFound { oid })?;
        index.bump_utility(delta);
        Ok(())
    }
}

impl Default for IndexCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::encode_key;
    use crate::table::ItemPointer;

    fn schema(cols: &[u32]) -> KeySchema {
        KeySchema::new(cols.iter().copied()).unwrap()
    }

    #[test]
    fn test_add_and_duplicate_schema() {
        let catalog = IndexCatalog::new();
        let oid = catalog.add(schema(&[3]), IndexKind::Partial).unwrap();
        assert_eq!(catalog.index_count(), 1);

        let err = catalog.add(schema(&[3]), IndexKind::Partial).unwrap_err();
        assert!(matches!(err, TunerError::DuplicateSchema { .. }));

        // Same schema, different kind is allowed.
        catalog.add(schema(&[3]), IndexKind::Full).unwrap();
        assert_eq!(catalog.index_count(), 2);

        let info = catalog.list();
        assert_eq!(info[0].oid, oid);
        assert_eq!(info[0].indexed_extents, 0);
        assert_eq!(info[0].utility, 0.0);
    }

    #[test]
    fn test_retire_hides_index() {
        let catalog = IndexCatalog::new();
        let oid = catalog.add(schema(&[1]), IndexKind::Partial).unwrap();
        catalog.retire(oid).unwrap();
        assert_eq!(catalog.index_count(), 0);
        assert!(catalog.snapshot().get(oid).is_none());

        // Retiring it again is an error the tuner swallows.
        assert!(matches!(
            catalog.retire(oid),
            Err(TunerError::IndexNotFound { .. })
        ));

        // The schema may be re-added after retirement.
        catalog.add(schema(&[1]), IndexKind::Partial).unwrap();
    }

    #[test]
    fn test_retired_index_survives_for_snapshot_holders() {
        let catalog = IndexCatalog::new();
        let oid = catalog.add(schema(&[0]), IndexKind::Partial).unwrap();

        let held = catalog.snapshot();
        let index = held.get(oid).unwrap().clone();
        let key = encode_key(&[42], index.schema()).unwrap();
        index.insert(key.clone(), ItemPointer::new(0, 0)).unwrap();

        catalog.retire(oid).unwrap();
        assert_eq!(index.state(), IndexState::Dropping);
        // The held reference still answers lookups until dropped.
        assert_eq!(index.lookup(&key).len(), 1);
    }

    #[test]
    fn test_advance_and_bump_through_catalog() {
        let catalog = IndexCatalog::new();
        let oid = catalog.add(schema(&[2]), IndexKind::Partial).unwrap();

        catalog.advance_prefix(oid, 3).unwrap();
        assert!(catalog.advance_prefix(oid, 3).is_err());
        catalog.bump_utility(oid, 1.25).unwrap();

        let info = catalog.list();
        assert_eq!(info[0].indexed_extents, 3);
        assert!((info[0].utility - 1.25).abs() < 1e-9);

        assert!(matches!(
            catalog.advance_prefix(999, 1),
            Err(TunerError::IndexNotFound { .. })
        ));
    }

    #[test]
    fn test_snapshot_isolated_from_later_adds() {
        let catalog = IndexCatalog::new();
        catalog.add(schema(&[0]), IndexKind::Partial).unwrap();
        let before = catalog.snapshot();
        catalog.add(schema(&[1]), IndexKind::Partial).unwrap();
        assert_eq!(before.len(), 1);
        assert_eq!(catalog.snapshot().len(), 2);
    }
}
