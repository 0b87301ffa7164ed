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

//! Hybrid Scan: Index Prefix + Sequential Tail
//!
//! A partially built index still pays for itself: rows in the covered
//! prefix `[0, p)` come from an index probe, rows in the uncovered tail
//! `[p, E)` from a sequential scan with predicate evaluation. The union
//! is the scan result.
//!
//! ```text
//! extents:  [0 ... p)              [p ... E)
//!           ─── index probe ───    ─── seq scan + filter ───
//! ```
//!
//! `p` is snapshotted at pick time and stays authoritative for the
//! split point: builder progress mid-scan never moves it, index
//! results are filtered to extents below it, and the tail starts at
//! it, so no extent is visited twice. The tail's upper bound `E` is
//! the live extent count read at scan time (after the pick), so
//! extents appended after the pick are still covered by the
//! sequential tail. Results are deduplicated by `ItemPointer` because
//! the in-place update path makes a row transiently reachable through
//! two index keys (insert-then-delete), and every fetched row is
//! re-checked against the predicate, which filters entries that went
//! stale between probe and fetch.

use std::collections::HashSet;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::error::{Result, TunerError};
use crate::index::{IndexKind, KeySchema, SecondaryIndex};
use crate::table::{ColumnId, ItemPointer, Table};

/// How aggressively scans may use indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexUsagePolicy {
    /// Never consult an index
    Never,
    /// Partial indexes may serve their covered prefix
    #[default]
    Partial,
    /// Only fully built indexes may serve scans
    Full,
}

/// The chosen index plus the coverage snapshot taken at pick time.
#[derive(Debug, Clone)]
pub struct IndexPick {
    pub index: Arc<SecondaryIndex>,
    /// `p` at pick time; authoritative for the whole scan
    pub prefix: u64,
}

/// Pick the best usable index for a query on `columns`.
///
/// Exact schema match only. Among matches, the larger covered prefix
/// wins; ties break on higher utility.
pub fn pick_index(
    table: &Table,
    columns: &KeySchema,
    policy: IndexUsagePolicy,
) -> Option<IndexPick> {
    if policy == IndexUsagePolicy::Never {
        return None;
    }
    let snapshot = table.catalog().snapshot();
    let extent_count = table.extent_count();
    let mut best: Option<(Arc<SecondaryIndex>, u64)> = None;
    for index in snapshot.indexes() {
        if index.schema() != columns || index.is_poisoned() {
            continue;
        }
        let p = index.indexed_extents();
        // A FULL-kind index is not queryable until it covers the table.
        if index.kind() == IndexKind::Full && p < extent_count {
            continue;
        }
        let better = match &best {
            None => true,
            Some((current, current_p)) => {
                p > *current_p || (p == *current_p && index.utility() > current.utility())
            }
        };
        if better {
            best = Some((Arc::clone(index), p));
        }
    }
    let (index, prefix) = best?;
    if policy == IndexUsagePolicy::Full && prefix < extent_count {
        return None;
    }
    Some(IndexPick { index, prefix })
}

// ============================================================================
// Range Predicate
// ============================================================================

/// Half-open bound on one column: `lo <= value < hi`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnBound {
    pub column: ColumnId,
    pub lo: i64,
    pub hi: i64,
}

/// Conjunction of per-column half-open ranges, the predicate shape of
/// the reference workload (`attr >= lo AND attr < hi` per attribute).
#[derive(Debug, Clone)]
pub struct RangePredicate {
    bounds: SmallVec<[ColumnBound; 4]>,
}

impl RangePredicate {
    /// Build from `(column, lo, hi)` triples. Bounds are stored in
    /// canonical column order; repeated columns intersect.
    pub fn new(bounds: impl IntoIterator<Item = (ColumnId, i64, i64)>) -> Result<Self> {
        let mut out: SmallVec<[ColumnBound; 4]> = SmallVec::new();
        for (column, lo, hi) in bounds {
            match out.iter_mut().find(|b| b.column == column) {
                Some(existing) => {
                    existing.lo = existing.lo.max(lo);
                    existing.hi = existing.hi.min(hi);
                }
                None => out.push(ColumnBound { column, lo, hi }),
            }
        }
        if out.is_empty() {
            return Err(TunerError::InvalidArgument(
                "range predicate must bound at least one column".into(),
            ));
        }
        out.sort_unstable_by_key(|b| b.column);
        Ok(Self { bounds: out })
    }

    /// The column set this predicate filters on, for index selection.
    pub fn columns(&self) -> KeySchema {
        KeySchema::new(self.bounds.iter().map(|b| b.column))
            .expect("predicate is never empty")
    }

    /// Bound on the smallest column id, which is the leading column of
    /// the matching index's canonical schema.
    pub fn leading_bound(&self) -> (i64, i64) {
        (self.bounds[0].lo, self.bounds[0].hi)
    }

    pub fn matches(&self, row: &[i64]) -> bool {
        self.bounds.iter().all(|b| {
            row.get(b.column as usize)
                .map(|v| *v >= b.lo && *v < b.hi)
                .unwrap_or(false)
        })
    }
}

// ============================================================================
// Hybrid Scan Executor
// ============================================================================

/// Scan `table` for rows satisfying `predicate`, combining an index
/// probe over the covered prefix with a sequential scan over the tail.
pub fn hybrid_scan(
    table: &Table,
    predicate: &RangePredicate,
    policy: IndexUsagePolicy,
) -> Vec<(ItemPointer, Vec<i64>)> {
    let pick = pick_index(table, &predicate.columns(), policy);
    // Read the extent count after the pick so the tail always reaches
    // at least as far as the prefix snapshot.
    let extent_count = table.extent_count();

    let mut seen: HashSet<ItemPointer> = HashSet::new();
    let mut results = Vec::new();
    let seq_start = match &pick {
        Some(pick) => pick.prefix,
        None => 0,
    };

    if let Some(pick) = &pick {
        let (lo, hi) = predicate.leading_bound();
        for ptr in pick.index.probe_leading_range(lo, hi) {
            // Entries at or past the prefix snapshot belong to the
            // sequential tail of this scan.
            if ptr.extent >= pick.prefix {
                continue;
            }
            if !seen.insert(ptr) {
                continue;
            }
            let Some(row) = table.row(ptr) else {
                continue;
            };
            if predicate.matches(&row) {
                results.push((ptr, row));
            }
        }
    }

    for e in seq_start..extent_count {
        let Some(extent) = table.extent(e) else {
            break;
        };
        for (offset, row) in extent.live_slots() {
            let ptr = ItemPointer::new(e, offset);
            if !predicate.matches(&row) {
                continue;
            }
            if seen.insert(ptr) {
                results.push((ptr, row));
            }
        }
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build_step;
    use crate::index::IndexKind;

    fn schema(cols: &[u32]) -> KeySchema {
        KeySchema::new(cols.iter().copied()).unwrap()
    }

    /// 10 extents x 10 rows; col0 = i, col1 = i % 7
    fn fixture_table() -> Table {
        let table = Table::new(1, 2, 10);
        for i in 0..100 {
            table.insert_row(vec![i, i % 7]).unwrap();
        }
        table
    }

    fn index_on(table: &Table, cols: &[u32], extents: u64) -> Arc<SecondaryIndex> {
        let oid = table.catalog().add(schema(cols), IndexKind::Partial).unwrap();
        let index = table.catalog().snapshot().get(oid).unwrap().clone();
        if extents > 0 {
            build_step(table, &index, extents);
        }
        index
    }

    #[test]
    fn test_pick_requires_exact_schema_match() {
        let table = fixture_table();
        index_on(&table, &[0], 10);

        assert!(pick_index(&table, &schema(&[0]), IndexUsagePolicy::Partial).is_some());
        assert!(pick_index(&table, &schema(&[1]), IndexUsagePolicy::Partial).is_none());
        assert!(pick_index(&table, &schema(&[0, 1]), IndexUsagePolicy::Partial).is_none());
    }

    #[test]
    fn test_pick_policy_rules() {
        let table = fixture_table();
        index_on(&table, &[0], 4);

        assert!(pick_index(&table, &schema(&[0]), IndexUsagePolicy::Never).is_none());
        // Partial coverage is fine for the Partial policy...
        let pick = pick_index(&table, &schema(&[0]), IndexUsagePolicy::Partial).unwrap();
        assert_eq!(pick.prefix, 4);
        // ...but rejected by the Full policy until fully built.
        assert!(pick_index(&table, &schema(&[0]), IndexUsagePolicy::Full).is_none());

        let pick = pick_index(&table, &schema(&[0]), IndexUsagePolicy::Partial).unwrap();
        build_step(&table, &pick.index, 100);
        assert!(pick_index(&table, &schema(&[0]), IndexUsagePolicy::Full).is_some());
    }

    #[test]
    fn test_pick_prefers_larger_prefix_then_utility() {
        let table = fixture_table();
        // Same (schema, kind) is a duplicate, so compare a Partial-kind
        // index against a fully built Full-kind one.
        let a = {
            let oid = table.catalog().add(schema(&[0]), IndexKind::Partial).unwrap();
            table.catalog().snapshot().get(oid).unwrap().clone()
        };
        let b = {
            let oid = table.catalog().add(schema(&[0]), IndexKind::Full).unwrap();
            table.catalog().snapshot().get(oid).unwrap().clone()
        };
        build_step(&table, &a, 3);
        build_step(&table, &b, 10);

        let pick = pick_index(&table, &schema(&[0]), IndexUsagePolicy::Partial).unwrap();
        assert_eq!(pick.index.oid(), b.oid());
        assert_eq!(pick.prefix, 10);

        // Equal coverage: higher utility wins.
        build_step(&table, &a, 10);
        a.set_utility(5.0);
        b.set_utility(1.0);
        let pick = pick_index(&table, &schema(&[0]), IndexUsagePolicy::Partial).unwrap();
        assert_eq!(pick.index.oid(), a.oid());
    }

    #[test]
    fn test_full_kind_not_queryable_until_complete() {
        let table = fixture_table();
        let oid = table.catalog().add(schema(&[0]), IndexKind::Full).unwrap();
        let index = table.catalog().snapshot().get(oid).unwrap().clone();
        build_step(&table, &index, 4);

        // Half-built FULL index serves no scans under any policy.
        assert!(pick_index(&table, &schema(&[0]), IndexUsagePolicy::Partial).is_none());
        assert!(pick_index(&table, &schema(&[0]), IndexUsagePolicy::Full).is_none());

        build_step(&table, &index, 100);
        assert!(pick_index(&table, &schema(&[0]), IndexUsagePolicy::Partial).is_some());
        assert!(pick_index(&table, &schema(&[0]), IndexUsagePolicy::Full).is_some());
    }

    #[test]
    fn test_predicate_canonicalization_and_matching() {
        let pred = RangePredicate::new([(3, 0, 10), (1, 5, 8), (3, 2, 20)]).unwrap();
        assert_eq!(pred.columns(), schema(&[1, 3]));
        // Repeated column 3 intersected to [2, 10).
        assert_eq!(pred.leading_bound(), (5, 8));

        let row = [0i64, 6, 0, 9];
        assert!(pred.matches(&row));
        assert!(!pred.matches(&[0, 6, 0, 10])); // col3 at hi bound
        assert!(!pred.matches(&[0, 4, 0, 9])); // col1 below lo
        assert!(!pred.matches(&[0, 6])); // too narrow

        assert!(RangePredicate::new(std::iter::empty()).is_err());
    }

    #[test]
    fn test_hybrid_scan_matches_seq_scan() {
        let table = fixture_table();
        let pred = RangePredicate::new([(0, 25, 75)]).unwrap();

        let expected = hybrid_scan(&table, &pred, IndexUsagePolicy::Never);
        assert_eq!(expected.len(), 50);

        // Partial coverage: 4 of 10 extents from the index.
        index_on(&table, &[0], 4);
        let mut hybrid = hybrid_scan(&table, &pred, IndexUsagePolicy::Partial);
        hybrid.sort_by_key(|(ptr, _)| *ptr);
        let mut seq: Vec<_> = expected;
        seq.sort_by_key(|(ptr, _)| *ptr);
        assert_eq!(hybrid, seq);

        // No duplicates by pointer.
        let unique: HashSet<_> = hybrid.iter().map(|(ptr, _)| *ptr).collect();
        assert_eq!(unique.len(), hybrid.len());
    }

    #[test]
    fn test_hybrid_scan_multi_column_predicate() {
        let table = fixture_table();
        index_on(&table, &[0, 1], 10);

        // col0 in [0, 50), col1 in [0, 2): i % 7 in {0, 1}
        let pred = RangePredicate::new([(0, 0, 50), (1, 0, 2)]).unwrap();
        let results = hybrid_scan(&table, &pred, IndexUsagePolicy::Partial);

        let brute: Vec<i64> = (0..50).filter(|i| i % 7 < 2).collect();
        assert_eq!(results.len(), brute.len());
        for (_, row) in &results {
            assert!(row[0] < 50 && row[1] < 2);
        }
    }

    #[test]
    fn test_scan_sees_rows_appended_after_prefix() {
        let table = fixture_table();
        let index = index_on(&table, &[0], 10);
        assert_eq!(index.indexed_extents(), 10);

        // Grow the table past the built prefix.
        for i in 100..130 {
            table.insert_row(vec![i, i % 7]).unwrap();
        }
        let pred = RangePredicate::new([(0, 90, 120)]).unwrap();
        let results = hybrid_scan(&table, &pred, IndexUsagePolicy::Partial);
        assert_eq!(results.len(), 30);
    }
}
