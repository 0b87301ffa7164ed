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

//! Incremental Index Builder
//!
//! Populates an index over a bounded number of extents per invocation so
//! a build never starves the system. One `build_step` covers at most
//! `budget_extents` extents of the range `[p, extent_count)` and
//! publishes the new prefix **per extent**, so concurrent scans observe
//! monotonic progress instead of one large jump at the end.
//!
//! ## Builder / Updater Coordination (lock-free)
//!
//! Updates may land on a slot while its extent is being indexed. The
//! builder is lock-free and re-validates instead of locking:
//!
//! ```text
//! v1 = slot.version          ── snapshot the update counter
//! v1 odd?  spin              ── an updater is mid-mutation
//! row = read slot
//! index.insert(key(row), ptr)
//! v2 = slot.version
//! v1 == v2 ?  done : remove entry, retry
//! ```
//!
//! Updaters on slots of the in-flight extent maintain their own entries
//! (see `update.rs`), and entry insertion is idempotent, so the races
//! resolve to exactly the entries for the current row values. The retry
//! loop is obstruction-free: it re-runs only while updates keep landing
//! on the same slot between snapshot and validation.
//!
//! ## Failure Policy
//!
//! A per-row key construction failure (row narrower than the schema) is
//! logged and skipped; it does not abort the build. A structural index
//! failure poisons the index, which is then retired, and the step
//! reports zero extents.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::index::{encode_key, SecondaryIndex};
use crate::table::{Extent, ItemPointer, Table};

/// Outcome of one `build_step` invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildReport {
    /// Extents newly covered by the index
    pub extents_built: u64,
    /// Rows inserted into the index
    pub rows_indexed: u64,
    /// Rows skipped due to key construction failure
    pub rows_skipped: u64,
    /// Re-validation retries caused by concurrent updates
    pub revalidations: u64,
}

/// Populate `index` over the next `budget_extents` extents of `table`.
/// Returns the number of extents newly indexed.
pub fn build_step(table: &Table, index: &Arc<SecondaryIndex>, budget_extents: u64) -> u64 {
    build_step_report(table, index, budget_extents, None).extents_built
}

/// `build_step` with a cooperative stop flag: the in-flight extent is
/// finished, then the flag is observed and the step returns early.
pub fn build_step_cooperative(
    table: &Table,
    index: &Arc<SecondaryIndex>,
    budget_extents: u64,
    stop: &AtomicBool,
) -> u64 {
    build_step_report(table, index, budget_extents, Some(stop)).extents_built
}

pub fn build_step_report(
    table: &Table,
    index: &Arc<SecondaryIndex>,
    budget_extents: u64,
    stop: Option<&AtomicBool>,
) -> BuildReport {
    let mut report = BuildReport::default();
    if budget_extents == 0 {
        return report;
    }
    if !index.is_active() {
        return report;
    }
    if index.is_poisoned() {
        warn!(oid = index.oid(), "index poisoned, retiring instead of building");
        let _ = table.catalog().retire(index.oid());
        return report;
    }

    let p = index.indexed_extents();
    // Extents appended after this snapshot are picked up by a later step.
    let target = table.extent_count().min(p + budget_extents);

    for e in p..target {
        if let Some(stop) = stop {
            if stop.load(Ordering::Acquire) {
                break;
            }
        }
        // Retired mid-step: back off without touching the prefix.
        if !index.is_active() {
            break;
        }
        let Some(extent) = table.extent(e) else {
            break;
        };
        if !index_extent(index, &extent, &mut report) {
            let _ = table.catalog().retire(index.oid());
            return BuildReport {
                extents_built: 0,
                ..report
            };
        }
        if let Err(err) = index.advance_prefix(e + 1) {
            // Single-builder discipline makes this unreachable; recover
            // by stopping the wave rather than crashing the tuner.
            warn!(oid = index.oid(), %err, "prefix advance rejected mid-build");
            break;
        }
        report.extents_built += 1;
    }

    if report.extents_built > 0 {
        debug!(
            oid = index.oid(),
            extents = report.extents_built,
            rows = report.rows_indexed,
            p = index.indexed_extents(),
            "build step"
        );
    }
    report
}

/// Insert entries for every live slot of `extent`. Returns false on
/// structural index failure.
fn index_extent(index: &Arc<SecondaryIndex>, extent: &Extent, report: &mut BuildReport) -> bool {
    let len = extent.len();
    for offset in 0..len {
        let Some(slot) = extent.slot(offset) else {
            break;
        };
        let ptr = ItemPointer::new(extent.id(), offset);
        loop {
            let header = slot.header();
            if !header.is_live() {
                break;
            }
            let version = header.version();
            // Odd version: an updater is mid-mutation on this slot.
            if version % 2 == 1 {
                std::hint::spin_loop();
                continue;
            }
            let Some(row) = slot.row() else {
                break;
            };
            let Some(key) = encode_key(&row, index.schema()) else {
                warn!(
                    oid = index.oid(),
                    extent = extent.id(),
                    offset,
                    "key construction failed, skipping row"
                );
                report.rows_skipped += 1;
                break;
            };
            if let Err(err) = index.insert(key.clone(), ptr) {
                warn!(oid = index.oid(), %err, "structural index failure");
                return false;
            }
            if header.version() == version {
                report.rows_indexed += 1;
                break;
            }
            // The row changed underneath us. The updater maintains the
            // entry for the new value itself; withdraw ours and retry
            // against the fresh row.
            index.remove(&key, ptr);
            report.revalidations += 1;
        }
    }
    true
}
