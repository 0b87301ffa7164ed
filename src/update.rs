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

//! Transactional In-Place Update
//!
//! Updates a row at a fixed `ItemPointer` and keeps every index on the
//! table coherent. Protocol, in order:
//!
//! 1. Take slot ownership through the transaction manager; failure is a
//!    `WriteConflict` that aborts the caller's transaction.
//! 2. Materialize the old row; evaluate the projection to get the new
//!    row.
//! 3. For every index whose coverage reaches the slot's extent, insert
//!    the entry for the new key **then** delete the entry for the old
//!    key. The row is transiently reachable through both keys; scans
//!    deduplicate by pointer. The reverse order (delete-then-insert)
//!    would make the row transiently reachable through neither, which
//!    readers cannot compensate for.
//! 4. Copy the new row over the old row bytes in place.
//! 5. Tell the transaction manager, which stamps the commit timestamp
//!    and closes the slot's version window.
//!
//! Steps 3-5 run inside the slot's version window (`begin_update` /
//! `perform_update`), so the incremental builder either sees the slot
//! before the update, after it, or retries - never a half-applied mix.
//!
//! Indexes whose prefix has not reached the extent are skipped; the
//! builder picks the new value up when it gets there. An index that
//! reports structural corruption is retired on the spot; the update and
//! the remaining indexes proceed.

use tracing::warn;

use crate::error::{Result, TunerError};
use crate::index::encode_key;
use crate::table::{ColumnId, ItemPointer, Table};
use crate::txn::{TransactionManager, TxnId};

/// Per-column update expression, evaluated against the old row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateExpr {
    /// Replace with a constant
    SetConst(i64),
    /// Add a constant to the old value (wrapping)
    AddConst(i64),
    /// Replace the old value with its negation (wrapping)
    Negate,
}

impl UpdateExpr {
    fn apply(&self, old: i64) -> i64 {
        match self {
            UpdateExpr::SetConst(v) => *v,
            UpdateExpr::AddConst(d) => old.wrapping_add(*d),
            UpdateExpr::Negate => old.wrapping_neg(),
        }
    }
}

/// Projection: the target list of an update. Columns not named keep
/// their old value.
#[derive(Debug, Clone, Default)]
pub struct Projection {
    targets: Vec<(ColumnId, UpdateExpr)>,
}

impl Projection {
    pub fn new(targets: impl IntoIterator<Item = (ColumnId, UpdateExpr)>) -> Self {
        Self {
            targets: targets.into_iter().collect(),
        }
    }

    /// The reference write workload: flip the sign of each named column.
    pub fn negate_columns(columns: impl IntoIterator<Item = ColumnId>) -> Self {
        Self::new(columns.into_iter().map(|c| (c, UpdateExpr::Negate)))
    }

    pub fn targets(&self) -> &[(ColumnId, UpdateExpr)] {
        &self.targets
    }

    /// Evaluate against the old row, producing the new row.
    pub fn evaluate(&self, old: &[i64]) -> Vec<i64> {
        let mut new = old.to_vec();
        for (column, expr) in &self.targets {
            if let Some(slot) = new.get_mut(*column as usize) {
                *slot = expr.apply(old[*column as usize]);
            }
        }
        new
    }

    fn max_column(&self) -> Option<ColumnId> {
        self.targets.iter().map(|(c, _)| *c).max()
    }
}

/// Update the row at `ptr` in place and maintain all indexes.
///
/// The caller's transaction keeps slot ownership after a successful
/// return; release it when the transaction ends.
pub fn update_row(
    table: &Table,
    tm: &TransactionManager,
    txn: TxnId,
    ptr: ItemPointer,
    projection: &Projection,
) -> Result<()> {
    let extent = table
        .extent(ptr.extent)
        .ok_or_else(|| TunerError::InvalidArgument(format!("no extent {}", ptr.extent)))?;
    let slot = extent
        .slot(ptr.offset)
        .ok_or_else(|| TunerError::InvalidArgument(format!("no slot {}:{}", ptr.extent, ptr.offset)))?;
    let header = slot.header();

    // Step 1: ownership.
    let mut acquired = false;
    if !tm.is_owner(header, txn) {
        if !tm.is_ownable(header) || !tm.acquire_ownership(header, txn) {
            return Err(TunerError::WriteConflict {
                extent: ptr.extent,
                offset: ptr.offset,
            });
        }
        acquired = true;
    }

    let release_on_error = |err: TunerError| {
        if acquired {
            tm.release_ownership(header, txn);
        }
        err
    };

    // Step 2: old row, projected new row.
    let old_row = slot.row().ok_or_else(|| {
        release_on_error(TunerError::WriteConflict {
            extent: ptr.extent,
            offset: ptr.offset,
        })
    })?;
    if let Some(max) = projection.max_column() {
        if max as usize >= old_row.len() {
            return Err(release_on_error(TunerError::InvalidArgument(format!(
                "projection targets column {max}, row has {} columns",
                old_row.len()
            ))));
        }
    }
    let new_row = projection.evaluate(&old_row);

    // Open the slot's version window: builders back off until closed.
    tm.begin_update(header);

    // Step 3: index maintenance, insert-then-delete per index.
    let snapshot = table.catalog().snapshot();
    for index in snapshot.indexes() {
        let p = index.indexed_extents();
        if p < ptr.extent {
            // Not covered yet; the builder will index the new value.
            continue;
        }
        // p > extent: covered. p == extent: the builder may be working
        // this extent right now; maintain the entry ourselves and let
        // idempotent inserts absorb the overlap.
        let (Some(old_key), Some(new_key)) = (
            encode_key(&old_row, index.schema()),
            encode_key(&new_row, index.schema()),
        ) else {
            warn!(
                oid = index.oid(),
                extent = ptr.extent,
                offset = ptr.offset,
                "key construction failed during update, skipping index"
            );
            continue;
        };
        if old_key == new_key {
            continue; // indexed columns untouched
        }
        if let Err(err) = index.insert(new_key, ptr) {
            warn!(oid = index.oid(), %err, "index corrupted during update, retiring");
            let _ = table.catalog().retire(index.oid());
            continue;
        }
        index.remove(&old_key, ptr);
    }

    // Step 4: copy the new row over the old bytes.
    slot.overwrite(&new_row);

    // Step 5: record the update for MVCC visibility.
    tm.perform_update(header);
    Ok(())
}
