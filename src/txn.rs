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

//! Slot Ownership and Update Visibility
//!
//! Minimal transaction manager for the in-place update path. Writers
//! acquire per-slot ownership via CAS on the slot header before mutating
//! row bytes; readers never block and rely on the slot's `live` flag and
//! `version` counter.
//!
//! Ownership protocol:
//!
//! ```text
//! owner == NO_OWNER      free, any txn may CAS itself in
//! owner == txn_id        owned; only that txn may write or release
//! ```
//!
//! `perform_update` records the update for visibility: it allocates a
//! fresh commit timestamp into `begin_ts` and bumps the slot `version`
//! counter. The version bump is the signal the incremental index builder
//! uses to detect that a row changed underneath it.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::table::{SlotHeader, NO_OWNER};

/// Transaction identifier, monotonically increasing
pub type TxnId = u64;

/// Logical commit timestamp
pub type Timestamp = u64;

/// Allocates transaction ids and timestamps, and arbitrates slot
/// ownership for in-place updates.
pub struct TransactionManager {
    next_txn: AtomicU64,
    next_ts: AtomicU64,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            // Txn ids start at 1; NO_OWNER (0) marks a free slot.
            next_txn: AtomicU64::new(1),
            next_ts: AtomicU64::new(1),
        }
    }

    /// Begin a transaction: allocate its id.
    pub fn begin(&self) -> TxnId {
        self.next_txn.fetch_add(1, Ordering::Relaxed)
    }

    /// Current read timestamp (snapshot for scans).
    pub fn read_timestamp(&self) -> Timestamp {
        self.next_ts.load(Ordering::Acquire)
    }

    /// Does `txn` currently own the slot?
    pub fn is_owner(&self, header: &SlotHeader, txn: TxnId) -> bool {
        header.owner.load(Ordering::Acquire) == txn
    }

    /// Is the slot live and free to be owned?
    pub fn is_ownable(&self, header: &SlotHeader) -> bool {
        header.is_live() && header.owner.load(Ordering::Acquire) == NO_OWNER
    }

    /// Try to take ownership of the slot for `txn`. Fails if any other
    /// transaction holds it.
    pub fn acquire_ownership(&self, header: &SlotHeader, txn: TxnId) -> bool {
        header
            .owner
            .compare_exchange(NO_OWNER, txn, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Release ownership held by `txn`. Returns false if `txn` was not
    /// the owner (the release is then a no-op).
    pub fn release_ownership(&self, header: &SlotHeader, txn: TxnId) -> bool {
        header
            .owner
            .compare_exchange(txn, NO_OWNER, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Mark the start of an in-place update on an owned slot. The
    /// version counter becomes odd, which tells concurrent builders the
    /// slot is mid-mutation and must not be trusted until
    /// `perform_update` makes it even again (seqlock discipline).
    pub fn begin_update(&self, header: &SlotHeader) {
        header.version.fetch_add(1, Ordering::AcqRel);
    }

    /// Record a completed in-place update: allocate a commit timestamp
    /// and return the version counter to even. Pairs with
    /// `begin_update`; slot ownership serializes writers, so the
    /// odd/even protocol cannot be torn by a second updater.
    pub fn perform_update(&self, header: &SlotHeader) -> Timestamp {
        let ts = self.next_ts.fetch_add(1, Ordering::AcqRel) + 1;
        header.begin_ts.store(ts, Ordering::Release);
        header.version.fetch_add(1, Ordering::AcqRel);
        ts
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}
