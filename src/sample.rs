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

//! Workload Sample Ring
//!
//! Executors push one `Sample` per query describing the columns it
//! touched and the observed selectivity; the analyzer drains them in
//! batches. The ring is bounded: when full, the oldest sample is evicted
//! (newer samples describe the current workload better than old ones).
//!
//! `record` must never block an executor for unbounded time, so the ring
//! is a capped `VecDeque` behind a short critical section. Overflow is
//! counted in stats, not surfaced as an error.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::index::KeySchema;

/// What kind of access produced a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleKind {
    /// A read (scan/lookup) touched the column set
    ReadAccess,
    /// An update touched the column set
    UpdateAccess,
}

/// One workload event: accessed columns plus observed selectivity and
/// the latency share attributed to this column set.
#[derive(Debug, Clone)]
pub struct Sample {
    pub kind: SampleKind,
    pub columns: KeySchema,
    /// Fraction of rows satisfying the predicate, in [0, 1]
    pub selectivity: f64,
    /// Observed latency contribution in microseconds
    pub latency_us: f64,
    /// Wall-clock sequence number, assigned by the ring
    pub seq: u64,
}

impl Sample {
    pub fn read(columns: KeySchema, selectivity: f64, latency_us: f64) -> Self {
        Self {
            kind: SampleKind::ReadAccess,
            columns,
            selectivity,
            latency_us,
            seq: 0,
        }
    }

    pub fn update(columns: KeySchema, selectivity: f64, latency_us: f64) -> Self {
        Self {
            kind: SampleKind::UpdateAccess,
            columns,
            selectivity,
            latency_us,
            seq: 0,
        }
    }
}

/// Ring statistics snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RingStats {
    /// Samples ever recorded
    pub recorded: u64,
    /// Samples evicted due to overflow
    pub dropped: u64,
    /// Samples currently waiting for the analyzer
    pub pending: usize,
}

/// Bounded multi-producer sample log with drop-oldest overflow.
pub struct SampleRing {
    buf: Mutex<VecDeque<Sample>>,
    capacity: usize,
    next_seq: AtomicU64,
    dropped: AtomicU64,
}

impl SampleRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buf: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            next_seq: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record a sample. Non-blocking in the bounded sense: the critical
    /// section is a push plus at most one eviction.
    pub fn record(&self, mut sample: Sample) {
        sample.seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let mut buf = self.buf.lock();
        if buf.len() == self.capacity {
            buf.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        buf.push_back(sample);
    }

    /// Remove and return up to `n` samples in insertion order. Called by
    /// the analyzer only.
    pub fn drain_up_to(&self, n: usize) -> Vec<Sample> {
        let mut buf = self.buf.lock();
        let take = n.min(buf.len());
        buf.drain(..take).collect()
    }

    /// Samples currently buffered
    pub fn pending(&self) -> usize {
        self.buf.lock().len()
    }

    /// Total samples ever recorded, including evicted ones. The tuner
    /// uses the delta of this counter to pace analyze/build waves.
    pub fn total_recorded(&self) -> u64 {
        self.next_seq.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> RingStats {
        RingStats {
            recorded: self.total_recorded(),
            dropped: self.dropped.load(Ordering::Relaxed),
            pending: self.pending(),
        }
    }
}
