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

//! Convergence Detection
//!
//! Observes per-phase snapshots of a table's index set and declares the
//! tuning converged once the set has stayed identical for enough
//! consecutive phases **and** every index in it is fully built. Workload
//! drivers use this to stop an experiment that has reached equilibrium
//! instead of running a fixed operation count.
//!
//! The phase threshold is `convergence_op_threshold / phase_length`:
//! the caller thinks in operations, the detector in phases.

use crate::error::{Result, TunerError};
use crate::index::IndexOid;
use crate::table::Table;

pub struct ConvergenceDetector {
    threshold_phases: u64,
    unchanged_phases: u64,
    prev: Option<Vec<IndexOid>>,
}

impl ConvergenceDetector {
    /// `convergence_op_threshold` operations at `phase_length` ops per
    /// phase. Run-until-converged is always explicit; there is no
    /// negative-operation-count sentinel.
    pub fn new(convergence_op_threshold: u64, phase_length: u64) -> Result<Self> {
        if phase_length == 0 {
            return Err(TunerError::InvalidArgument(
                "phase_length must be positive".into(),
            ));
        }
        Ok(Self::with_phase_threshold(
            (convergence_op_threshold / phase_length).max(1),
        ))
    }

    pub fn with_phase_threshold(threshold_phases: u64) -> Self {
        Self {
            threshold_phases: threshold_phases.max(1),
            unchanged_phases: 0,
            prev: None,
        }
    }

    /// Phases the index set has stayed identical
    pub fn unchanged_phases(&self) -> u64 {
        self.unchanged_phases
    }

    pub fn reset(&mut self) {
        self.unchanged_phases = 0;
        self.prev = None;
    }

    /// Record one phase boundary. Returns true once converged.
    pub fn observe(&mut self, table: &Table) -> bool {
        let snapshot = table.catalog().snapshot();
        let extent_count = table.extent_count();

        let oids: Vec<IndexOid> = snapshot.indexes().iter().map(|i| i.oid()).collect();
        let all_built = snapshot
            .indexes()
            .iter()
            .all(|i| i.indexed_extents() >= extent_count);

        if !all_built {
            self.prev = Some(oids);
            self.unchanged_phases = 0;
            return false;
        }

        let identical = self.prev.as_deref() == Some(&oids);
        if identical {
            self.unchanged_phases += 1;
        } else {
            self.unchanged_phases = 0;
        }
        self.prev = Some(oids);

        self.unchanged_phases >= self.threshold_phases
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build_step;
    use crate::index::{IndexKind, KeySchema};

    fn schema(cols: &[u32]) -> KeySchema {
        KeySchema::new(cols.iter().copied()).unwrap()
    }

    fn built_table() -> Table {
        let table = Table::new(1, 2, 5);
        for i in 0..20 {
            table.insert_row(vec![i, -i]).unwrap();
        }
        let oid = table.catalog().add(schema(&[0]), IndexKind::Partial).unwrap();
        let index = table.catalog().snapshot().get(oid).unwrap().clone();
        build_step(&table, &index, 100);
        table
    }

    #[test]
    fn test_phase_threshold_from_ops() {
        assert!(ConvergenceDetector::new(100, 0).is_err());
        let det = ConvergenceDetector::new(100, 25).unwrap();
        assert_eq!(det.threshold_phases, 4);
        // Threshold below one phase clamps to one.
        let det = ConvergenceDetector::new(1, 100).unwrap();
        assert_eq!(det.threshold_phases, 1);
    }

    #[test]
    fn test_converges_after_stable_phases() {
        let table = built_table();
        let mut det = ConvergenceDetector::with_phase_threshold(3);

        assert!(!det.observe(&table)); // first sight, nothing to compare
        assert!(!det.observe(&table));
        assert!(!det.observe(&table));
        assert!(det.observe(&table)); // three identical comparisons
    }

    #[test]
    fn test_index_set_change_resets_streak() {
        let table = built_table();
        let mut det = ConvergenceDetector::with_phase_threshold(2);

        assert!(!det.observe(&table));
        assert!(!det.observe(&table));

        // A new, unbuilt index both changes the set and breaks
        // completeness.
        let oid = table.catalog().add(schema(&[1]), IndexKind::Partial).unwrap();
        assert!(!det.observe(&table));
        assert_eq!(det.unchanged_phases(), 0);

        let index = table.catalog().snapshot().get(oid).unwrap().clone();
        build_step(&table, &index, 100);
        assert!(!det.observe(&table)); // first sight of the new set
        assert!(!det.observe(&table));
        assert!(det.observe(&table));
    }

    #[test]
    fn test_incomplete_build_defers_convergence() {
        let table = Table::new(1, 2, 5);
        for i in 0..20 {
            table.insert_row(vec![i, -i]).unwrap();
        }
        let oid = table.catalog().add(schema(&[0]), IndexKind::Partial).unwrap();
        let index = table.catalog().snapshot().get(oid).unwrap().clone();
        build_step(&table, &index, 2); // 2 of 4 extents

        let mut det = ConvergenceDetector::with_phase_threshold(1);
        assert!(!det.observe(&table));
        assert!(!det.observe(&table));
        assert_eq!(det.unchanged_phases(), 0);

        build_step(&table, &index, 100);
        assert!(!det.observe(&table)); // first complete sight
        assert!(det.observe(&table));
    }
}
