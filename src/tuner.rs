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

//! Index Tuner Control Loop
//!
//! A single background task that watches the workload and converges each
//! managed table toward the index set the workload deserves:
//!
//! ```text
//! tick:
//!   sleep(sleep_duration_us)
//!   stop flag set? ──────────────► clean exit
//!   for each managed table:
//!     samples since last analyze ≥ threshold?
//!       ├─ analyze: refresh utilities, decide adds + drops
//!       ├─ enact drops (before adds, so the count cap favors drops)
//!       └─ enact adds
//!     samples since last build ≥ threshold?
//!       └─ one bounded build_step per pending index, round-robin
//! ```
//!
//! The tuner is an explicit value the application owns; nothing here is
//! process-global. `add_table` / `clear_tables` and every knob setter
//! are safe to call while the loop is running.
//!
//! Error policy: everything on this path is recovered locally (log and
//! continue). The tuner must stay live under partial failure; only
//! `stop()` ends the loop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::analyzer::analyze;
use crate::builder::build_step_cooperative;
use crate::error::{Result, TunerError};
use crate::index::IndexKind;
use crate::table::{Table, TableId};

// ============================================================================
// Configuration
// ============================================================================

/// Tuner knobs. Defaults match the reference tuning for small extents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunerConfig {
    /// Tick period in microseconds; lower is more responsive, more CPU
    pub sleep_duration_us: u64,
    /// Samples observed before the next build wave
    pub build_sample_count_threshold: u64,
    /// Samples observed before the next analysis pass
    pub analyze_sample_count_threshold: u64,
    /// Build budget: extents indexed per index per wave
    pub extents_indexed_per_iteration: u64,
    /// Utility smoothing weight for the old value, in (0, 1)
    pub alpha: f64,
    /// Minimum smoothed utility for an index to stay alive
    pub index_utility_threshold: f64,
    /// Maximum ACTIVE indexes per table
    pub index_count_threshold: usize,
    /// Above this write ratio, new index additions are suppressed
    pub write_ratio_threshold: f64,
    /// Consecutive below-threshold analysis passes before retirement
    pub drop_grace_periods: u32,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            sleep_duration_us: 10,
            build_sample_count_threshold: 10,
            analyze_sample_count_threshold: 10,
            extents_indexed_per_iteration: 20,
            alpha: 0.2,
            index_utility_threshold: 0.25,
            index_count_threshold: 10,
            write_ratio_threshold: 0.75,
            drop_grace_periods: 2,
        }
    }
}

impl TunerConfig {
    /// Reject out-of-range knob values. Negative sentinels ("run until
    /// converged") are not accepted here; convergence is an explicit
    /// detector, not a magic value.
    pub fn validate(&self) -> Result<()> {
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(TunerError::InvalidArgument(format!(
                "alpha must be in (0, 1), got {}",
                self.alpha
            )));
        }
        if !(0.0..=1.0).contains(&self.write_ratio_threshold) {
            return Err(TunerError::InvalidArgument(format!(
                "write_ratio_threshold must be in [0, 1], got {}",
                self.write_ratio_threshold
            )));
        }
        if self.index_utility_threshold < 0.0 {
            return Err(TunerError::InvalidArgument(
                "index_utility_threshold must be non-negative".into(),
            ));
        }
        if self.index_count_threshold == 0 {
            return Err(TunerError::InvalidArgument(
                "index_count_threshold must be at least 1".into(),
            ));
        }
        if self.drop_grace_periods == 0 {
            return Err(TunerError::InvalidArgument(
                "drop_grace_periods must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Tuner activity counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TunerStats {
    pub analyze_passes: u64,
    pub build_waves: u64,
    pub extents_built: u64,
    pub indexes_created: u64,
    pub indexes_dropped: u64,
}

#[derive(Default)]
struct TunerCounters {
    analyze_passes: AtomicU64,
    build_waves: AtomicU64,
    extents_built: AtomicU64,
    indexes_created: AtomicU64,
    indexes_dropped: AtomicU64,
}

// ============================================================================
// IndexTuner
// ============================================================================

/// Per-table pacing marks: the ring's total-recorded counter at the
/// last analyze / build wave.
struct ManagedTable {
    table: Arc<Table>,
    last_analyze_mark: AtomicU64,
    last_build_mark: AtomicU64,
}

/// State shared between the owning handle and the background thread.
struct TunerInner {
    tables: DashMap<TableId, Arc<ManagedTable>>,
    config: RwLock<TunerConfig>,
    stop: AtomicBool,
    counters: TunerCounters,
}

/// The online index tuner. One instance drives any number of tables
/// from a single background thread. An explicit value the application
/// owns, not a process-wide singleton.
pub struct IndexTuner {
    inner: Arc<TunerInner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl IndexTuner {
    pub fn new() -> Self {
        // Defaults always validate.
        Self::with_config(TunerConfig::default()).expect("default config is valid")
    }

    pub fn with_config(config: TunerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(TunerInner {
                tables: DashMap::new(),
                config: RwLock::new(config),
                stop: AtomicBool::new(false),
                counters: TunerCounters::default(),
            }),
            handle: Mutex::new(None),
        })
    }

    /// Register a table for tuning. Safe while the loop runs.
    pub fn add_table(&self, table: Arc<Table>) {
        let id = table.id();
        self.inner.tables.insert(
            id,
            Arc::new(ManagedTable {
                table,
                last_analyze_mark: AtomicU64::new(0),
                last_build_mark: AtomicU64::new(0),
            }),
        );
        debug!(table = id, "table added to tuner");
    }

    /// Drop all managed tables. Safe while the loop runs.
    pub fn clear_tables(&self) {
        self.inner.tables.clear();
    }

    pub fn table_count(&self) -> usize {
        self.inner.tables.len()
    }

    /// ACTIVE indexes across all managed tables.
    pub fn index_count(&self) -> usize {
        self.inner
            .tables
            .iter()
            .map(|entry| entry.table.catalog().index_count())
            .sum()
    }

    pub fn stats(&self) -> TunerStats {
        let counters = &self.inner.counters;
        TunerStats {
            analyze_passes: counters.analyze_passes.load(Ordering::Relaxed),
            build_waves: counters.build_waves.load(Ordering::Relaxed),
            extents_built: counters.extents_built.load(Ordering::Relaxed),
            indexes_created: counters.indexes_created.load(Ordering::Relaxed),
            indexes_dropped: counters.indexes_dropped.load(Ordering::Relaxed),
        }
    }

    pub fn config(&self) -> TunerConfig {
        self.inner.config.read().clone()
    }

    // ------------------------------------------------------------------
    // Knob setters, callable while running
    // ------------------------------------------------------------------

    pub fn set_sleep_duration_us(&self, us: u64) {
        self.inner.config.write().sleep_duration_us = us;
    }

    pub fn set_build_sample_count_threshold(&self, threshold: u64) {
        self.inner.config.write().build_sample_count_threshold = threshold;
    }

    pub fn set_analyze_sample_count_threshold(&self, threshold: u64) {
        self.inner.config.write().analyze_sample_count_threshold = threshold;
    }

    pub fn set_extents_indexed_per_iteration(&self, budget: u64) {
        self.inner.config.write().extents_indexed_per_iteration = budget;
    }

    pub fn set_alpha(&self, alpha: f64) -> Result<()> {
        self.update_config(|c| c.alpha = alpha)
    }

    pub fn set_index_utility_threshold(&self, threshold: f64) -> Result<()> {
        self.update_config(|c| c.index_utility_threshold = threshold)
    }

    pub fn set_index_count_threshold(&self, threshold: usize) -> Result<()> {
        self.update_config(|c| c.index_count_threshold = threshold)
    }

    pub fn set_write_ratio_threshold(&self, threshold: f64) -> Result<()> {
        self.update_config(|c| c.write_ratio_threshold = threshold)
    }

    pub fn set_drop_grace_periods(&self, periods: u32) -> Result<()> {
        self.update_config(|c| c.drop_grace_periods = periods)
    }

    fn update_config(&self, mutate: impl FnOnce(&mut TunerConfig)) -> Result<()> {
        let mut config = self.inner.config.write();
        let mut candidate = config.clone();
        mutate(&mut candidate);
        candidate.validate()?;
        *config = candidate;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Spawn the background loop. Errors if it is already running.
    pub fn start(&self) -> Result<()> {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return Err(TunerError::InvalidArgument(
                "tuner is already running".into(),
            ));
        }
        self.inner.stop.store(false, Ordering::Release);
        let inner = Arc::clone(&self.inner);
        let thread = std::thread::Builder::new()
            .name("sochdb-index-tuner".into())
            .spawn(move || inner.run())
            .map_err(|e| TunerError::InvalidArgument(format!("spawn failed: {e}")))?;
        *handle = Some(thread);
        info!("index tuner started");
        Ok(())
    }

    /// Set the stop flag and join the loop. In-flight build work
    /// finishes its current extent first. Idempotent.
    pub fn stop(&self) {
        self.inner.stop.store(true, Ordering::Release);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("index tuner thread panicked");
            }
            info!("index tuner stopped");
        }
    }

    /// One synchronous tuning pass over all managed tables. Public so
    /// tests and benchmarks can drive the tuner deterministically.
    pub fn tune_once(&self) {
        self.inner.tune_once();
    }
}

impl Default for IndexTuner {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IndexTuner {
    fn drop(&mut self) {
        self.stop();
    }
}

impl TunerInner {
    fn run(self: Arc<Self>) {
        loop {
            let sleep_us = self.config.read().sleep_duration_us;
            std::thread::sleep(Duration::from_micros(sleep_us));
            match self.tick() {
                Ok(()) => {}
                Err(TunerError::Shutdown) => {
                    debug!("index tuner observed stop flag");
                    break;
                }
                Err(err) => {
                    // Tuner-path errors never kill the loop.
                    warn!(%err, "tuner pass failed, continuing");
                }
            }
        }
    }

    fn tick(&self) -> Result<()> {
        if self.stop.load(Ordering::Acquire) {
            return Err(TunerError::Shutdown);
        }
        self.tune_once();
        Ok(())
    }

    fn tune_once(&self) {
        let config = self.config.read().clone();
        for entry in self.tables.iter() {
            self.tune_table(entry.value(), &config);
        }
    }

    fn tune_table(&self, managed: &ManagedTable, config: &TunerConfig) {
        let table = &managed.table;
        let recorded = table.ring().total_recorded();

        // Analysis wave: decide adds and drops.
        let last_analyze = managed.last_analyze_mark.load(Ordering::Acquire);
        if recorded.saturating_sub(last_analyze) >= config.analyze_sample_count_threshold {
            let analysis = analyze(table, config);

            for oid in &analysis.retire {
                match table.catalog().retire(*oid) {
                    Ok(()) => {
                        self.counters.indexes_dropped.fetch_add(1, Ordering::Relaxed);
                        info!(table = table.id(), oid, "index retired");
                    }
                    Err(TunerError::IndexNotFound { .. }) => {}
                    Err(err) => warn!(table = table.id(), oid, %err, "retire failed"),
                }
            }
            for schema in &analysis.candidates {
                match table.catalog().add(schema.clone(), IndexKind::Partial) {
                    Ok(oid) => {
                        self.counters.indexes_created.fetch_add(1, Ordering::Relaxed);
                        info!(table = table.id(), oid, schema = %schema, "index created");
                    }
                    // A racing manual add is a no-op, not a failure.
                    Err(TunerError::DuplicateSchema { .. }) => {}
                    Err(err) => warn!(table = table.id(), %schema, %err, "add failed"),
                }
            }

            self.counters.analyze_passes.fetch_add(1, Ordering::Relaxed);
            managed.last_analyze_mark.store(recorded, Ordering::Release);
        }

        // Build wave: one bounded step per pending index, round-robin.
        let last_build = managed.last_build_mark.load(Ordering::Acquire);
        if recorded.saturating_sub(last_build) >= config.build_sample_count_threshold {
            let extent_count = table.extent_count();
            let snapshot = table.catalog().snapshot();
            let mut built = 0;
            for index in snapshot.indexes() {
                if index.indexed_extents() >= extent_count {
                    continue;
                }
                built += build_step_cooperative(
                    table,
                    index,
                    config.extents_indexed_per_iteration,
                    &self.stop,
                );
            }
            if built > 0 {
                self.counters.extents_built.fetch_add(built, Ordering::Relaxed);
            }
            self.counters.build_waves.fetch_add(1, Ordering::Relaxed);
            managed.last_build_mark.store(recorded, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::KeySchema;
    use crate::sample::Sample;

    fn schema(cols: &[u32]) -> KeySchema {
        KeySchema::new(cols.iter().copied()).unwrap()
    }

    fn loaded_table(id: TableId) -> Arc<Table> {
        let table = Arc::new(Table::new(id, 4, 25));
        for i in 0..200 {
            table.insert_row(vec![i, i % 10, i % 100, -i]).unwrap();
        }
        table
    }

    #[test]
    fn test_config_validation() {
        assert!(TunerConfig::default().validate().is_ok());
        assert!(TunerConfig {
            alpha: 0.0,
            ..TunerConfig::default()
        }
        .validate()
        .is_err());
        assert!(TunerConfig {
            write_ratio_threshold: 1.5,
            ..TunerConfig::default()
        }
        .validate()
        .is_err());
        assert!(TunerConfig {
            index_count_threshold: 0,
            ..TunerConfig::default()
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_setters_validate() {
        let tuner = IndexTuner::new();
        tuner.set_alpha(0.5).unwrap();
        assert!(tuner.set_alpha(1.0).is_err());
        assert!((tuner.config().alpha - 0.5).abs() < 1e-9);

        tuner.set_index_count_threshold(3).unwrap();
        assert!(tuner.set_index_count_threshold(0).is_err());
        assert_eq!(tuner.config().index_count_threshold, 3);
    }

    #[test]
    fn test_tune_once_creates_and_builds() {
        let tuner = IndexTuner::new();
        let table = loaded_table(1);
        tuner.add_table(table.clone());

        for _ in 0..20 {
            table.record_sample(Sample::read(schema(&[2]), 0.1, 50.0));
        }
        tuner.tune_once();

        let list = table.catalog().list();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].schema, schema(&[2]));
        // Budget 20 covers more than the table's 8 extents in one wave.
        assert_eq!(list[0].indexed_extents, table.extent_count());

        let stats = tuner.stats();
        assert_eq!(stats.indexes_created, 1);
        assert_eq!(stats.analyze_passes, 1);
        assert_eq!(stats.extents_built, table.extent_count());
    }

    #[test]
    fn test_below_threshold_samples_do_nothing() {
        let tuner = IndexTuner::new();
        let table = loaded_table(1);
        tuner.add_table(table.clone());

        for _ in 0..5 {
            table.record_sample(Sample::read(schema(&[2]), 0.1, 50.0));
        }
        tuner.tune_once();
        assert_eq!(table.catalog().index_count(), 0);
        assert_eq!(tuner.stats().analyze_passes, 0);
    }

    #[test]
    fn test_background_loop_start_stop() {
        let tuner = IndexTuner::new();
        tuner.set_sleep_duration_us(100);
        let table = loaded_table(1);
        tuner.add_table(table.clone());

        tuner.start().unwrap();
        assert!(tuner.start().is_err());

        for _ in 0..50 {
            table.record_sample(Sample::read(schema(&[1]), 0.05, 10.0));
        }
        // Managed-set mutation while the loop runs.
        tuner.add_table(loaded_table(2));

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while table.catalog().index_count() == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        tuner.stop();
        tuner.stop(); // idempotent

        assert_eq!(table.catalog().index_count(), 1);
        assert_eq!(tuner.index_count(), 1);

        // Restart after stop works.
        tuner.start().unwrap();
        tuner.stop();
    }

    #[test]
    fn test_clear_tables() {
        let tuner = IndexTuner::new();
        tuner.add_table(loaded_table(1));
        tuner.add_table(loaded_table(2));
        assert_eq!(tuner.table_count(), 2);
        tuner.clear_tables();
        assert_eq!(tuner.table_count(), 0);
    }
}
