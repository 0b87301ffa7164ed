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

//! SochDB Online Index Tuner
//!
//! Self-tuning secondary indexes for the in-memory hybrid store. A
//! background loop watches the live query/update workload, decides
//! which indexes each table deserves, builds them incrementally while
//! reads and writes keep running, and drops them again once their
//! utility decays.
//!
//! ```text
//! executors ──record_sample──► SampleRing ──drain──► Analyzer
//!                                                       │ add/drop
//!                                                       ▼
//! scans ◄──snapshot── IndexCatalog ◄──publish── Tuner Loop
//!                          │                        │
//!                          ▼                        ▼
//!                   SecondaryIndex ◄──build_step── Builder
//! ```
//!
//! A freshly added index covers zero extents; each tuner wave extends
//! its covered prefix by a bounded number of extents, and the hybrid
//! scan combines an index probe over the covered prefix with a
//! sequential scan over the uncovered tail. Updates keep covered
//! indexes coherent themselves; the builder catches up on everything
//! else.
//!
//! Nothing here persists: indexes are rebuilt from table data on
//! process restart.
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use sochdb_tuner::{
//!     hybrid_scan, IndexTuner, IndexUsagePolicy, KeySchema, RangePredicate, Sample, Table,
//! };
//!
//! let table = Arc::new(Table::new(1, 4, 128));
//! for i in 0..1000 {
//!     table.insert_row(vec![i, i % 10, i % 100, -i]).unwrap();
//! }
//!
//! let tuner = IndexTuner::new();
//! tuner.add_table(table.clone());
//!
//! // Executors report what they touched and how selective it was.
//! let columns = KeySchema::new([2]).unwrap();
//! for _ in 0..32 {
//!     table.record_sample(Sample::read(columns.clone(), 0.1, 250.0));
//! }
//! tuner.tune_once(); // or tuner.start() for the background loop
//!
//! let predicate = RangePredicate::new([(2, 10, 20)]).unwrap();
//! let rows = hybrid_scan(&table, &predicate, IndexUsagePolicy::Partial);
//! assert_eq!(rows.len(), 100);
//! ```

pub mod analyzer; // sample batches -> candidate schemas + utility refresh
pub mod builder; // incremental, bounded index population
pub mod catalog; // per-table index set with atomic snapshots
pub mod convergence; // index-set stability detection for workload drivers
pub mod error;
pub mod index; // key schema, key encoding, skip-list index
pub mod sample; // bounded workload sample ring
pub mod scan; // index selection + hybrid scan executor
pub mod table; // extents, slots, item pointers
pub mod tuner; // the background control loop
pub mod txn; // slot ownership + update visibility
pub mod update; // transactional in-place update

pub use analyzer::{analyze, Analysis};
pub use builder::{build_step, build_step_cooperative, BuildReport};
pub use catalog::{CatalogSnapshot, IndexCatalog, IndexInfo};
pub use convergence::ConvergenceDetector;
pub use error::{Result, TunerError};
pub use index::{encode_key, IndexKind, IndexOid, IndexState, KeySchema, SecondaryIndex};
pub use sample::{RingStats, Sample, SampleKind, SampleRing};
pub use scan::{hybrid_scan, pick_index, IndexPick, IndexUsagePolicy, RangePredicate};
pub use table::{ColumnId, Extent, ExtentId, ItemPointer, SlotOffset, Table, TableId};
pub use tuner::{IndexTuner, TunerConfig, TunerStats};
pub use txn::{Timestamp, TransactionManager, TxnId};
pub use update::{update_row, Projection, UpdateExpr};
