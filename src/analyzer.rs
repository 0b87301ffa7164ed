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

//! Workload Analyzer
//!
//! Consumes a batch of samples from the table's ring and produces:
//!
//! 1. Candidate key schemas worth building, ordered by benefit.
//! 2. Refreshed smoothed utility for every existing index, plus the
//!    list of indexes whose utility has stayed below threshold for the
//!    drop-grace period.
//!
//! ## Benefit Model
//!
//! Each read sample contributes `1 / max(selectivity, ε)` to its column
//! set: the more selective the predicate, the more an index on those
//! columns would have helped. Benefits are compared against the batch
//! median rather than an absolute scale, so the decision is stable under
//! workload-rate drift.
//!
//! Per-index smoothing is exponential: `u' = α·u + (1−α)·observed`,
//! with `observed = 0` when the batch never touched the schema, so an
//! unused index decays toward retirement.
//!
//! A write-dominated batch (`write_ratio > threshold`) suppresses new
//! suggestions entirely; index maintenance costs would outweigh the
//! read benefit. Existing indexes still decay normally.
//!
//! The analyzer is stateless between batches except for the smoothed
//! utility and below-threshold streak, which live on the index entries.

use std::collections::HashMap;

use tracing::debug;

use crate::index::{IndexOid, KeySchema};
use crate::sample::SampleKind;
use crate::table::Table;
use crate::tuner::TunerConfig;

/// Selectivity floor for the benefit contribution
pub const SELECTIVITY_EPSILON: f64 = 1e-3;

/// Upper bound on samples consumed per analysis pass
pub const MAX_ANALYZE_BATCH: usize = 4096;

/// Decisions produced by one analysis pass.
#[derive(Debug, Clone, Default)]
pub struct Analysis {
    /// Schemas to add, highest benefit first, already capped so that
    /// enacting retirements-then-additions respects the index count
    /// threshold
    pub candidates: Vec<KeySchema>,
    /// Indexes whose smoothed utility stayed below threshold for the
    /// full grace period
    pub retire: Vec<IndexOid>,
    /// Fraction of update samples in the batch
    pub write_ratio: f64,
    /// Mean latency contribution of the read samples, microseconds
    pub avg_read_latency_us: f64,
    pub reads: usize,
    pub writes: usize,
}

/// Run one analysis pass over `table`'s pending samples.
pub fn analyze(table: &Table, config: &TunerConfig) -> Analysis {
    let samples = table.ring().drain_up_to(MAX_ANALYZE_BATCH);
    if samples.is_empty() {
        return Analysis::default();
    }

    let mut analysis = Analysis::default();
    let mut benefit: HashMap<KeySchema, f64> = HashMap::new();

    let mut read_latency_total = 0.0;
    for sample in &samples {
        match sample.kind {
            SampleKind::ReadAccess => {
                analysis.reads += 1;
                read_latency_total += sample.latency_us;
                let contribution = 1.0 / sample.selectivity.max(SELECTIVITY_EPSILON);
                *benefit.entry(sample.columns.clone()).or_insert(0.0) += contribution;
            }
            SampleKind::UpdateAccess => {
                analysis.writes += 1;
            }
        }
    }
    if analysis.reads > 0 {
        analysis.avg_read_latency_us = read_latency_total / analysis.reads as f64;
    }
    let total = analysis.reads + analysis.writes;
    analysis.write_ratio = if total == 0 {
        0.0
    } else {
        analysis.writes as f64 / total as f64
    };

    let snapshot = table.catalog().snapshot();

    // Refresh smoothed utility on every existing index; collect the
    // ones whose grace period ran out. Drops are decided before new
    // candidates are admitted.
    for index in snapshot.indexes() {
        let observed = benefit.get(index.schema()).copied().unwrap_or(0.0);
        let smoothed = config.alpha * index.utility() + (1.0 - config.alpha) * observed;
        index.set_utility(smoothed);

        let below = smoothed < config.index_utility_threshold;
        let streak = index.note_utility_pass(below);
        if streak >= config.drop_grace_periods {
            debug!(
                oid = index.oid(),
                schema = %index.schema(),
                utility = smoothed,
                "utility below threshold past grace period"
            );
            analysis.retire.push(index.oid());
        }
    }

    // Writes dominate: suppress suggestions, keep the decay above.
    if analysis.write_ratio > config.write_ratio_threshold {
        debug!(
            write_ratio = analysis.write_ratio,
            "write-heavy batch, suppressing index suggestions"
        );
        return analysis;
    }

    // Baseline is the batch median, so the qualification bar tracks the
    // workload's own scale.
    let mut raw: Vec<f64> = benefit.values().copied().collect();
    raw.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap());
    let baseline = median(&raw);

    let mut candidates: Vec<(KeySchema, f64)> = benefit
        .into_iter()
        .filter(|(schema, raw)| {
            *raw > config.index_utility_threshold * baseline && !snapshot.contains_schema(schema)
        })
        .collect();
    candidates.sort_unstable_by(|a, b| b.1.partial_cmp(&a.1).unwrap());

    // Cap additions so the table stays at or below the index count
    // threshold once the retirements above are enacted.
    let surviving = snapshot.len() - analysis.retire.len();
    let room = config.index_count_threshold.saturating_sub(surviving);
    candidates.truncate(room);

    analysis.candidates = candidates.into_iter().map(|(schema, _)| schema).collect();
    analysis
}

fn median(sorted: &[f64]) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    }
}
