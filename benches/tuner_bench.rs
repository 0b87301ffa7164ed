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

//! Index Tuner Benchmarks
//!
//! | Scenario | What It Tests |
//! |----------|---------------|
//! | build_step | Incremental build throughput per extent budget |
//! | hybrid_scan | Scan latency vs index coverage fraction |
//!
//! Run with: `cargo bench --bench tuner_bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use sochdb_tuner::{
    build_step, hybrid_scan, IndexKind, IndexUsagePolicy, KeySchema, RangePredicate, Table,
};

const EXTENT_CAPACITY: u32 = 1024;
const EXTENTS: i64 = 64;

fn loaded_table() -> Table {
    let table = Table::new(1, 4, EXTENT_CAPACITY);
    let rows = EXTENTS * EXTENT_CAPACITY as i64;
    for i in 0..rows {
        table.insert_row(vec![i, i % 1000, i % 7, -i]).unwrap();
    }
    table
}

fn bench_build_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_step");
    for budget in [1u64, 8, 32] {
        group.throughput(Throughput::Elements(budget * EXTENT_CAPACITY as u64));
        group.bench_with_input(BenchmarkId::from_parameter(budget), &budget, |b, &budget| {
            b.iter_batched(
                || {
                    let table = loaded_table();
                    let oid = table
                        .catalog()
                        .add(KeySchema::new([1]).unwrap(), IndexKind::Partial)
                        .unwrap();
                    let index = table.catalog().snapshot().get(oid).unwrap().clone();
                    (table, index)
                },
                |(table, index)| {
                    black_box(build_step(&table, &index, budget));
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn bench_hybrid_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("hybrid_scan");
    // Coverage fractions: none, half, full.
    for covered in [0u64, 32, 64] {
        let table = loaded_table();
        if covered > 0 {
            let oid = table
                .catalog()
                .add(KeySchema::new([1]).unwrap(), IndexKind::Partial)
                .unwrap();
            let index = table.catalog().snapshot().get(oid).unwrap().clone();
            build_step(&table, &index, covered);
        }
        let predicate = RangePredicate::new([(1, 100, 200)]).unwrap();

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{covered}of{EXTENTS}")),
            &table,
            |b, table| {
                b.iter(|| {
                    black_box(hybrid_scan(
                        black_box(table),
                        &predicate,
                        IndexUsagePolicy::Partial,
                    ))
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_build_step, bench_hybrid_scan);
criterion_main!(benches);
