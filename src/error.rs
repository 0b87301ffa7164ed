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

//! Error types for the index tuner
//!
//! Write-path errors (`WriteConflict`) propagate to the transaction
//! boundary and abort the transaction. Tuner-path errors are recovered
//! locally (log + continue) so the background loop stays live under
//! partial failure.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TunerError {
    #[error("write conflict on slot {extent}:{offset}")]
    WriteConflict { extent: u64, offset: u32 },

    #[error("index with schema [{schema}] already exists")]
    DuplicateSchema { schema: String },

    #[error("index {oid} corrupted: {detail}")]
    IndexCorruption { oid: u64, detail: String },

    #[error("index {oid} not found")]
    IndexNotFound { oid: u64 },

    #[error("prefix for index {oid} may not move from {current} to {requested}")]
    NonMonotonicPrefix {
        oid: u64,
        current: u64,
        requested: u64,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("tuner observed stop flag")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, TunerError>;
