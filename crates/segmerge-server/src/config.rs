/* Copyright 2024 The Segmerge Contributors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Process-wide ambient configuration, parsed once at startup.

use std::path::PathBuf;

use clap::Parser;

/// Starting (and per-grow step) size of a `BatchPool`.
pub const INITIAL_BATCH_CAPACITY: usize = 16;

/// Starting capacity of a `MergeDriver`'s heap.
pub const BINARY_HEAP_DEFAULT_CAPACITY: usize = 16;

/// Startup configuration for the `segmerged` binary, the ambient
/// counterpart of the per-operator `ScanConfig` built by the planner.
#[derive(Debug, Clone, Parser)]
#[command(name = "segmerged", about = "Compressed-chunk scan operator server")]
pub struct ServerConfig {
    /// Directory the server reads compressed-chunk Parquet files from.
    #[arg(long, default_value = "./data")]
    pub data_folder: PathBuf,

    /// Default DataFusion `SessionConfig` batch size.
    #[arg(long, default_value_t = 8192)]
    pub batch_size: usize,

    /// Starting (and per-grow step) size of each query's `BatchPool`.
    #[arg(long, default_value_t = INITIAL_BATCH_CAPACITY)]
    pub initial_batch_capacity: usize,

    /// Starting capacity of each query's merge heap.
    #[arg(long, default_value_t = BINARY_HEAP_DEFAULT_CAPACITY)]
    pub heap_default_capacity: usize,
}

impl ServerConfig {
    pub fn from_args() -> Self {
        Self::parse()
    }
}
