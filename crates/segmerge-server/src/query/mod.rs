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

//! The compressed-chunk scan operator: a DataFusion `ExecutionPlan` that
//! reads batches of compressed segments from a child scan and emits
//! decompressed tuples, optionally k-way merged into a single globally
//! ordered stream.

pub mod batch_pool;
pub mod batch_state;
pub mod codecs;
pub mod compressed_chunk_scan_exec;
pub mod merge_driver;

pub use compressed_chunk_scan_exec::CompressedChunkScanExec;

use arrow::compute::SortOptions;
use datafusion::scalar::ScalarValue;

/// One key of a merge-mode sort order: which materialized output column to
/// compare on, and how.
#[derive(Debug, Clone)]
pub struct SortKey {
    /// 1-based output attno this key compares on; must name a materialized
    /// (non-metadata) `ColumnDescriptor`.
    pub output_attno: i32,
    pub options: SortOptions,
}

impl SortKey {
    pub fn new(output_attno: i32, descending: bool, nulls_first: bool) -> Self {
        Self {
            output_attno,
            options: SortOptions {
                descending,
                nulls_first,
            },
        }
    }
}

/// The operator's immutable configuration, built once by the (out of scope)
/// planner and threaded unchanged through `begin`/`execute`/`rescan`.
///
/// `sort_keys` must be empty iff `merge_enabled` is false; this is enforced
/// in `CompressedChunkScanExec::try_new`, not here, since building the value
/// itself should never fail.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub hypertable_id: i64,
    pub chunk_relid: i64,
    pub reverse: bool,
    pub merge_enabled: bool,
    pub decompression_map: Vec<i32>,
    pub sort_keys: Vec<SortKey>,
}

/// Compare two decoded output tuples on `sort_keys`, in the *user's* order
/// (ascending means "a before b"). The merge heap inverts this itself; this
/// function never does.
pub fn compare_sort_keys(
    sort_keys: &[SortKey],
    a: &[ScalarValue],
    b: &[ScalarValue],
) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    for key in sort_keys {
        let idx = (key.output_attno - 1) as usize;
        let ordering = compare_scalars(&a[idx], &b[idx], key.options);
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn compare_scalars(a: &ScalarValue, b: &ScalarValue, options: SortOptions) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    let a_is_null = a.is_null();
    let b_is_null = b.is_null();
    match (a_is_null, b_is_null) {
        (true, true) => return Ordering::Equal,
        (true, false) => return if options.nulls_first { Ordering::Less } else { Ordering::Greater },
        (false, true) => return if options.nulls_first { Ordering::Greater } else { Ordering::Less },
        (false, false) => {}
    }

    let ordering = a.partial_cmp(b).unwrap_or(Ordering::Equal);
    if options.descending {
        ordering.reverse()
    } else {
        ordering
    }
}
