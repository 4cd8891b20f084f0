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

//! Builders for synthetic compressed-segment `RecordBatch`es, shared by
//! unit tests across this crate and by its `tests/` integration suite.

use std::sync::Arc;

use arrow::array::{BinaryArray, Int64Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;

use crate::query::codecs::{encode_dense, encode_i64};

/// The schema of a synthetic one-segment-per-row input batch with a `count`
/// metadata column and a single compressed `time` column, laid out to
/// match `decompression_map = [-1, 1]`.
pub fn segment_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("count", DataType::Int64, false),
        Field::new("time", DataType::Binary, false),
    ]))
}

/// Build one input `RecordBatch` row (one compressed segment) encoding
/// `values` densely with the reference `DENSE` codec.
pub fn segment_batch(rows: &[&[i64]]) -> RecordBatch {
    let counts: Vec<i64> = rows.iter().map(|r| r.len() as i64).collect();
    let blobs: Vec<Vec<u8>> = rows
        .iter()
        .map(|values| encode_dense(&values.iter().map(|v| encode_i64(*v)).collect::<Vec<_>>()))
        .collect();
    let blob_refs: Vec<&[u8]> = blobs.iter().map(|b| b.as_slice()).collect();

    RecordBatch::try_new(
        segment_schema(),
        vec![
            Arc::new(Int64Array::from(counts)),
            Arc::new(BinaryArray::from(blob_refs)),
        ],
    )
    .expect("synthetic segment batch is well-formed")
}
