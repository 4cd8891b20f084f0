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

//! The Column-Descriptor Table: a static, per-operator mapping from
//! compressed-input columns to their role and output position, shared
//! read-only by every `BatchState` the operator opens.

use std::collections::BTreeSet;

use arrow::datatypes::DataType;
use tracing::trace;

use crate::error::{CoreError, CoreResult};

/// Reserved output attno meaning "this input column is the batch's row
/// count metadata, not a materialized output column".
pub const COUNT_SENTINEL: i32 = -1;

/// Reserved output attno meaning "this input column is the batch's sort
/// sequence number metadata, used only by the merge comparator".
pub const SEQNUM_SENTINEL: i32 = -2;

/// What role an input-batch column plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Constant across the whole batch; stored once, read once per batch.
    SegmentConst,
    /// A per-row compressed stream; read once per decoded row.
    Compressed,
    /// The batch's row count; consulted to know when the batch ends.
    RowCount,
    /// The batch's sort sequence number; used only by the merge comparator.
    SequenceNum,
}

/// A single input-batch column's classification, fixed for the life of the
/// operator and shared read-only across every `BatchState`.
#[derive(Debug, Clone)]
pub struct ColumnDescriptor {
    pub kind: ColumnKind,
    /// 1-based index into the output (decoded) tuple. Negative for metadata
    /// columns (`COUNT_SENTINEL`, `SEQNUM_SENTINEL`), which are never
    /// materialized into the output tuple.
    pub output_attno: i32,
    /// 1-based index into the input (compressed) tuple. Strictly the
    /// position of this column in the decompression map, including
    /// positions skipped by a `0` entry, so the child scan's tuple layout
    /// is preserved even though skipped columns get no descriptor.
    pub input_attno: i32,
    pub data_type: DataType,
}

impl ColumnDescriptor {
    pub fn is_materialized(&self) -> bool {
        self.output_attno > 0
    }
}

/// Build the Column-Descriptor Table.
///
/// `decompression_map[i]` is the output attno for the input column at
/// 1-based position `i + 1`, or `0` to ignore that input column entirely.
/// `column_names` and `column_types` describe that same input column at the
/// same position; `segment_by_columns` is the catalog-derived set of column
/// names that are constant across a batch (as opposed to compressed
/// per-row streams).
///
/// Fatal (`CoreError::EmptyDecompressionMap`) if the map is empty or every
/// entry is `0` (no column would ever be produced). Fatal
/// (`CoreError::UnknownNegativeAttno`) if a negative entry is neither
/// sentinel.
pub fn build_column_descriptors(
    decompression_map: &[i32],
    column_names: &[String],
    column_types: &[DataType],
    segment_by_columns: &BTreeSet<String>,
) -> CoreResult<Vec<ColumnDescriptor>> {
    if decompression_map.is_empty() {
        return Err(CoreError::EmptyDecompressionMap);
    }
    debug_assert_eq!(decompression_map.len(), column_names.len());
    debug_assert_eq!(decompression_map.len(), column_types.len());

    let mut descriptors = Vec::with_capacity(decompression_map.len());

    for (position, &output_attno) in decompression_map.iter().enumerate() {
        if output_attno == 0 {
            continue;
        }

        let input_attno = position as i32 + 1;
        let kind = if output_attno == COUNT_SENTINEL {
            ColumnKind::RowCount
        } else if output_attno == SEQNUM_SENTINEL {
            ColumnKind::SequenceNum
        } else if output_attno < 0 {
            return Err(CoreError::UnknownNegativeAttno(output_attno));
        } else if segment_by_columns.contains(&column_names[position]) {
            ColumnKind::SegmentConst
        } else {
            ColumnKind::Compressed
        };

        descriptors.push(ColumnDescriptor {
            kind,
            output_attno,
            input_attno,
            data_type: column_types[position].clone(),
        });
    }

    if descriptors.is_empty() {
        return Err(CoreError::EmptyDecompressionMap);
    }

    trace!(count = descriptors.len(), "built column descriptor table");
    Ok(descriptors)
}

/// The count of descriptors that materialize into the output tuple, i.e.
/// every entry except `RowCount`/`SequenceNum` metadata.
pub fn num_output_columns(descriptors: &[ColumnDescriptor]) -> usize {
    descriptors.iter().filter(|d| d.is_materialized()).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: &[&str]) -> Vec<String> {
        n.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn assigns_input_attno_by_position_including_skips() {
        let map = vec![0, 1, -1, 2];
        let column_names = names(&["ignored", "device", "count", "value"]);
        let column_types = vec![
            DataType::Utf8,
            DataType::Utf8,
            DataType::Int64,
            DataType::Float64,
        ];
        let segment_by = BTreeSet::from(["device".to_string()]);

        let descriptors =
            build_column_descriptors(&map, &column_names, &column_types, &segment_by).unwrap();

        assert_eq!(descriptors.len(), 3);
        assert_eq!(descriptors[0].input_attno, 2);
        assert_eq!(descriptors[0].kind, ColumnKind::SegmentConst);
        assert_eq!(descriptors[1].input_attno, 3);
        assert_eq!(descriptors[1].kind, ColumnKind::RowCount);
        assert_eq!(descriptors[2].input_attno, 4);
        assert_eq!(descriptors[2].kind, ColumnKind::Compressed);
    }

    #[test]
    fn rejects_empty_map() {
        let err = build_column_descriptors(&[], &[], &[], &BTreeSet::new()).unwrap_err();
        assert!(matches!(err, CoreError::EmptyDecompressionMap));
    }

    #[test]
    fn rejects_all_zero_map() {
        let map = vec![0, 0];
        let names = names(&["a", "b"]);
        let types = vec![DataType::Int64, DataType::Int64];
        let err =
            build_column_descriptors(&map, &names, &types, &BTreeSet::new()).unwrap_err();
        assert!(matches!(err, CoreError::EmptyDecompressionMap));
    }

    #[test]
    fn rejects_unknown_negative_attno() {
        let map = vec![-3];
        let names = names(&["value"]);
        let types = vec![DataType::Float64];
        let err =
            build_column_descriptors(&map, &names, &types, &BTreeSet::new()).unwrap_err();
        assert!(matches!(err, CoreError::UnknownNegativeAttno(-3)));
    }

    #[test]
    fn num_output_columns_excludes_metadata() {
        let map = vec![1, -1, -2];
        let names = names(&["value", "count", "seq"]);
        let types = vec![DataType::Float64, DataType::Int64, DataType::Int64];
        let descriptors =
            build_column_descriptors(&map, &names, &types, &BTreeSet::new()).unwrap();
        assert_eq!(num_output_columns(&descriptors), 1);
    }
}
