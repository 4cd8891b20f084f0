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

//! `BatchState`: the per-batch working set. Binds to one row of a child
//! scan's `RecordBatch` (one compressed segment), lazily decodes it one
//! output row at a time, and tracks the row counter that tells the Merge
//! Driver when the batch is exhausted.
//!
//! A `BatchState`'s scratch space — the per-column iterators, the cached
//! segment-const values, the decoded output buffer — is its arena: nothing
//! here outlives `close`, and `close` is what a `BatchPool::release` resets
//! between tenants of the same slot. There is no separate arena allocator;
//! the struct's own fields are the bounded per-batch working set the design
//! calls for.

use arrow::array::Array;
use arrow::record_batch::RecordBatch;
use datafusion::scalar::ScalarValue;
use tracing::trace;

use segmerge_common::{
    CodecRegistry, ColumnDescriptor, ColumnKind, CoreError, CoreResult, DecompressionIterator,
    Direction, IterStep,
};

/// One column's live state inside an open `BatchState`.
enum ColumnSlot {
    /// Constant for the whole batch; read once in `open`.
    SegmentConst { value: ScalarValue },
    /// A per-row decoder; pulled once per `decode_next`.
    Compressed { iterator: Box<dyn DecompressionIterator> },
    /// The row-count column; not read again after `open` populates `remaining`.
    RowCount,
    /// Present only for the merge comparator's benefit if ever materialized
    /// through the normal path; otherwise unused.
    SequenceNum,
}

/// The per-batch working set described in the data model: the raw input
/// row's scalars, one `ColumnSlot` per descriptor, the remaining-row
/// counter, and the most recently decoded output tuple.
pub struct BatchState {
    columns: Vec<ColumnSlot>,
    /// Parallel to `columns`; `descriptors[i]` classifies `columns[i]`.
    descriptors: Vec<ColumnDescriptor>,
    remaining: i64,
    output_slot: Vec<ScalarValue>,
    is_open: bool,
}

impl BatchState {
    /// Construct a closed `BatchState`. `descriptors` is shared read-only
    /// across every `BatchState` the pool holds; it never changes once the
    /// operator has been constructed.
    pub fn new(descriptors: Vec<ColumnDescriptor>, num_output_columns: usize) -> Self {
        Self {
            columns: Vec::new(),
            descriptors,
            remaining: 0,
            output_slot: vec![ScalarValue::Null; num_output_columns],
            is_open: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    /// Whether the batch has more rows to decode. Meaningless before `open`.
    pub fn has_remaining(&self) -> bool {
        self.remaining > 0
    }

    pub fn output_slot(&self) -> &[ScalarValue] {
        &self.output_slot
    }

    /// Bind to one row of a compressed-segment `RecordBatch`, reading every
    /// descriptor's input column out of `row`. Fails if the row-count column
    /// is missing or null (`CoreError::MissingRowCount`), or if a compressed
    /// column's codec header cannot be opened.
    pub fn open(
        &mut self,
        batch: &RecordBatch,
        row: usize,
        codecs: &CodecRegistry,
        direction: Direction,
    ) -> CoreResult<()> {
        debug_assert!(!self.is_open, "open called on an already-open BatchState");

        let mut columns = Vec::with_capacity(self.descriptors.len());
        let mut remaining: Option<i64> = None;

        for descriptor in &self.descriptors {
            let array = batch.column(descriptor.input_attno as usize - 1);

            match descriptor.kind {
                ColumnKind::RowCount => {
                    let count = read_row_count(array.as_ref(), row)?;
                    remaining = Some(count);
                    columns.push(ColumnSlot::RowCount);
                }
                ColumnKind::SequenceNum => {
                    columns.push(ColumnSlot::SequenceNum);
                }
                ColumnKind::SegmentConst => {
                    let value = ScalarValue::try_from_array(array.as_ref(), row)
                        .map_err(CoreError::DataFusion)?;
                    columns.push(ColumnSlot::SegmentConst { value });
                }
                ColumnKind::Compressed => {
                    let blob = read_blob(array.as_ref(), row)?;
                    let iterator = open_compressed_iterator(
                        codecs,
                        blob,
                        &descriptor.data_type,
                        direction,
                        descriptor.input_attno,
                    )?;
                    columns.push(ColumnSlot::Compressed { iterator });
                }
            }
        }

        self.remaining = remaining.ok_or(CoreError::MissingRowCount)?;
        self.columns = columns;
        self.is_open = true;

        trace!(remaining = self.remaining, "opened batch state");
        Ok(())
    }

    /// Decode the next output row into `output_slot`. Returns `true` if a
    /// row was produced, `false` if the batch is exhausted (in which case
    /// `output_slot` is left at its previous contents and must not be read).
    pub fn decode_next(&mut self) -> CoreResult<bool> {
        debug_assert!(self.is_open, "decode_next called on an unopened BatchState");

        if self.remaining <= 0 {
            if let Some(desynced) = self.first_still_live_compressed_column() {
                return Err(CoreError::RowCountDesync {
                    input_attno: desynced,
                });
            }
            return Ok(false);
        }

        for (slot, descriptor) in self.columns.iter_mut().zip(self.descriptors.iter()) {
            match slot {
                ColumnSlot::SegmentConst { value } => {
                    let idx = (descriptor.output_attno - 1) as usize;
                    self.output_slot[idx] = value.clone();
                }
                ColumnSlot::Compressed { iterator } => {
                    let idx = (descriptor.output_attno - 1) as usize;
                    match iterator.try_next() {
                        IterStep::Value(value) => self.output_slot[idx] = value,
                        IterStep::Null => self.output_slot[idx] = null_like(&descriptor.data_type),
                        IterStep::Done => {
                            return Err(CoreError::RowCountDesync {
                                input_attno: descriptor.input_attno,
                            })
                        }
                    }
                }
                ColumnSlot::RowCount | ColumnSlot::SequenceNum => {}
            }
        }

        self.remaining -= 1;
        Ok(true)
    }

    /// Called once `remaining` has already reached zero: every compressed
    /// iterator must report `Done` on its next pull, or the batch metadata
    /// and column streams have desynchronized. Run lazily on the call
    /// *after* the one that decremented `remaining` to zero, so the last
    /// legitimately-decoded row is always returned before this fires.
    fn first_still_live_compressed_column(&mut self) -> Option<i32> {
        for (slot, descriptor) in self.columns.iter_mut().zip(self.descriptors.iter()) {
            if let ColumnSlot::Compressed { iterator } = slot {
                if matches!(iterator.try_next(), IterStep::Value(_) | IterStep::Null) {
                    return Some(descriptor.input_attno);
                }
            }
        }
        None
    }

    /// Drop iterators and cached constants, reset the counter. Safe to call
    /// on a `BatchState` that was never opened or that is already closed.
    pub fn close(&mut self) {
        self.columns.clear();
        self.remaining = 0;
        self.is_open = false;
    }
}

/// Read a row's count column without opening a `BatchState` for it, so a
/// caller can filter zero-row batches before spending a pool slot on them
/// (the Merge Driver's INIT step does this).
pub(crate) fn peek_row_count(
    batch: &RecordBatch,
    row: usize,
    descriptors: &[ColumnDescriptor],
) -> CoreResult<i64> {
    let rowcount_descriptor = descriptors
        .iter()
        .find(|d| d.kind == ColumnKind::RowCount)
        .ok_or(CoreError::MissingRowCount)?;
    let array = batch.column(rowcount_descriptor.input_attno as usize - 1);
    read_row_count(array.as_ref(), row)
}

fn read_row_count(array: &dyn Array, row: usize) -> CoreResult<i64> {
    if array.is_null(row) {
        return Err(CoreError::MissingRowCount);
    }
    let value = ScalarValue::try_from_array(array, row).map_err(CoreError::DataFusion)?;
    match value {
        ScalarValue::Int64(Some(n)) => Ok(n),
        ScalarValue::Int32(Some(n)) => Ok(n as i64),
        ScalarValue::UInt64(Some(n)) => Ok(n as i64),
        _ => Err(CoreError::MissingRowCount),
    }
}

fn read_blob(array: &dyn Array, row: usize) -> CoreResult<Vec<u8>> {
    if array.is_null(row) {
        return Err(CoreError::Codec("compressed column value is null".to_string()));
    }
    let value = ScalarValue::try_from_array(array, row).map_err(CoreError::DataFusion)?;
    match value {
        ScalarValue::Binary(Some(bytes)) | ScalarValue::LargeBinary(Some(bytes)) => Ok(bytes),
        other => Err(CoreError::Codec(format!(
            "compressed column is not a binary blob: {other:?}"
        ))),
    }
}

fn open_compressed_iterator(
    codecs: &CodecRegistry,
    blob: Vec<u8>,
    data_type: &arrow::datatypes::DataType,
    direction: Direction,
    input_attno: i32,
) -> CoreResult<Box<dyn DecompressionIterator>> {
    let algorithm_id = *blob.first().ok_or_else(|| {
        CoreError::Codec(format!(
            "empty compressed blob for input_attno={input_attno}"
        ))
    })?;
    codecs.open(algorithm_id, direction, &blob, data_type)
}

fn null_like(data_type: &arrow::datatypes::DataType) -> ScalarValue {
    ScalarValue::try_from(data_type).unwrap_or(ScalarValue::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::codecs::{encode_dense, encode_i64, register_reference_codecs, DENSE};
    use arrow::array::{BinaryArray, Int64Array};
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;
    use segmerge_common::build_column_descriptors;

    fn batch_with_count_and_compressed(count: i64, values: &[i64]) -> RecordBatch {
        let blob = encode_dense(&values.iter().map(|v| encode_i64(*v)).collect::<Vec<_>>());
        let schema = Arc::new(Schema::new(vec![
            Field::new("count", DataType::Int64, false),
            Field::new("value", DataType::Binary, false),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![count])),
                Arc::new(BinaryArray::from(vec![blob.as_slice()])),
            ],
        )
        .unwrap()
    }

    fn descriptors() -> Vec<ColumnDescriptor> {
        let map = vec![-1, 1];
        let names = vec!["count".to_string(), "value".to_string()];
        let types = vec![DataType::Int64, DataType::Int64];
        build_column_descriptors(&map, &names, &types, &Default::default()).unwrap()
    }

    #[test]
    fn decodes_exactly_count_rows() {
        let mut registry = CodecRegistry::new();
        register_reference_codecs(&mut registry);
        let batch = batch_with_count_and_compressed(3, &[10, 20, 30]);

        let mut state = BatchState::new(descriptors(), 1);
        state.open(&batch, 0, &registry, Direction::Forward).unwrap();

        let mut values = Vec::new();
        while state.decode_next().unwrap() {
            values.push(state.output_slot()[0].clone());
        }
        assert_eq!(values.len(), 3);
        assert!(matches!(values[0], ScalarValue::Int64(Some(10))));
        assert!(matches!(values[2], ScalarValue::Int64(Some(30))));
        assert!(!state.has_remaining());
    }

    #[test]
    fn detects_row_count_desync() {
        let mut registry = CodecRegistry::new();
        register_reference_codecs(&mut registry);
        // count says 3 but the compressed column encodes 4 values.
        let batch = batch_with_count_and_compressed(3, &[1, 2, 3, 4]);

        let mut state = BatchState::new(descriptors(), 1);
        state.open(&batch, 0, &registry, Direction::Forward).unwrap();

        // All 3 legitimately-counted rows are returned before the desync
        // surfaces; the 4th encoded value is never silently dropped.
        assert!(state.decode_next().unwrap());
        assert!(state.decode_next().unwrap());
        assert!(state.decode_next().unwrap());
        let err = state.decode_next().unwrap_err();
        assert!(matches!(err, CoreError::RowCountDesync { .. }));
    }

    #[test]
    fn missing_row_count_is_fatal() {
        let schema = Arc::new(Schema::new(vec![Field::new("count", DataType::Int64, true)]));
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(Int64Array::from(vec![None]))],
        )
        .unwrap();

        let map = vec![-1];
        let names = vec!["count".to_string()];
        let types = vec![DataType::Int64];
        let descriptors =
            build_column_descriptors(&map, &names, &types, &Default::default()).unwrap();

        let registry = CodecRegistry::new();
        let mut state = BatchState::new(descriptors, 0);
        let err = state.open(&batch, 0, &registry, Direction::Forward).unwrap_err();
        assert!(matches!(err, CoreError::MissingRowCount));
    }

    #[test]
    fn close_is_idempotent() {
        let mut registry = CodecRegistry::new();
        register_reference_codecs(&mut registry);
        let batch = batch_with_count_and_compressed(1, &[1]);

        let mut state = BatchState::new(descriptors(), 1);
        state.open(&batch, 0, &registry, Direction::Forward).unwrap();
        state.close();
        state.close();
        assert!(!state.is_open());
        assert!(!state.has_remaining());
    }

    #[test]
    fn dense_codec_unknown_algorithm_rejected_at_open() {
        let registry = CodecRegistry::new();
        let blob = vec![DENSE, 0, 0, 0, 0];
        let schema = Arc::new(Schema::new(vec![
            Field::new("count", DataType::Int64, false),
            Field::new("value", DataType::Binary, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![0i64])),
                Arc::new(BinaryArray::from(vec![blob.as_slice()])),
            ],
        )
        .unwrap();

        let mut state = BatchState::new(descriptors(), 1);
        let err = state
            .open(&batch, 0, &registry, Direction::Forward)
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownCodec { .. }));
    }
}
