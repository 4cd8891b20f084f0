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

//! `MergeDriver`: a binary min-heap over open `BatchState`s, ordered by the
//! decoded tuple's sort-key columns, driving the k-way merge across all
//! batches of a chunk. Grounded on the same shape as a classic k-way-merge
//! over independently-sorted runs: one heap entry per open run, precomputed
//! sort key alongside the run identifier so comparisons never re-touch the
//! run itself.
//!
//! Rust's `BinaryHeap` is a max-heap, so `HeapEntry`'s `Ord` is the
//! *reverse* of the user's comparator: popping the heap's max under that
//! reversed order yields the batch whose tuple is smallest under the query
//! ORDER BY, exactly as the design's "inverse of the user comparator"
//! requirement.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use datafusion::scalar::ScalarValue;
use segmerge_common::{ColumnDescriptor, CodecRegistry, CoreError, CoreResult, Direction, SlotNumber};
use tracing::{debug, trace};

use super::batch_pool::BatchPool;
use super::batch_state::peek_row_count;
use super::{compare_sort_keys, SortKey};

struct HeapEntry {
    slot: SlotNumber,
    key: Vec<ScalarValue>,
    sort_keys: Arc<Vec<SortKey>>,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        compare_sort_keys(&self.sort_keys, &self.key, &other.key) == Ordering::Equal
    }
}
impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, the design wants the smallest
        // tuple (under the user's ORDER BY) at the top.
        compare_sort_keys(&self.sort_keys, &self.key, &other.key).reverse()
    }
}

/// The three phases `§4.5` describes, made explicit rather than inferred
/// from whether the heap is null.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
    Init,
    Streaming,
    Done,
}

/// Drives the merge-append decompression engine: owns the pool and heap,
/// and exposes a single `next_tuple` that the stream polls once per output
/// row.
pub struct MergeDriver {
    pool: BatchPool,
    heap: BinaryHeap<HeapEntry>,
    descriptors: Vec<ColumnDescriptor>,
    sort_keys: Arc<Vec<SortKey>>,
    codecs: Arc<CodecRegistry>,
    direction: Direction,
    state: MergeState,
    /// An error from prefetching the *next* row off the just-emitted slot
    /// (see `next_tuple`), deferred so the tuple that call already produced
    /// is still returned; surfaced on the following `next_tuple` call.
    pending_error: Option<CoreError>,
}

impl MergeDriver {
    pub fn new(
        descriptors: Vec<ColumnDescriptor>,
        num_output_columns: usize,
        sort_keys: Vec<SortKey>,
        codecs: Arc<CodecRegistry>,
        direction: Direction,
        initial_batch_capacity: usize,
        heap_default_capacity: usize,
    ) -> Self {
        Self {
            pool: BatchPool::new(descriptors.clone(), num_output_columns, initial_batch_capacity),
            heap: BinaryHeap::with_capacity(heap_default_capacity.max(1)),
            descriptors,
            sort_keys: Arc::new(sort_keys),
            codecs,
            direction,
            state: MergeState::Init,
            pending_error: None,
        }
    }

    pub fn state(&self) -> MergeState {
        self.state
    }

    /// INIT: pull every row of every already-collected child batch into a
    /// fresh `BatchState`, decode its first tuple, and seed the heap.
    /// Batches exhausted at row zero (`count = 0`) are filtered before a
    /// pool slot is ever allocated for them.
    pub fn init(&mut self, batches: &[RecordBatch]) -> CoreResult<()> {
        debug_assert_eq!(self.state, MergeState::Init);

        for batch in batches {
            for row in 0..batch.num_rows() {
                if peek_row_count(batch, row, &self.descriptors)? == 0 {
                    trace!("filtering zero-row batch before pool allocation");
                    continue;
                }

                let slot = self.pool.allocate();
                let state = self.pool.state_mut(slot);
                state.open(batch, row, &self.codecs, self.direction)?;
                if state.decode_next()? {
                    let key = state.output_slot().to_vec();
                    self.heap.push(HeapEntry {
                        slot,
                        key,
                        sort_keys: Arc::clone(&self.sort_keys),
                    });
                } else {
                    self.pool.release(slot);
                }
            }
        }

        debug!(open_batches = self.heap.len(), "merge driver initialized");
        self.state = MergeState::Streaming;
        Ok(())
    }

    /// STREAMING: return the current top tuple, then lazily advance that
    /// batch by one row before the following call (§4.5 "why advance after
    /// emit"). Returns `None` once the heap is empty, transitioning to
    /// `DONE`.
    pub fn next_tuple(&mut self) -> CoreResult<Option<Vec<ScalarValue>>> {
        if let Some(err) = self.pending_error.take() {
            return Err(err);
        }

        match self.state {
            MergeState::Init => {
                debug_assert!(false, "next_tuple called before init");
                return Ok(None);
            }
            MergeState::Done => return Ok(None),
            MergeState::Streaming => {}
        }

        let Some(top) = self.heap.pop() else {
            self.state = MergeState::Done;
            return Ok(None);
        };

        let emitted = top.key.clone();

        // The tuple above is already validly produced and must be returned
        // via `Ok(Some(emitted))` below regardless of what happens here: a
        // desync discovered while prefetching this slot's next row is
        // deferred to the following call rather than discarding `emitted`.
        let state = self.pool.state_mut(top.slot);
        match state.decode_next() {
            Ok(true) => {
                let key = state.output_slot().to_vec();
                self.heap.push(HeapEntry {
                    slot: top.slot,
                    key,
                    sort_keys: Arc::clone(&self.sort_keys),
                });
            }
            Ok(false) => self.pool.release(top.slot),
            Err(e) => self.pending_error = Some(e),
        }

        Ok(Some(emitted))
    }

    pub fn is_done(&self) -> bool {
        self.state == MergeState::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::codecs::{encode_dense, encode_i64, register_reference_codecs};
    use crate::query::SortKey;
    use arrow::array::{BinaryArray, Int64Array};
    use arrow::datatypes::{DataType, Field, Schema};
    use segmerge_common::build_column_descriptors;
    use std::sync::Arc as StdArc;

    fn descriptors() -> Vec<ColumnDescriptor> {
        let map = vec![-1, 1];
        let names = vec!["count".to_string(), "time".to_string()];
        let types = vec![DataType::Int64, DataType::Int64];
        build_column_descriptors(&map, &names, &types, &Default::default()).unwrap()
    }

    fn batch(values: &[i64]) -> RecordBatch {
        let blob = encode_dense(&values.iter().map(|v| encode_i64(*v)).collect::<Vec<_>>());
        let schema = StdArc::new(Schema::new(vec![
            Field::new("count", DataType::Int64, false),
            Field::new("time", DataType::Binary, false),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                StdArc::new(Int64Array::from(vec![values.len() as i64])),
                StdArc::new(BinaryArray::from(vec![blob.as_slice()])),
            ],
        )
        .unwrap()
    }

    fn merge_descending() -> Vec<SortKey> {
        vec![SortKey::new(1, true, false)]
    }

    /// A batch whose `count` column understates how many values the
    /// compressed column actually encodes, to trigger a desync mid-merge.
    fn batch_with_count(count: i64, values: &[i64]) -> RecordBatch {
        let blob = encode_dense(&values.iter().map(|v| encode_i64(*v)).collect::<Vec<_>>());
        let schema = StdArc::new(Schema::new(vec![
            Field::new("count", DataType::Int64, false),
            Field::new("time", DataType::Binary, false),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                StdArc::new(Int64Array::from(vec![count])),
                StdArc::new(BinaryArray::from(vec![blob.as_slice()])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn desync_during_prefetch_does_not_discard_the_already_emitted_tuple() {
        let mut registry = CodecRegistry::new();
        register_reference_codecs(&mut registry);

        let mut driver = MergeDriver::new(
            descriptors(),
            1,
            merge_descending(),
            StdArc::new(registry),
            Direction::Forward,
            8,
            8,
        );

        // count=1 but 2 values: the first `next_tuple` legitimately emits
        // the first value, then prefetching the second row desyncs.
        let desynced = batch_with_count(1, &[10, 9]);
        driver.init(&[desynced]).unwrap();

        let first = driver.next_tuple().unwrap();
        assert!(matches!(first, Some(ref row) if matches!(row[0], ScalarValue::Int64(Some(10)))));

        let err = driver.next_tuple().unwrap_err();
        assert!(matches!(err, segmerge_common::CoreError::RowCountDesync { .. }));
    }

    #[test]
    fn two_batch_merge_on_time_desc() {
        let mut registry = CodecRegistry::new();
        register_reference_codecs(&mut registry);

        let mut driver = MergeDriver::new(
            descriptors(),
            1,
            merge_descending(),
            StdArc::new(registry),
            Direction::Forward,
            8,
            8,
        );

        let batch_a = batch(&[10, 7, 3]);
        let batch_b = batch(&[9, 8, 2]);
        driver.init(&[batch_a, batch_b]).unwrap();

        let mut out = Vec::new();
        while let Some(tuple) = driver.next_tuple().unwrap() {
            if let ScalarValue::Int64(Some(v)) = tuple[0] {
                out.push(v);
            }
        }

        assert_eq!(out, vec![10, 9, 8, 7, 3, 2]);
        assert!(driver.is_done());
    }

    #[test]
    fn zero_row_batch_never_enters_heap() {
        let mut registry = CodecRegistry::new();
        register_reference_codecs(&mut registry);

        let mut driver = MergeDriver::new(
            descriptors(),
            1,
            merge_descending(),
            StdArc::new(registry),
            Direction::Forward,
            8,
            8,
        );

        let empty = batch(&[]);
        let normal = batch(&[5]);
        driver.init(&[empty, normal]).unwrap();

        let mut count = 0;
        while driver.next_tuple().unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 1);
    }

    #[test]
    fn single_batch_degenerates_to_streaming_that_batch() {
        let mut registry = CodecRegistry::new();
        register_reference_codecs(&mut registry);

        let mut driver = MergeDriver::new(
            descriptors(),
            1,
            merge_descending(),
            StdArc::new(registry),
            Direction::Forward,
            8,
            8,
        );

        driver.init(&[batch(&[4, 3, 2, 1])]).unwrap();
        let mut out = Vec::new();
        while let Some(tuple) = driver.next_tuple().unwrap() {
            if let ScalarValue::Int64(Some(v)) = tuple[0] {
                out.push(v);
            }
        }
        assert_eq!(out, vec![4, 3, 2, 1]);
    }
}
