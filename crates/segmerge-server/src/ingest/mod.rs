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

//! A minimal bulk-ingest path: per-chunk multi-insert buffering. This does
//! not interact with the compressed-chunk scan operator at runtime; it
//! exists because the producer side of the system this operator reads from
//! is expected to carry one.

use std::collections::{HashMap, VecDeque};

use datafusion::scalar::ScalarValue;
use tracing::debug;

/// Flush thresholds: whichever is reached first triggers a flush.
pub const FLUSH_ROW_THRESHOLD: usize = 1000;
pub const FLUSH_BYTE_THRESHOLD: usize = 64 * 1024;

/// The maximum number of distinct chunks `ChunkBufferPool` keeps buffered at
/// once before evicting the least-recently-written one.
pub const MAX_BUFFERED_CHUNKS: usize = 32;

/// Rows destined for one chunk, accumulated until a multi-row insert is
/// worth flushing.
#[derive(Debug, Default)]
pub struct ChunkInsertBuffer {
    rows: Vec<Vec<ScalarValue>>,
    size_in_bytes: usize,
}

impl ChunkInsertBuffer {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn size_in_bytes(&self) -> usize {
        self.size_in_bytes
    }

    fn append(&mut self, row: Vec<ScalarValue>, row_size_bytes: usize) {
        self.rows.push(row);
        self.size_in_bytes += row_size_bytes;
    }

    fn should_flush(&self) -> bool {
        self.rows.len() >= FLUSH_ROW_THRESHOLD || self.size_in_bytes >= FLUSH_BYTE_THRESHOLD
    }

    /// Drain the buffer's rows as a single multi-row insert, resetting it to
    /// empty.
    pub fn flush(&mut self) -> Vec<Vec<ScalarValue>> {
        self.size_in_bytes = 0;
        std::mem::take(&mut self.rows)
    }
}

/// Holds one `ChunkInsertBuffer` per chunk currently being written to,
/// bounded to `MAX_BUFFERED_CHUNKS` by evicting (flushing) the
/// least-recently-written chunk.
#[derive(Debug, Default)]
pub struct ChunkBufferPool {
    buffers: HashMap<i64, ChunkInsertBuffer>,
    recency: VecDeque<i64>,
}

impl ChunkBufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Append `row` to `chunk_relid`'s buffer, flushing (and returning the
    /// flushed rows) if either threshold is crossed. Evicts the
    /// least-recently-written other chunk first if this is a new chunk and
    /// the pool is already at `MAX_BUFFERED_CHUNKS`, flushing the evicted
    /// chunk's rows into the same returned batch under its own key.
    pub fn append(
        &mut self,
        chunk_relid: i64,
        row: Vec<ScalarValue>,
        row_size_bytes: usize,
    ) -> Vec<(i64, Vec<Vec<ScalarValue>>)> {
        let mut flushed = Vec::new();

        if !self.buffers.contains_key(&chunk_relid) && self.buffers.len() >= MAX_BUFFERED_CHUNKS {
            if let Some(evicted_relid) = self.recency.pop_front() {
                debug!(evicted_relid, "evicting least-recently-written chunk buffer");
                if let Some(mut evicted) = self.buffers.remove(&evicted_relid) {
                    flushed.push((evicted_relid, evicted.flush()));
                }
            }
        }

        self.touch(chunk_relid);
        let buffer = self.buffers.entry(chunk_relid).or_default();
        buffer.append(row, row_size_bytes);

        if buffer.should_flush() {
            flushed.push((chunk_relid, buffer.flush()));
        }

        flushed
    }

    fn touch(&mut self, chunk_relid: i64) {
        self.recency.retain(|&id| id != chunk_relid);
        self.recency.push_back(chunk_relid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar_row() -> Vec<ScalarValue> {
        vec![ScalarValue::Int64(Some(1))]
    }

    #[test]
    fn flushes_at_row_threshold() {
        let mut pool = ChunkBufferPool::new();
        let mut last_flush = Vec::new();
        for _ in 0..FLUSH_ROW_THRESHOLD {
            last_flush = pool.append(1, scalar_row(), 8);
        }
        assert_eq!(last_flush.len(), 1);
        assert_eq!(last_flush[0].0, 1);
        assert_eq!(last_flush[0].1.len(), FLUSH_ROW_THRESHOLD);
    }

    #[test]
    fn flushes_at_byte_threshold_before_row_threshold() {
        let mut pool = ChunkBufferPool::new();
        let big_row_size = FLUSH_BYTE_THRESHOLD;
        let flushed = pool.append(1, scalar_row(), big_row_size);
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].1.len(), 1);
    }

    #[test]
    fn evicts_least_recently_written_chunk_past_the_cap() {
        let mut pool = ChunkBufferPool::new();
        for relid in 0..MAX_BUFFERED_CHUNKS as i64 {
            let flushed = pool.append(relid, scalar_row(), 8);
            assert!(flushed.is_empty());
        }
        assert_eq!(pool.len(), MAX_BUFFERED_CHUNKS);

        // chunk 0 is least-recently-written; a 33rd distinct chunk evicts it.
        let flushed = pool.append(MAX_BUFFERED_CHUNKS as i64, scalar_row(), 8);
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].0, 0);
        assert_eq!(pool.len(), MAX_BUFFERED_CHUNKS);
    }

    #[test]
    fn touching_a_chunk_moves_it_to_most_recently_written() {
        let mut pool = ChunkBufferPool::new();
        for relid in 0..MAX_BUFFERED_CHUNKS as i64 {
            pool.append(relid, scalar_row(), 8);
        }
        // Re-touch chunk 0 so it is no longer the least-recently-written.
        pool.append(0, scalar_row(), 8);

        let flushed = pool.append(MAX_BUFFERED_CHUNKS as i64, scalar_row(), 8);
        assert_eq!(flushed[0].0, 1);
    }
}
