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

//! Error types shared between the compressed chunk scan operator and its
//! ambient collaborators (catalog, ingest).

use datafusion::error::DataFusionError;

/// Errors raised by the compressed-chunk scan core and the collaborators it
/// is built against.
///
/// Configuration errors are raised during operator construction, before any
/// tuple has been produced. Data-integrity and codec errors are raised while
/// streaming and are always fatal: nothing in this crate retries after one.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The decompression map supplied to the column-descriptor table was empty.
    #[error("decompression map must describe at least one column")]
    EmptyDecompressionMap,

    /// A negative output attno outside of the reserved sentinels was supplied.
    #[error("unknown negative output attno {0} (expected COUNT_SENTINEL or SEQNUM_SENTINEL)")]
    UnknownNegativeAttno(i32),

    /// Sort keys were supplied while merge mode is disabled, or vice versa.
    #[error("sort keys must be non-empty iff merge_enabled is true (merge_enabled={merge_enabled}, sort_keys={sort_key_count})")]
    SortKeyMergeMismatch {
        merge_enabled: bool,
        sort_key_count: usize,
    },

    /// A batch's ROWCOUNT column was null or missing.
    #[error("batch is missing a non-null count column")]
    MissingRowCount,

    /// A compressed column's iterator produced another value after the
    /// batch's row counter had already reached zero.
    #[error("compressed column out of sync with batch counter (column input_attno={input_attno})")]
    RowCountDesync { input_attno: i32 },

    /// A system column (e.g. `tableoid`) was requested as a materialized
    /// output column; there is no catalog context here to rewrite it to a
    /// literal, so the scan is rejected at construction time instead.
    #[error("unsupported system column referenced after decompression: {0}")]
    UnsupportedSystemColumn(String),

    /// The codec registry has no entry for `(algorithm_id, direction)`.
    #[error("no codec registered for algorithm_id={algorithm_id}, direction={direction:?}")]
    UnknownCodec {
        algorithm_id: u8,
        direction: crate::codec::Direction,
    },

    /// Propagated verbatim from a decompression iterator implementation.
    #[error("codec error: {0}")]
    Codec(String),

    /// The catalog has no entry for the requested chunk.
    #[error("no compression catalog entry for chunk_relid={0}")]
    UnknownChunk(i64),

    /// `poll_next` observed the cancellation flag set.
    #[error("scan cancelled")]
    Cancelled,

    /// Wraps an error surfaced by the Arrow/DataFusion stack.
    #[error(transparent)]
    DataFusion(#[from] DataFusionError),
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;

impl From<CoreError> for DataFusionError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::DataFusion(inner) => inner,
            other => DataFusionError::Execution(other.to_string()),
        }
    }
}
