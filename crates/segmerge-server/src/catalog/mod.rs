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

//! A thin, in-memory stand-in for the hypertable catalog: resolves a chunk
//! to the segment-by column set and column types the Column-Descriptor
//! Table needs at construction time. The real DDL/planning path that would
//! populate this is out of scope; `register_chunk` is its entry point here.

use std::collections::{BTreeMap, BTreeSet};

use arrow::datatypes::DataType;
use segmerge_common::{CoreError, CoreResult};

/// The catalog-derived classification one chunk contributes to column
/// descriptor construction.
#[derive(Debug, Clone)]
pub struct ChunkCompressionInfo {
    pub segment_by_columns: BTreeSet<String>,
    pub column_names: Vec<String>,
    pub column_types: Vec<DataType>,
}

/// Maps `chunk_relid` to its compression layout. Populated once per chunk by
/// whatever DDL/planning path creates it; read many times by query planning.
#[derive(Debug, Default)]
pub struct CompressionCatalog {
    chunks: BTreeMap<i64, ChunkCompressionInfo>,
}

impl CompressionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_chunk(&mut self, chunk_relid: i64, info: ChunkCompressionInfo) {
        self.chunks.insert(chunk_relid, info);
    }

    pub fn lookup(&self, chunk_relid: i64) -> CoreResult<&ChunkCompressionInfo> {
        self.chunks
            .get(&chunk_relid)
            .ok_or(CoreError::UnknownChunk(chunk_relid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_lookup_round_trips() {
        let mut catalog = CompressionCatalog::new();
        catalog.register_chunk(
            1,
            ChunkCompressionInfo {
                segment_by_columns: BTreeSet::from(["device".to_string()]),
                column_names: vec!["device".to_string(), "value".to_string()],
                column_types: vec![DataType::Utf8, DataType::Float64],
            },
        );

        let info = catalog.lookup(1).unwrap();
        assert!(info.segment_by_columns.contains("device"));
        assert_eq!(info.column_names.len(), 2);
    }

    #[test]
    fn unknown_chunk_is_an_error() {
        let catalog = CompressionCatalog::new();
        let err = catalog.lookup(42).unwrap_err();
        assert!(matches!(err, CoreError::UnknownChunk(42)));
    }
}
