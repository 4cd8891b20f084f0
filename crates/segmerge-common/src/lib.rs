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

//! Types shared between the compressed chunk scan operator and the ambient
//! catalog/ingest collaborators that surround it: the column-descriptor
//! table, the decompression-iterator port, slot identifiers, and the
//! crate-wide error type.

pub mod codec;
pub mod column_descriptor;
pub mod error;
pub mod schemas;
pub mod slot;

pub use codec::{CodecRegistry, DecompressionIterator, Direction, IterStep};
pub use column_descriptor::{
    build_column_descriptors, num_output_columns, ColumnDescriptor, ColumnKind, COUNT_SENTINEL,
    SEQNUM_SENTINEL,
};
pub use error::{CoreError, CoreResult};
pub use schemas::output_schema;
pub use slot::SlotNumber;
