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

//! The Decompression-Iterator Port: an opaque, pull-based, forward-only
//! iterator over decoded values for one compressed column of one batch.
//!
//! The core never inspects codec internals; it only ever calls `try_next`
//! through the `DecompressionIterator` trait object, and only ever obtains
//! one through the `CodecRegistry` by `(algorithm_id, direction)`. Concrete
//! codecs are registered by whatever process wires the operator up, not by
//! this crate.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use arrow::datatypes::DataType;
use datafusion::scalar::ScalarValue;

use crate::error::{CoreError, CoreResult};

/// The direction a `DecompressionIterator` walks its underlying compressed
/// stream in. Creating a new iterator over the same source with the
/// opposite direction yields the reverse sequence; iterators themselves are
/// not restartable or reversible in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Forward,
    Reverse,
}

/// The result of pulling one value from a `DecompressionIterator`.
///
/// Once `Done` has been returned, no further calls to `try_next` are valid;
/// callers that do so anyway get unspecified (but not unsafe) behavior from
/// codec implementations, since the contract places that burden on the
/// caller (`BatchState`), which never calls past `Done`.
#[derive(Debug)]
pub enum IterStep {
    Value(ScalarValue),
    Null,
    Done,
}

/// One compressed column's decoder, bound to one batch.
///
/// Finite: `try_next` is called exactly as many times as the batch's
/// `ROWCOUNT`, plus (tolerated) zero or more calls that return `Done` early.
/// A codec that yields a value *after* the row counter reached zero is a
/// fatal desync the core detects, not something the iterator itself must
/// guard against.
pub trait DecompressionIterator: Debug + Send {
    fn try_next(&mut self) -> IterStep;
}

type CodecCtor =
    dyn Fn(&[u8], &DataType) -> CoreResult<Box<dyn DecompressionIterator>> + Send + Sync;

/// Process-wide table of registered codecs, keyed by the `(algorithm_id,
/// direction)` pair carried in a compressed column's blob header.
///
/// Populated once at startup (mirroring how a real system registers its
/// compression algorithms before accepting queries); the core only ever
/// reads from it.
#[derive(Default, Clone)]
pub struct CodecRegistry {
    constructors: HashMap<(u8, Direction), Arc<CodecCtor>>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor for `algorithm_id` under `direction`. Registering
    /// the same key twice replaces the previous constructor.
    pub fn register<F>(&mut self, algorithm_id: u8, direction: Direction, ctor: F)
    where
        F: Fn(&[u8], &DataType) -> CoreResult<Box<dyn DecompressionIterator>> + Send + Sync + 'static,
    {
        self.constructors
            .insert((algorithm_id, direction), Arc::new(ctor));
    }

    /// Construct an iterator for `blob` (whose first byte is `algorithm_id`)
    /// and the column's `data_type`. Fails if no codec is registered for the
    /// `(algorithm_id, direction)` pair.
    pub fn open(
        &self,
        algorithm_id: u8,
        direction: Direction,
        blob: &[u8],
        data_type: &DataType,
    ) -> CoreResult<Box<dyn DecompressionIterator>> {
        let ctor = self
            .constructors
            .get(&(algorithm_id, direction))
            .ok_or(CoreError::UnknownCodec {
                algorithm_id,
                direction,
            })?;
        ctor(blob, data_type)
    }
}
