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

//! Dense identifiers for batch states held by a pool or heap.

/// A dense integer identifier of a `BatchState` inside a `BatchPool`.
///
/// `SlotNumber`s are the only thing ever passed between the pool and the
/// merge heap; a `BatchState` never stores a pointer back to its own slot or
/// to the pool that owns it.
pub type SlotNumber = usize;
