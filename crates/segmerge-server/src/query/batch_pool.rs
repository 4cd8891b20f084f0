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

//! `BatchPool`: a dynamically-sized array of `BatchState`s with an explicit
//! free set, grown by doubling when exhausted. Slot ids are stable across a
//! grow; the pool never shrinks within an operator's lifetime.

use std::collections::BTreeSet;

use segmerge_common::{ColumnDescriptor, SlotNumber};
use tracing::debug;

use super::batch_state::BatchState;

/// Owns every `BatchState` the operator may have open at once.
pub struct BatchPool {
    slots: Vec<BatchState>,
    free: BTreeSet<SlotNumber>,
    descriptors: Vec<ColumnDescriptor>,
    num_output_columns: usize,
    initial_batch_capacity: usize,
}

impl BatchPool {
    /// Build an empty pool; `initial_batch_capacity` is both the first
    /// grow's size and the step size of every later grow.
    pub fn new(
        descriptors: Vec<ColumnDescriptor>,
        num_output_columns: usize,
        initial_batch_capacity: usize,
    ) -> Self {
        Self {
            slots: Vec::new(),
            free: BTreeSet::new(),
            descriptors,
            num_output_columns,
            initial_batch_capacity: initial_batch_capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Pre-fill the pool with `n` closed slots up front.
    pub fn initial_size(&mut self, n: usize) {
        while self.slots.len() < n {
            self.push_new_slot();
        }
    }

    /// Return the lowest free slot id, growing the pool by
    /// `initial_batch_capacity` if none is free.
    pub fn allocate(&mut self) -> SlotNumber {
        if self.free.is_empty() {
            self.grow();
        }
        let id = *self
            .free
            .iter()
            .next()
            .expect("grow() always makes at least one slot free");
        self.free.remove(&id);
        id
    }

    /// Close the `BatchState` at `id` and return it to the free set.
    /// Idempotent: releasing an already-free id is a no-op.
    pub fn release(&mut self, id: SlotNumber) {
        if self.free.contains(&id) {
            return;
        }
        self.slots[id].close();
        self.free.insert(id);
    }

    pub fn state(&self, id: SlotNumber) -> &BatchState {
        &self.slots[id]
    }

    pub fn state_mut(&mut self, id: SlotNumber) -> &mut BatchState {
        &mut self.slots[id]
    }

    fn grow(&mut self) {
        let before = self.slots.len();
        let target = before + self.initial_batch_capacity;
        debug!(before, target, "growing batch pool");
        while self.slots.len() < target {
            self.push_new_slot();
        }
    }

    fn push_new_slot(&mut self) {
        let id = self.slots.len();
        self.slots
            .push(BatchState::new(self.descriptors.clone(), self.num_output_columns));
        self.free.insert(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::DataType;
    use segmerge_common::build_column_descriptors;

    fn descriptors() -> Vec<ColumnDescriptor> {
        let map = vec![-1, 1];
        let names = vec!["count".to_string(), "value".to_string()];
        let types = vec![DataType::Int64, DataType::Int64];
        build_column_descriptors(&map, &names, &types, &Default::default()).unwrap()
    }

    #[test]
    fn grows_by_initial_capacity_when_exhausted() {
        let mut pool = BatchPool::new(descriptors(), 1, 2);
        assert_eq!(pool.capacity(), 0);

        let a = pool.allocate();
        let b = pool.allocate();
        assert_eq!(pool.capacity(), 2);

        let c = pool.allocate();
        assert_eq!(pool.capacity(), 4);

        assert_ne!(a, b);
        assert_ne!(b, c);
    }

    #[test]
    fn release_then_allocate_reuses_the_same_id() {
        let mut pool = BatchPool::new(descriptors(), 1, 2);
        let a = pool.allocate();
        pool.release(a);
        let b = pool.allocate();
        assert_eq!(a, b);
    }

    #[test]
    fn release_is_idempotent() {
        let mut pool = BatchPool::new(descriptors(), 1, 2);
        let a = pool.allocate();
        pool.release(a);
        pool.release(a);
        assert_eq!(pool.capacity(), 2);
    }

    #[test]
    fn initial_size_prefills_free_slots() {
        let mut pool = BatchPool::new(descriptors(), 1, 2);
        pool.initial_size(5);
        assert_eq!(pool.capacity(), 5);
        for _ in 0..5 {
            pool.allocate();
        }
        assert_eq!(pool.capacity(), 5);
        pool.allocate();
        assert_eq!(pool.capacity(), 7);
    }
}
