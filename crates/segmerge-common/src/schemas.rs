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

//! Arrow schema helpers shared between the operator and its tests.

use std::sync::Arc;

use arrow::datatypes::{Field, Schema, SchemaRef};

use crate::column_descriptor::ColumnDescriptor;

/// Build the output schema of a compressed-chunk scan: one field per
/// materialized `ColumnDescriptor`, in `output_attno` order.
///
/// `field_names[i]` names the descriptor at `descriptors[i]`; callers
/// typically derive both from the same planner-supplied projection.
pub fn output_schema(descriptors: &[ColumnDescriptor], field_names: &[String]) -> SchemaRef {
    debug_assert_eq!(descriptors.len(), field_names.len());

    let mut materialized: Vec<(i32, Field)> = descriptors
        .iter()
        .zip(field_names)
        .filter(|(d, _)| d.is_materialized())
        .map(|(d, name)| {
            (
                d.output_attno,
                Field::new(name, d.data_type.clone(), true),
            )
        })
        .collect();

    materialized.sort_by_key(|(attno, _)| *attno);

    Arc::new(Schema::new(
        materialized.into_iter().map(|(_, f)| f).collect::<Vec<_>>(),
    ))
}
