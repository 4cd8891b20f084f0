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

//! Implementation of the Apache Arrow DataFusion execution plan
//! [`CompressedChunkScanExec`] and its corresponding stream
//! [`CompressedChunkScanStream`], which reconstruct decompressed tuples
//! from compressed segments read from a child scan, optionally merging
//! across segments to satisfy a downstream `ORDER BY`.

use std::any::Any;
use std::fmt::{self, Formatter};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::task::{Context as StdTaskContext, Poll};

use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use datafusion::arrow::datatypes::SchemaRef;
use datafusion::error::{DataFusionError, Result};
use datafusion::execution::context::TaskContext;
use datafusion::physical_expr::expressions::Column;
use datafusion::physical_expr::{EquivalenceProperties, PhysicalSortExpr};
use datafusion::physical_plan::metrics::{BaselineMetrics, ExecutionPlanMetricsSet, MetricsSet};
use datafusion::physical_plan::{
    DisplayAs, DisplayFormatType, Distribution, ExecutionPlan, Partitioning,
    RecordBatchStream, SendableRecordBatchStream, Statistics,
};
use datafusion::scalar::ScalarValue;
use futures::stream::{Stream, StreamExt};
use segmerge_common::{
    build_column_descriptors, num_output_columns, output_schema, CodecRegistry, ColumnDescriptor,
    CoreError, Direction,
};
use tracing::debug;

use super::batch_state::{peek_row_count, BatchState};
use super::merge_driver::MergeDriver;
use super::ScanConfig;

/// Build the list of input-column names that line up 1:1 with the
/// descriptors `build_column_descriptors` returns, by applying the same
/// "skip zero entries" filter to `column_names`.
fn filtered_field_names(decompression_map: &[i32], column_names: &[String]) -> Vec<String> {
    decompression_map
        .iter()
        .zip(column_names)
        .filter(|(&attno, _)| attno != 0)
        .map(|(_, name)| name.clone())
        .collect()
}

/// An execution plan that reconstructs decompressed tuples from the
/// compressed segments read from its input, optionally k-way merging them
/// into a single globally ordered stream.
#[derive(Clone)]
pub struct CompressedChunkScanExec {
    schema: SchemaRef,
    config: ScanConfig,
    descriptors: Arc<Vec<ColumnDescriptor>>,
    codecs: Arc<CodecRegistry>,
    physical_ordering: Option<Vec<PhysicalSortExpr>>,
    input: Arc<dyn ExecutionPlan>,
    initial_batch_capacity: usize,
    heap_default_capacity: usize,
    metrics: ExecutionPlanMetricsSet,
    cancellation: Arc<AtomicBool>,
}

impl fmt::Debug for CompressedChunkScanExec {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressedChunkScanExec")
            .field("merge_enabled", &self.config.merge_enabled)
            .field("chunk_relid", &self.config.chunk_relid)
            .finish()
    }
}

impl CompressedChunkScanExec {
    /// Build the operator. `column_names`/`column_types` describe the
    /// input (compressed) tuple position-for-position with
    /// `config.decompression_map`; `segment_by_columns` is the
    /// catalog-derived classification `§4.1` needs.
    #[allow(clippy::too_many_arguments)]
    pub fn try_new(
        config: ScanConfig,
        column_names: Vec<String>,
        column_types: Vec<arrow::datatypes::DataType>,
        segment_by_columns: std::collections::BTreeSet<String>,
        codecs: Arc<CodecRegistry>,
        input: Arc<dyn ExecutionPlan>,
        initial_batch_capacity: usize,
        heap_default_capacity: usize,
    ) -> std::result::Result<Arc<Self>, CoreError> {
        if config.merge_enabled != !config.sort_keys.is_empty() {
            return Err(CoreError::SortKeyMergeMismatch {
                merge_enabled: config.merge_enabled,
                sort_key_count: config.sort_keys.len(),
            });
        }

        // `§4.6` requires that a system column surviving projection
        // rewriting down to a materialized (non-zero `decompression_map`
        // entry) position be rejected rather than silently decoded as if it
        // were an ordinary compressed column; see DESIGN.md for why this
        // crate rejects rather than rewrites `tableoid` to a literal.
        for (&attno, name) in config.decompression_map.iter().zip(column_names.iter()) {
            if attno != 0 && name == "tableoid" {
                return Err(CoreError::UnsupportedSystemColumn(name.clone()));
            }
        }

        let descriptors = build_column_descriptors(
            &config.decompression_map,
            &column_names,
            &column_types,
            &segment_by_columns,
        )?;
        let field_names = filtered_field_names(&config.decompression_map, &column_names);
        let schema = output_schema(&descriptors, &field_names);

        let physical_ordering = if config.merge_enabled {
            let mut exprs = Vec::with_capacity(config.sort_keys.len());
            for key in &config.sort_keys {
                let descriptor_index = descriptors
                    .iter()
                    .position(|d| d.output_attno == key.output_attno)
                    .ok_or(CoreError::UnknownNegativeAttno(key.output_attno))?;
                let name = &field_names[descriptor_index];
                let index = schema
                    .index_of(name)
                    .map_err(|e| CoreError::Codec(format!("output schema missing {name}: {e}")))?;
                exprs.push(PhysicalSortExpr {
                    expr: Arc::new(Column::new(name, index)),
                    options: key.options,
                });
            }
            Some(exprs)
        } else {
            None
        };

        Ok(Arc::new(Self {
            schema,
            config,
            descriptors: Arc::new(descriptors),
            codecs,
            physical_ordering,
            input,
            initial_batch_capacity,
            heap_default_capacity,
            metrics: ExecutionPlanMetricsSet::new(),
            cancellation: Arc::new(AtomicBool::new(false)),
        }))
    }

    /// Requests cancellation of every stream this plan has produced or will
    /// produce (`§5` "Cancellation & timeouts"). Takes effect on the next
    /// `poll_next` of each stream sharing this plan's `cancellation` flag.
    pub fn cancel(&self) {
        self.cancellation.store(true, AtomicOrdering::Relaxed);
    }
}

#[async_trait]
impl ExecutionPlan for CompressedChunkScanExec {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn output_partitioning(&self) -> Partitioning {
        self.input.output_partitioning()
    }

    fn output_ordering(&self) -> Option<&[PhysicalSortExpr]> {
        self.physical_ordering.as_deref()
    }

    fn children(&self) -> Vec<Arc<dyn ExecutionPlan>> {
        vec![self.input.clone()]
    }

    fn with_new_children(
        self: Arc<Self>,
        children: Vec<Arc<dyn ExecutionPlan>>,
    ) -> Result<Arc<dyn ExecutionPlan>> {
        if children.len() != 1 {
            return Err(DataFusionError::Plan(format!(
                "CompressedChunkScanExec requires exactly one child, got {}.",
                children.len()
            )));
        }
        Ok(Arc::new(Self {
            schema: self.schema.clone(),
            config: self.config.clone(),
            descriptors: self.descriptors.clone(),
            codecs: self.codecs.clone(),
            physical_ordering: self.physical_ordering.clone(),
            input: children[0].clone(),
            initial_batch_capacity: self.initial_batch_capacity,
            heap_default_capacity: self.heap_default_capacity,
            metrics: ExecutionPlanMetricsSet::new(),
            cancellation: self.cancellation.clone(),
        }))
    }

    /// Build the stream that drives `§4.6`'s `begin`: loads the child
    /// stream, and (in merge mode) defers opening any `BatchState` until
    /// the child stream has been fully collected. Calling `execute` again
    /// for the same plan is `rescan`: a fresh stream, discarding whatever
    /// heap/pool state a prior stream built up.
    fn execute(
        &self,
        partition: usize,
        task_context: Arc<TaskContext>,
    ) -> Result<SendableRecordBatchStream> {
        let batch_size = task_context.session_config().batch_size();
        let input = self.input.execute(partition, task_context)?;

        debug!(
            chunk_relid = self.config.chunk_relid,
            merge_enabled = self.config.merge_enabled,
            "executing compressed chunk scan"
        );

        Ok(Box::pin(CompressedChunkScanStream::new(
            self.schema.clone(),
            self.config.clone(),
            self.descriptors.clone(),
            self.codecs.clone(),
            input,
            batch_size,
            self.initial_batch_capacity,
            self.heap_default_capacity,
            self.cancellation.clone(),
            BaselineMetrics::new(&self.metrics, partition),
        )))
    }

    fn statistics(&self) -> Result<Statistics, DataFusionError> {
        Ok(Statistics::new_unknown(&self.schema))
    }

    /// Merge mode needs to see every compressed segment of the chunk to
    /// build one globally ordered stream, so it requires its input
    /// collapsed to a single partition. Non-merge mode has no such
    /// requirement; each partition streams independently.
    fn required_input_distribution(&self) -> Vec<Distribution> {
        if self.config.merge_enabled {
            vec![Distribution::SinglePartition]
        } else {
            vec![Distribution::UnspecifiedDistribution]
        }
    }

    fn equivalence_properties(&self) -> EquivalenceProperties {
        match &self.physical_ordering {
            Some(ordering) => {
                EquivalenceProperties::new_with_orderings(self.schema(), &[ordering.clone()])
            }
            None => EquivalenceProperties::new(self.schema()),
        }
    }

    fn metrics(&self) -> Option<MetricsSet> {
        Some(self.metrics.clone_inner())
    }
}

impl DisplayAs for CompressedChunkScanExec {
    fn fmt_as(&self, _t: DisplayFormatType, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CompressedChunkScanExec: Per segment merge append = {}",
            self.config.merge_enabled
        )
    }
}

enum Inner {
    /// Merge mode, before the child stream has been fully drained.
    CollectingForMerge { collected: Vec<RecordBatch> },
    Merged(MergeDriver),
    NonMerge {
        state: BatchState,
        source: Option<RecordBatch>,
        row: usize,
    },
    Done,
}

/// A stream that reads batches of compressed segments from the input
/// stream, decompresses them (merging across segments when configured),
/// and returns batches of decoded tuples.
struct CompressedChunkScanStream {
    schema: SchemaRef,
    config: ScanConfig,
    descriptors: Arc<Vec<ColumnDescriptor>>,
    codecs: Arc<CodecRegistry>,
    input: SendableRecordBatchStream,
    batch_size: usize,
    initial_batch_capacity: usize,
    heap_default_capacity: usize,
    inner: Inner,
    pending_rows: Vec<Vec<ScalarValue>>,
    /// An error encountered mid-`poll_next` is stashed here instead of being
    /// returned immediately, so that rows already decoded into
    /// `pending_rows` earlier in the same call are delivered to the
    /// consumer first; this is returned on the following poll, once
    /// `pending_rows` has drained.
    pending_error: Option<CoreError>,
    cancellation: Arc<AtomicBool>,
    baseline_metrics: BaselineMetrics,
}

impl CompressedChunkScanStream {
    #[allow(clippy::too_many_arguments)]
    fn new(
        schema: SchemaRef,
        config: ScanConfig,
        descriptors: Arc<Vec<ColumnDescriptor>>,
        codecs: Arc<CodecRegistry>,
        input: SendableRecordBatchStream,
        batch_size: usize,
        initial_batch_capacity: usize,
        heap_default_capacity: usize,
        cancellation: Arc<AtomicBool>,
        baseline_metrics: BaselineMetrics,
    ) -> Self {
        let num_output = num_output_columns(&descriptors);
        let inner = if config.merge_enabled {
            Inner::CollectingForMerge {
                collected: Vec::new(),
            }
        } else {
            Inner::NonMerge {
                state: BatchState::new((*descriptors).clone(), num_output),
                source: None,
                row: 0,
            }
        };

        Self {
            schema,
            config,
            descriptors,
            codecs,
            input,
            batch_size,
            initial_batch_capacity,
            heap_default_capacity,
            inner,
            pending_rows: Vec::new(),
            pending_error: None,
            cancellation,
            baseline_metrics,
        }
    }

    fn direction(&self) -> Direction {
        if self.config.reverse {
            Direction::Reverse
        } else {
            Direction::Forward
        }
    }

    fn rows_to_record_batch(&self, rows: Vec<Vec<ScalarValue>>) -> Result<RecordBatch> {
        let num_columns = self.schema.fields().len();
        let mut columns = Vec::with_capacity(num_columns);
        for col in 0..num_columns {
            let scalars: Vec<ScalarValue> = rows.iter().map(|row| row[col].clone()).collect();
            columns.push(ScalarValue::iter_to_array(scalars)?);
        }
        Ok(RecordBatch::try_new(self.schema.clone(), columns)?)
    }

    fn emit_pending(&mut self) -> Poll<Option<Result<RecordBatch>>> {
        let take = self.pending_rows.len().min(self.batch_size.max(1));
        let rows: Vec<_> = self.pending_rows.drain(..take).collect();
        let poll = match self.rows_to_record_batch(rows) {
            Ok(batch) => Poll::Ready(Some(Ok(batch))),
            Err(e) => Poll::Ready(Some(Err(e))),
        };
        self.baseline_metrics.record_poll(poll)
    }
}

impl Stream for CompressedChunkScanStream {
    type Item = Result<RecordBatch>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut StdTaskContext<'_>,
    ) -> Poll<Option<Self::Item>> {
        if self.cancellation.load(AtomicOrdering::Relaxed) {
            return Poll::Ready(Some(Err(CoreError::Cancelled.into())));
        }

        let _timer = self.baseline_metrics.elapsed_compute().timer();

        loop {
            if self.pending_rows.len() >= self.batch_size.max(1) {
                return self.emit_pending();
            }

            let direction = self.direction();

            // Take ownership of `inner` for the duration of one step so the
            // match's bindings never overlap with reassigning `self.inner`
            // itself; every arm below puts a (possibly new) variant back.
            match std::mem::replace(&mut self.inner, Inner::Done) {
                Inner::Done => {
                    if !self.pending_rows.is_empty() {
                        return self.emit_pending();
                    }
                    if let Some(e) = self.pending_error.take() {
                        return self.baseline_metrics.record_poll(Poll::Ready(Some(Err(e.into()))));
                    }
                    return self.baseline_metrics.record_poll(Poll::Ready(None));
                }
                Inner::CollectingForMerge { mut collected } => {
                    match self.input.poll_next_unpin(cx) {
                        Poll::Ready(Some(Ok(batch))) => {
                            collected.push(batch);
                            self.inner = Inner::CollectingForMerge { collected };
                        }
                        Poll::Ready(Some(Err(e))) => {
                            self.pending_error = Some(CoreError::DataFusion(e));
                        }
                        Poll::Ready(None) => {
                            let mut driver = MergeDriver::new(
                                (*self.descriptors).clone(),
                                self.schema.fields().len(),
                                self.config.sort_keys.clone(),
                                self.codecs.clone(),
                                direction,
                                self.initial_batch_capacity,
                                self.heap_default_capacity,
                            );
                            match driver.init(&collected) {
                                Ok(()) => self.inner = Inner::Merged(driver),
                                Err(e) => self.pending_error = Some(e),
                            }
                        }
                        Poll::Pending => {
                            self.inner = Inner::CollectingForMerge { collected };
                            return Poll::Pending;
                        }
                    }
                }
                Inner::Merged(mut driver) => match driver.next_tuple() {
                    Ok(Some(row)) => {
                        self.pending_rows.push(row);
                        self.inner = Inner::Merged(driver);
                    }
                    Ok(None) => self.inner = Inner::Done,
                    Err(e) => self.pending_error = Some(e),
                },
                Inner::NonMerge {
                    mut state,
                    mut source,
                    mut row,
                } => {
                    if !state.is_open() {
                        if source.is_none()
                            || row >= source.as_ref().map(RecordBatch::num_rows).unwrap_or(0)
                        {
                            match self.input.poll_next_unpin(cx) {
                                Poll::Ready(Some(Ok(batch))) => {
                                    source = Some(batch);
                                    row = 0;
                                    self.inner = Inner::NonMerge { state, source, row };
                                    continue;
                                }
                                Poll::Ready(Some(Err(e))) => {
                                    self.pending_error = Some(CoreError::DataFusion(e));
                                    continue;
                                }
                                Poll::Ready(None) => {
                                    self.inner = Inner::Done;
                                    continue;
                                }
                                Poll::Pending => {
                                    self.inner = Inner::NonMerge { state, source, row };
                                    return Poll::Pending;
                                }
                            }
                        }

                        let source_batch = source.as_ref().expect("checked above");
                        let count = match peek_row_count(source_batch, row, &self.descriptors) {
                            Ok(c) => c,
                            Err(e) => {
                                self.pending_error = Some(e);
                                continue;
                            }
                        };
                        if count == 0 {
                            row += 1;
                            self.inner = Inner::NonMerge { state, source, row };
                            continue;
                        }
                        if let Err(e) = state.open(source_batch, row, &self.codecs, direction) {
                            self.pending_error = Some(e);
                            continue;
                        }
                        row += 1;
                    }

                    match state.decode_next() {
                        Ok(true) => {
                            self.pending_rows.push(state.output_slot().to_vec());
                            self.inner = Inner::NonMerge { state, source, row };
                        }
                        Ok(false) => {
                            state.close();
                            self.inner = Inner::NonMerge { state, source, row };
                        }
                        Err(e) => {
                            self.pending_error = Some(e);
                        }
                    }
                }
            }
        }
    }
}

impl RecordBatchStream for CompressedChunkScanStream {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}
