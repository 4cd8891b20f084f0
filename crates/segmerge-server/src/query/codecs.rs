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

//! Reference decompression codecs.
//!
//! These exist only so the operator can be exercised end to end without a
//! real columnar codec library; real systems plug in their own compression
//! formats through the same `CodecRegistry` (§4.2 of the design). Both
//! codecs share one wire format:
//!
//! ```text
//! byte 0       algorithm_id
//! bytes 1..5   value count, u32 little-endian
//! [nullable]   ceil(count/8) bytes null bitmap (bit set => null)
//! payload      count * 8 bytes, one little-endian i64/f64 bit pattern per value
//! ```
//!
//! `DENSE` (`algorithm_id = 0`) omits the null bitmap; every value is
//! present. `DENSE_NULLABLE` (`algorithm_id = 1`) includes it.

use arrow::datatypes::DataType;
use datafusion::scalar::ScalarValue;
use segmerge_common::{CodecRegistry, CoreError, CoreResult, DecompressionIterator, Direction, IterStep};

/// `algorithm_id` for the no-nulls dense codec.
pub const DENSE: u8 = 0;
/// `algorithm_id` for the dense codec with a null bitmap.
pub const DENSE_NULLABLE: u8 = 1;

fn decode_scalar(data_type: &DataType, bits: u64, is_null: bool) -> CoreResult<ScalarValue> {
    if is_null {
        return Ok(match data_type {
            DataType::Int64 => ScalarValue::Int64(None),
            DataType::Float64 => ScalarValue::Float64(None),
            other => {
                return Err(CoreError::Codec(format!(
                    "reference codec does not support {other:?}"
                )))
            }
        });
    }
    Ok(match data_type {
        DataType::Int64 => ScalarValue::Int64(Some(bits as i64)),
        DataType::Float64 => ScalarValue::Float64(Some(f64::from_bits(bits))),
        other => {
            return Err(CoreError::Codec(format!(
                "reference codec does not support {other:?}"
            )))
        }
    })
}

fn parse_header(blob: &[u8]) -> CoreResult<(u8, u32, &[u8])> {
    if blob.len() < 5 {
        return Err(CoreError::Codec("blob shorter than header".to_string()));
    }
    let algorithm_id = blob[0];
    let count = u32::from_le_bytes(blob[1..5].try_into().unwrap());
    Ok((algorithm_id, count, &blob[5..]))
}

#[derive(Debug)]
struct DenseIterator {
    values: Vec<u64>,
    data_type: DataType,
    direction: Direction,
    next: usize,
}

impl DecompressionIterator for DenseIterator {
    fn try_next(&mut self) -> IterStep {
        if self.next >= self.values.len() {
            return IterStep::Done;
        }
        let idx = match self.direction {
            Direction::Forward => self.next,
            Direction::Reverse => self.values.len() - 1 - self.next,
        };
        self.next += 1;
        match decode_scalar(&self.data_type, self.values[idx], false) {
            Ok(value) => IterStep::Value(value),
            Err(_) => IterStep::Done,
        }
    }
}

#[derive(Debug)]
struct DenseNullableIterator {
    values: Vec<u64>,
    nulls: Vec<bool>,
    data_type: DataType,
    direction: Direction,
    next: usize,
}

impl DecompressionIterator for DenseNullableIterator {
    fn try_next(&mut self) -> IterStep {
        if self.next >= self.values.len() {
            return IterStep::Done;
        }
        let idx = match self.direction {
            Direction::Forward => self.next,
            Direction::Reverse => self.values.len() - 1 - self.next,
        };
        self.next += 1;
        if self.nulls[idx] {
            return IterStep::Null;
        }
        match decode_scalar(&self.data_type, self.values[idx], false) {
            Ok(value) => IterStep::Value(value),
            Err(_) => IterStep::Done,
        }
    }
}

fn open_dense(
    blob: &[u8],
    data_type: &DataType,
    direction: Direction,
) -> CoreResult<Box<dyn DecompressionIterator>> {
    let (_, count, payload) = parse_header(blob)?;
    let count = count as usize;
    if payload.len() < count * 8 {
        return Err(CoreError::Codec("dense payload truncated".to_string()));
    }
    let values = payload[..count * 8]
        .chunks_exact(8)
        .map(|chunk| u64::from_le_bytes(chunk.try_into().unwrap()))
        .collect();
    Ok(Box::new(DenseIterator {
        values,
        data_type: data_type.clone(),
        direction,
        next: 0,
    }))
}

fn open_dense_nullable(
    blob: &[u8],
    data_type: &DataType,
    direction: Direction,
) -> CoreResult<Box<dyn DecompressionIterator>> {
    let (_, count, rest) = parse_header(blob)?;
    let count = count as usize;
    let bitmap_len = (count + 7) / 8;
    if rest.len() < bitmap_len + count * 8 {
        return Err(CoreError::Codec(
            "dense-nullable payload truncated".to_string(),
        ));
    }
    let bitmap = &rest[..bitmap_len];
    let payload = &rest[bitmap_len..bitmap_len + count * 8];

    let nulls = (0..count)
        .map(|i| (bitmap[i / 8] >> (i % 8)) & 1 == 1)
        .collect();
    let values = payload
        .chunks_exact(8)
        .map(|chunk| u64::from_le_bytes(chunk.try_into().unwrap()))
        .collect();

    Ok(Box::new(DenseNullableIterator {
        values,
        nulls,
        data_type: data_type.clone(),
        direction,
        next: 0,
    }))
}

/// Register the reference codecs under both directions. Call once at
/// startup (or once per test) before opening any `BatchState`.
pub fn register_reference_codecs(registry: &mut CodecRegistry) {
    registry.register(DENSE, Direction::Forward, |blob, dt| {
        open_dense(blob, dt, Direction::Forward)
    });
    registry.register(DENSE, Direction::Reverse, |blob, dt| {
        open_dense(blob, dt, Direction::Reverse)
    });
    registry.register(DENSE_NULLABLE, Direction::Forward, |blob, dt| {
        open_dense_nullable(blob, dt, Direction::Forward)
    });
    registry.register(DENSE_NULLABLE, Direction::Reverse, |blob, dt| {
        open_dense_nullable(blob, dt, Direction::Reverse)
    });
}

/// Encode a dense (no-nulls) blob for `values` (as bit patterns, via
/// [`encode_i64`]/[`encode_f64`]). Used by tests and by `test_util` to build
/// synthetic compressed `RecordBatch`es.
pub fn encode_dense(values: &[u64]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(5 + values.len() * 8);
    blob.push(DENSE);
    blob.extend_from_slice(&(values.len() as u32).to_le_bytes());
    for value in values {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

pub fn encode_i64(value: i64) -> u64 {
    value as u64
}

pub fn encode_f64(value: f64) -> u64 {
    value.to_bits()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_forward_and_reverse_round_trip() {
        let mut registry = CodecRegistry::new();
        register_reference_codecs(&mut registry);

        let values: Vec<u64> = vec![4, 3, 2, 1].into_iter().map(encode_i64).collect();
        let blob = encode_dense(&values);

        let mut forward = registry
            .open(DENSE, Direction::Forward, &blob, &DataType::Int64)
            .unwrap();
        let mut seen = Vec::new();
        loop {
            match forward.try_next() {
                IterStep::Value(ScalarValue::Int64(Some(v))) => seen.push(v),
                IterStep::Done => break,
                other => panic!("unexpected step: {other:?}"),
            }
        }
        assert_eq!(seen, vec![4, 3, 2, 1]);

        let mut reverse = registry
            .open(DENSE, Direction::Reverse, &blob, &DataType::Int64)
            .unwrap();
        let mut seen = Vec::new();
        loop {
            match reverse.try_next() {
                IterStep::Value(ScalarValue::Int64(Some(v))) => seen.push(v),
                IterStep::Done => break,
                other => panic!("unexpected step: {other:?}"),
            }
        }
        assert_eq!(seen, vec![1, 2, 3, 4]);
    }

    #[test]
    fn unregistered_codec_is_an_error() {
        let registry = CodecRegistry::new();
        let err = registry
            .open(99, Direction::Forward, &[], &DataType::Int64)
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownCodec { algorithm_id: 99, .. }));
    }
}
