// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! SQ4 scalar quantization: one global affine mapping onto 4-bit lanes,
//! packed two per byte (low nibble = even lane, high nibble = odd lane).
//!
//! Inner-product and cosine over 4-bit codes have no SIMD kernel and run
//! through the scalar path; construction logs this once. Searches at this
//! level lean on the companion FP32 reorder for their final ordering.

use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use quiver_core::error::{check_dim, QuiverError, Result};
use quiver_core::memory::{align_up, AlignedBlock};

use crate::distance::{Metric, U4CodeComputer};
use crate::pool::{LinearPool, Neighbor};
use crate::prefetch::prefetch_lines;
use crate::quantization::{AlignedBytes, Fp32Quantizer, Fp32State, Quantizer};

/// Row padding in 4-bit lanes (keeps the byte count even).
const ALIGN_LANES: usize = 16;

pub struct Sq4Quantizer {
    d: usize,
    d_align: usize,
    n: usize,
    metric: Metric,
    scale: f32,
    offset: f32,
    codes: Option<AlignedBlock>,
    computer: U4CodeComputer,
    reorder_quantizer: Option<Box<Fp32Quantizer>>,
}

/// Serializable snapshot (raw packed code rows plus the affine parameters).
#[derive(Serialize, Deserialize)]
pub struct Sq4State {
    pub metric: Metric,
    pub dim: usize,
    pub n: usize,
    pub scale: f32,
    pub offset: f32,
    pub codes: Vec<u8>,
    pub reorder: Option<Fp32State>,
}

impl Sq4Quantizer {
    pub fn new(metric: Metric, dim: usize, with_reorder: bool) -> Self {
        if metric != Metric::L2 {
            warn!(
                metric = metric.name(),
                "no 4-bit SIMD kernel for this metric; distances use the scalar path"
            );
        }
        let d_align = align_up(dim, ALIGN_LANES);
        Self {
            d: dim,
            d_align,
            n: 0,
            metric,
            scale: 1.0,
            offset: 0.0,
            codes: None,
            computer: U4CodeComputer::new(metric, d_align),
            reorder_quantizer: with_reorder.then(|| Box::new(Fp32Quantizer::new(metric, dim))),
        }
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Bytes per packed code row.
    #[inline]
    fn stride(&self) -> usize {
        self.d_align / 2
    }

    #[inline]
    pub fn code(&self, index: usize) -> &[u8] {
        debug_assert!(index < self.n);
        match &self.codes {
            Some(block) => {
                let base = index * self.stride();
                &block.as_slice()[base..base + self.stride()]
            }
            None => &[],
        }
    }

    /// Pack one row into 4-bit lanes, clamping into [0, 15].
    pub fn encode(&self, input: &[f32], output: &mut [u8]) {
        output[..self.stride()].fill(0);
        for j in 0..self.d {
            let normalized = (input[j] - self.offset) / self.scale;
            let quantized = normalized.clamp(0.0, 15.0).round() as u8;
            if j % 2 == 0 {
                output[j / 2] |= quantized;
            } else {
                output[j / 2] |= quantized << 4;
            }
        }
    }

    /// Reconstruct the logical dimensions from a packed row.
    pub fn decode(&self, code: &[u8], output: &mut [f32]) {
        for j in 0..self.d {
            let quantized = (code[j / 2] >> ((j & 1) * 4)) & 0x0F;
            output[j] = quantized as f32 * self.scale + self.offset;
        }
    }

    /// Symmetric code/code distance.
    #[inline]
    pub fn compute_distance(&self, a: &[u8], b: &[u8]) -> f32 {
        self.computer.compute(a, b)
    }

    /// Distance between an encoded query and an arbitrary packed row.
    #[inline]
    pub fn query_distance_code(&self, query: &AlignedBytes, code: &[u8]) -> f32 {
        self.computer.compute(query.as_slice(), code)
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn offset(&self) -> f32 {
        self.offset
    }

    pub fn state(&self) -> Sq4State {
        let mut codes = vec![0u8; self.n * self.stride()];
        for i in 0..self.n {
            codes[i * self.stride()..(i + 1) * self.stride()].copy_from_slice(self.code(i));
        }
        Sq4State {
            metric: self.metric,
            dim: self.d,
            n: self.n,
            scale: self.scale,
            offset: self.offset,
            codes,
            reorder: self.reorder_quantizer.as_ref().map(|q| q.state()),
        }
    }

    pub fn from_state(state: &Sq4State) -> Result<Self> {
        let mut quantizer = Self::new(state.metric, state.dim, false);
        if state.codes.len() != state.n * quantizer.stride() {
            return Err(QuiverError::Serialization(
                "SQ4 state shape does not match its dimensions".to_string(),
            ));
        }
        quantizer.scale = state.scale;
        quantizer.offset = state.offset;
        let mut block = AlignedBlock::zeroed_huge(state.codes.len())?;
        block.as_mut_slice()[..state.codes.len()].copy_from_slice(&state.codes);
        quantizer.codes = Some(block);
        quantizer.n = state.n;
        if let Some(reorder) = &state.reorder {
            quantizer.reorder_quantizer = Some(Box::new(Fp32Quantizer::from_state(reorder)?));
        }
        Ok(quantizer)
    }

    pub fn save_state<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(writer, &self.state())
            .map_err(|e| QuiverError::Serialization(e.to_string()))
    }

    pub fn load_state<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let state: Sq4State = bincode::deserialize_from(reader)
            .map_err(|e| QuiverError::Serialization(e.to_string()))?;
        Self::from_state(&state)
    }
}

impl Quantizer for Sq4Quantizer {
    type QueryCode = AlignedBytes;

    fn train(&mut self, data: &[f32], n: usize, dim: usize) -> Result<()> {
        check_dim(self.d, dim)?;
        if n == 0 || data.len() != n * dim {
            return Err(QuiverError::InvalidArgument(format!(
                "base matrix of {} floats does not hold {n} x {dim} rows",
                data.len()
            )));
        }

        let mut min_val = f32::INFINITY;
        let mut max_val = f32::NEG_INFINITY;
        for &value in data {
            min_val = min_val.min(value);
            max_val = max_val.max(value);
        }
        self.offset = min_val;
        let range = max_val - min_val;
        self.scale = if range == 0.0 { 1.0 } else { range / 15.0 };

        let mut block = AlignedBlock::zeroed_huge(n * self.stride())?;
        {
            let codes = block.as_mut_slice();
            for i in 0..n {
                let row = &data[i * dim..(i + 1) * dim];
                self.encode(row, &mut codes[i * self.stride()..(i + 1) * self.stride()]);
            }
        }
        self.codes = Some(block);
        self.n = n;

        if let Some(reorder) = self.reorder_quantizer.as_mut() {
            reorder.train(data, n, dim)?;
        }
        debug!(n, dim, "SQ4 quantizer trained");
        Ok(())
    }

    fn encode_query(&self, query: &[f32]) -> Result<AlignedBytes> {
        let mut buffer = AlignedBytes::zeroed(self.stride())?;
        self.encode(query, buffer.as_mut_slice());
        Ok(buffer)
    }

    #[inline]
    fn query_distance(&self, query: &AlignedBytes, index: u32) -> f32 {
        self.computer.compute(query.as_slice(), self.code(index as usize))
    }

    fn reorder(&self, pool: &LinearPool, query: &[f32], dst: &mut [i32], k: usize) {
        let fallback = |dst: &mut [i32]| {
            for (i, slot) in dst.iter_mut().take(k).enumerate() {
                *slot = if i < pool.len() { pool.id(i) as i32 } else { -1 };
            }
        };
        let Some(reorder) = self.reorder_quantizer.as_ref() else {
            fallback(dst);
            return;
        };
        let Ok(qcode) = reorder.encode_query(query) else {
            fallback(dst);
            return;
        };

        let mut candidates: Vec<Neighbor> = (0..pool.len())
            .map(|i| {
                let id = pool.id(i);
                Neighbor {
                    id,
                    distance: reorder.query_distance(&qcode, id),
                }
            })
            .collect();
        candidates.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(Ordering::Equal)
        });
        for (i, slot) in dst.iter_mut().take(k).enumerate() {
            *slot = if i < candidates.len() {
                candidates[i].id as i32
            } else {
                -1
            };
        }
    }

    #[inline]
    fn prefetch(&self, index: u32, lines: usize) {
        if (index as usize) < self.n && lines > 0 {
            prefetch_lines(self.code(index as usize).as_ptr(), lines);
        }
    }

    fn code_size(&self) -> usize {
        self.d_align / 2
    }

    fn dimension(&self) -> usize {
        self.d
    }

    fn name(&self) -> &'static str {
        "SQ4Quantizer"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Vec<f32> {
        vec![
            0.0, 1.0, 2.0, //
            3.0, 4.0, 5.0, //
            15.0, 14.0, 13.0, //
            7.0, 8.0, 9.0,
        ]
    }

    fn trained() -> Sq4Quantizer {
        let mut quantizer = Sq4Quantizer::new(Metric::L2, 3, false);
        quantizer.train(&base(), 4, 3).unwrap();
        quantizer
    }

    #[test]
    fn test_global_parameters() {
        let quantizer = trained();
        assert_eq!(quantizer.offset(), 0.0);
        assert_eq!(quantizer.scale(), 1.0); // range 15 over 15 levels
    }

    #[test]
    fn test_nibble_packing() {
        let quantizer = trained();
        // row 1 = [3, 4, 5]: byte0 = 0x43, byte1 = 0x05
        let code = quantizer.code(1);
        assert_eq!(code[0], 0x43);
        assert_eq!(code[1], 0x05);
        // padding bytes stay zero
        assert!(code[2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_decode_error_within_one_step() {
        let quantizer = trained();
        let data = base();
        let mut decoded = [0.0f32; 3];
        for i in 0..4 {
            quantizer.decode(quantizer.code(i), &mut decoded);
            for j in 0..3 {
                let err = (decoded[j] - data[i * 3 + j]).abs();
                assert!(err <= quantizer.scale());
            }
        }
    }

    #[test]
    fn test_zero_range_guard() {
        let mut quantizer = Sq4Quantizer::new(Metric::L2, 2, false);
        quantizer.train(&[4.0, 4.0, 4.0, 4.0], 2, 2).unwrap();
        assert_eq!(quantizer.scale(), 1.0);
    }

    #[test]
    fn test_query_distance_prefers_own_row() {
        let quantizer = trained();
        let data = base();
        let query = &data[6..9]; // row 2
        let qcode = quantizer.encode_query(query).unwrap();
        let own = quantizer.query_distance(&qcode, 2);
        for other in [0u32, 1, 3] {
            assert!(own < quantizer.query_distance(&qcode, other));
        }
    }

    #[test]
    fn test_ip_metric_runs_scalar_path() {
        let mut quantizer = Sq4Quantizer::new(Metric::InnerProduct, 3, false);
        quantizer.train(&base(), 4, 3).unwrap();
        let qcode = quantizer.encode_query(&[15.0, 14.0, 13.0]).unwrap();
        // higher code-space inner product means smaller distance
        assert!(quantizer.query_distance(&qcode, 2) < quantizer.query_distance(&qcode, 0));
    }

    #[test]
    fn test_state_round_trip() {
        let quantizer = trained();
        let restored = Sq4Quantizer::from_state(&quantizer.state()).unwrap();
        assert_eq!(restored.code(3), quantizer.code(3));
        assert_eq!(restored.scale(), quantizer.scale());
        assert_eq!(restored.offset(), quantizer.offset());
    }
}
