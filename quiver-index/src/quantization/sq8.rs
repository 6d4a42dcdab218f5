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

//! SQ8 scalar quantization: per-dimension affine mapping onto u8.
//!
//! Training scans the base matrix for per-dimension (min, max) and stores
//! `offset[j] = min_j`, `scale[j] = (max_j - min_j) / 255`. Distances run
//! directly in code space (u8 kernels); the per-element reconstruction
//! error is at most one quantization step, and an optional companion FP32
//! quantizer restores exact ordering at reorder time.

use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use quiver_core::error::{check_dim, QuiverError, Result};
use quiver_core::memory::{align_up, AlignedBlock};

use crate::distance::{Metric, U8CodeComputer};
use crate::pool::{LinearPool, Neighbor};
use crate::prefetch::prefetch_lines;
use crate::quantization::{AlignedBytes, Fp32Quantizer, Fp32State, Quantizer};

/// Row padding in byte lanes.
const ALIGN_LANES: usize = 16;

pub struct Sq8Quantizer {
    d: usize,
    d_align: usize,
    n: usize,
    metric: Metric,
    scale: Vec<f32>,
    offset: Vec<f32>,
    codes: Option<AlignedBlock>,
    computer: U8CodeComputer,
    reorder_quantizer: Option<Box<Fp32Quantizer>>,
}

/// Serializable snapshot (raw padded code rows plus the affine parameters).
#[derive(Serialize, Deserialize)]
pub struct Sq8State {
    pub metric: Metric,
    pub dim: usize,
    pub n: usize,
    pub scale: Vec<f32>,
    pub offset: Vec<f32>,
    pub codes: Vec<u8>,
    pub reorder: Option<Fp32State>,
}

impl Sq8Quantizer {
    pub fn new(metric: Metric, dim: usize, with_reorder: bool) -> Self {
        let d_align = align_up(dim, ALIGN_LANES);
        Self {
            d: dim,
            d_align,
            n: 0,
            metric,
            scale: vec![1.0; d_align],
            offset: vec![0.0; d_align],
            codes: None,
            computer: U8CodeComputer::new(metric),
            reorder_quantizer: with_reorder.then(|| Box::new(Fp32Quantizer::new(metric, dim))),
        }
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    #[inline]
    pub fn code(&self, index: usize) -> &[u8] {
        debug_assert!(index < self.n);
        match &self.codes {
            Some(block) => {
                let base = index * self.d_align;
                &block.as_slice()[base..base + self.d_align]
            }
            None => &[],
        }
    }

    /// Affine-encode one row, clamping into [0, 255].
    pub fn encode(&self, input: &[f32], output: &mut [u8]) {
        for j in 0..self.d {
            let normalized = (input[j] - self.offset[j]) / self.scale[j];
            output[j] = normalized.clamp(0.0, 255.0).round() as u8;
        }
        output[self.d..self.d_align].fill(0);
    }

    /// Reconstruct the logical dimensions from a code row.
    pub fn decode(&self, code: &[u8], output: &mut [f32]) {
        for j in 0..self.d {
            output[j] = code[j] as f32 * self.scale[j] + self.offset[j];
        }
    }

    /// Symmetric code/code distance.
    #[inline]
    pub fn compute_distance(&self, a: &[u8], b: &[u8]) -> f32 {
        self.computer.compute(a, b)
    }

    /// Distance between an encoded query and an arbitrary code row.
    #[inline]
    pub fn query_distance_code(&self, query: &AlignedBytes, code: &[u8]) -> f32 {
        self.computer.compute(query.as_slice(), code)
    }

    pub fn scale(&self) -> &[f32] {
        &self.scale
    }

    pub fn offset(&self) -> &[f32] {
        &self.offset
    }

    pub fn state(&self) -> Sq8State {
        let mut codes = vec![0u8; self.n * self.d_align];
        for i in 0..self.n {
            codes[i * self.d_align..(i + 1) * self.d_align].copy_from_slice(self.code(i));
        }
        Sq8State {
            metric: self.metric,
            dim: self.d,
            n: self.n,
            scale: self.scale.clone(),
            offset: self.offset.clone(),
            codes,
            reorder: self.reorder_quantizer.as_ref().map(|q| q.state()),
        }
    }

    pub fn from_state(state: &Sq8State) -> Result<Self> {
        let mut quantizer = Self::new(state.metric, state.dim, false);
        if state.scale.len() != quantizer.d_align
            || state.offset.len() != quantizer.d_align
            || state.codes.len() != state.n * quantizer.d_align
        {
            return Err(QuiverError::Serialization(
                "SQ8 state shape does not match its dimensions".to_string(),
            ));
        }
        quantizer.scale = state.scale.clone();
        quantizer.offset = state.offset.clone();
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
        let state: Sq8State = bincode::deserialize_from(reader)
            .map_err(|e| QuiverError::Serialization(e.to_string()))?;
        Self::from_state(&state)
    }
}

impl Quantizer for Sq8Quantizer {
    type QueryCode = AlignedBytes;

    fn train(&mut self, data: &[f32], n: usize, dim: usize) -> Result<()> {
        check_dim(self.d, dim)?;
        if n == 0 || data.len() != n * dim {
            return Err(QuiverError::InvalidArgument(format!(
                "base matrix of {} floats does not hold {n} x {dim} rows",
                data.len()
            )));
        }

        let mut min_vals = vec![f32::INFINITY; dim];
        let mut max_vals = vec![f32::NEG_INFINITY; dim];
        for row in data.chunks_exact(dim) {
            for (j, &value) in row.iter().enumerate() {
                min_vals[j] = min_vals[j].min(value);
                max_vals[j] = max_vals[j].max(value);
            }
        }
        for j in 0..dim {
            self.offset[j] = min_vals[j];
            let range = max_vals[j] - min_vals[j];
            self.scale[j] = if range == 0.0 { 1.0 } else { range / 255.0 };
        }
        for j in dim..self.d_align {
            self.offset[j] = 0.0;
            self.scale[j] = 1.0;
        }

        let mut block = AlignedBlock::zeroed_huge(n * self.d_align)?;
        {
            let codes = block.as_mut_slice();
            for i in 0..n {
                let row = &data[i * dim..(i + 1) * dim];
                self.encode(row, &mut codes[i * self.d_align..(i + 1) * self.d_align]);
            }
        }
        self.codes = Some(block);
        self.n = n;

        if let Some(reorder) = self.reorder_quantizer.as_mut() {
            reorder.train(data, n, dim)?;
        }
        debug!(n, dim, "SQ8 quantizer trained");
        Ok(())
    }

    fn encode_query(&self, query: &[f32]) -> Result<AlignedBytes> {
        let mut buffer = AlignedBytes::zeroed(self.d_align)?;
        self.encode(query, buffer.as_mut_slice());
        Ok(buffer)
    }

    #[inline]
    fn query_distance(&self, query: &AlignedBytes, index: u32) -> f32 {
        self.computer.compute(query.as_slice(), self.code(index as usize))
    }

    fn reorder(&self, pool: &LinearPool, query: &[f32], dst: &mut [i32], k: usize) {
        let Some(reorder) = self.reorder_quantizer.as_ref() else {
            for (i, slot) in dst.iter_mut().take(k).enumerate() {
                *slot = if i < pool.len() { pool.id(i) as i32 } else { -1 };
            }
            return;
        };
        let Ok(qcode) = reorder.encode_query(query) else {
            // reorder is best-effort; fall back to pool order
            for (i, slot) in dst.iter_mut().take(k).enumerate() {
                *slot = if i < pool.len() { pool.id(i) as i32 } else { -1 };
            }
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
        self.d_align
    }

    fn dimension(&self) -> usize {
        self.d
    }

    fn name(&self) -> &'static str {
        "SQ8Quantizer"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Vec<f32> {
        vec![
            0.0, -1.0, 10.0, //
            1.0, 0.0, 20.0, //
            2.0, 1.0, 30.0, //
            0.5, -0.5, 25.0,
        ]
    }

    fn trained(with_reorder: bool) -> Sq8Quantizer {
        let mut quantizer = Sq8Quantizer::new(Metric::L2, 3, with_reorder);
        quantizer.train(&base(), 4, 3).unwrap();
        quantizer
    }

    #[test]
    fn test_training_parameters() {
        let quantizer = trained(false);
        assert_eq!(quantizer.offset()[0], 0.0);
        assert_eq!(quantizer.offset()[1], -1.0);
        assert!((quantizer.scale()[0] - 2.0 / 255.0).abs() < 1e-7);
        assert!((quantizer.scale()[2] - 20.0 / 255.0).abs() < 1e-7);
        // padding dims are identity
        assert_eq!(quantizer.scale()[3], 1.0);
        assert_eq!(quantizer.offset()[3], 0.0);
    }

    #[test]
    fn test_zero_range_dimension() {
        let data = vec![5.0, 1.0, 5.0, 2.0]; // dim 0 constant
        let mut quantizer = Sq8Quantizer::new(Metric::L2, 2, false);
        quantizer.train(&data, 2, 2).unwrap();
        assert_eq!(quantizer.scale()[0], 1.0);
        assert_eq!(quantizer.code(0)[0], 0);
        assert_eq!(quantizer.code(1)[0], 0);
    }

    #[test]
    fn test_decode_error_within_one_step() {
        let quantizer = trained(false);
        let data = base();
        let mut decoded = [0.0f32; 3];
        for i in 0..4 {
            quantizer.decode(quantizer.code(i), &mut decoded);
            for j in 0..3 {
                let err = (decoded[j] - data[i * 3 + j]).abs();
                assert!(
                    err <= quantizer.scale()[j],
                    "row {i} dim {j}: error {err} exceeds scale {}",
                    quantizer.scale()[j]
                );
            }
        }
    }

    #[test]
    fn test_re_encoding_is_stable() {
        let quantizer = trained(false);
        let data = base();
        for i in 0..4 {
            let mut encoded = vec![0u8; quantizer.code_size()];
            quantizer.encode(&data[i * 3..(i + 1) * 3], &mut encoded);
            assert_eq!(&encoded[..], quantizer.code(i));
        }
    }

    #[test]
    fn test_query_distance_prefers_own_row() {
        let quantizer = trained(false);
        let data = base();
        let query = &data[3..6]; // row 1
        let qcode = quantizer.encode_query(query).unwrap();
        let own = quantizer.query_distance(&qcode, 1);
        for other in [0u32, 2, 3] {
            assert!(own < quantizer.query_distance(&qcode, other));
        }
        assert_eq!(own, quantizer.query_distance_code(&qcode, quantizer.code(1)));
    }

    #[test]
    fn test_reorder_uses_exact_distances() {
        let quantizer = trained(true);
        let data = base();
        let query = &data[0..3];

        let mut pool = LinearPool::new(4, 4);
        // seed the pool in deliberately wrong order
        pool.insert(2, 0.1);
        pool.insert(0, 0.2);
        pool.insert(3, 0.3);

        let mut dst = [0i32; 4];
        quantizer.reorder(&pool, query, &mut dst, 4);
        assert_eq!(dst[0], 0); // exact distance puts the true row first
        assert_eq!(dst[3], -1);
    }

    #[test]
    fn test_state_round_trip() {
        let quantizer = trained(true);
        let restored = Sq8Quantizer::from_state(&quantizer.state()).unwrap();
        assert_eq!(restored.code(2), quantizer.code(2));
        assert_eq!(restored.scale(), quantizer.scale());
        assert!(restored.reorder_quantizer.is_some());
    }
}
