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

//! FP32 identity "quantizer": full-precision rows, padded to the SIMD
//! alignment. Doubles as the high-precision reorder stage for SQ8/SQ4.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use quiver_core::error::{check_dim, QuiverError, Result};
use quiver_core::memory::{align_up, AlignedBlock};

use crate::distance::{F32Computer, Metric};
use crate::pool::LinearPool;
use crate::prefetch::prefetch_lines;
use crate::quantization::{AlignedF32, Quantizer};

/// Row padding in f32 lanes.
const ALIGN_LANES: usize = 16;

pub struct Fp32Quantizer {
    d: usize,
    d_align: usize,
    n: usize,
    codes: Option<AlignedBlock>,
    computer: F32Computer,
}

/// Serializable snapshot (rows stored unpadded).
#[derive(Serialize, Deserialize)]
pub struct Fp32State {
    pub metric: Metric,
    pub dim: usize,
    pub n: usize,
    pub rows: Vec<f32>,
}

impl Fp32Quantizer {
    pub fn new(metric: Metric, dim: usize) -> Self {
        Self {
            d: dim,
            d_align: align_up(dim, ALIGN_LANES),
            n: 0,
            codes: None,
            computer: F32Computer::new(metric),
        }
    }

    pub fn metric(&self) -> Metric {
        self.computer.metric()
    }

    #[inline]
    pub fn aligned_dim(&self) -> usize {
        self.d_align
    }

    /// Stored (padded) code row `index`.
    #[inline]
    pub fn code(&self, index: usize) -> &[f32] {
        debug_assert!(index < self.n);
        match &self.codes {
            Some(block) => unsafe {
                std::slice::from_raw_parts(
                    (block.as_ptr() as *const f32).add(index * self.d_align),
                    self.d_align,
                )
            },
            None => &[],
        }
    }

    /// Copy `input` into a padded row, zeroing the alignment tail.
    pub fn encode(&self, input: &[f32], output: &mut [f32]) {
        output[..self.d].copy_from_slice(&input[..self.d]);
        output[self.d..self.d_align].fill(0.0);
    }

    /// Identity reconstruction of the logical dimensions.
    pub fn decode(&self, code: &[f32], output: &mut [f32]) {
        output[..self.d].copy_from_slice(&code[..self.d]);
    }

    /// Symmetric distance between two padded rows.
    #[inline]
    pub fn compute_distance(&self, a: &[f32], b: &[f32]) -> f32 {
        self.computer.compute(a, b)
    }

    /// Distance between an encoded query and an arbitrary padded row.
    #[inline]
    pub fn query_distance_code(&self, query: &AlignedF32, code: &[f32]) -> f32 {
        self.computer.compute(query.as_slice(), code)
    }

    pub fn state(&self) -> Fp32State {
        let mut rows = vec![0.0f32; self.n * self.d];
        for i in 0..self.n {
            self.decode(self.code(i), &mut rows[i * self.d..(i + 1) * self.d]);
        }
        Fp32State {
            metric: self.metric(),
            dim: self.d,
            n: self.n,
            rows,
        }
    }

    pub fn from_state(state: &Fp32State) -> Result<Self> {
        let mut quantizer = Self::new(state.metric, state.dim);
        quantizer.train(&state.rows, state.n, state.dim)?;
        Ok(quantizer)
    }

    pub fn save_state<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(writer, &self.state())
            .map_err(|e| QuiverError::Serialization(e.to_string()))
    }

    pub fn load_state<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let state: Fp32State = bincode::deserialize_from(reader)
            .map_err(|e| QuiverError::Serialization(e.to_string()))?;
        Self::from_state(&state)
    }
}

impl Quantizer for Fp32Quantizer {
    type QueryCode = AlignedF32;

    fn train(&mut self, data: &[f32], n: usize, dim: usize) -> Result<()> {
        check_dim(self.d, dim)?;
        if n == 0 || data.len() != n * dim {
            return Err(QuiverError::InvalidArgument(format!(
                "base matrix of {} floats does not hold {n} x {dim} rows",
                data.len()
            )));
        }

        let mut block =
            AlignedBlock::zeroed_huge(n * self.d_align * std::mem::size_of::<f32>())?;
        {
            let rows = unsafe {
                std::slice::from_raw_parts_mut(block.as_mut_ptr() as *mut f32, n * self.d_align)
            };
            for i in 0..n {
                let (src, dst) = (
                    &data[i * dim..(i + 1) * dim],
                    &mut rows[i * self.d_align..(i + 1) * self.d_align],
                );
                dst[..dim].copy_from_slice(src);
            }
        }
        self.codes = Some(block);
        self.n = n;
        debug!(n, dim, "FP32 quantizer trained");
        Ok(())
    }

    fn encode_query(&self, query: &[f32]) -> Result<AlignedF32> {
        let mut buffer = AlignedF32::zeroed(self.d_align)?;
        self.encode(query, buffer.as_mut_slice());
        Ok(buffer)
    }

    #[inline]
    fn query_distance(&self, query: &AlignedF32, index: u32) -> f32 {
        self.computer.compute(query.as_slice(), self.code(index as usize))
    }

    fn reorder(&self, pool: &LinearPool, _query: &[f32], dst: &mut [i32], k: usize) {
        for (i, slot) in dst.iter_mut().take(k).enumerate() {
            *slot = if i < pool.len() { pool.id(i) as i32 } else { -1 };
        }
    }

    #[inline]
    fn prefetch(&self, index: u32, lines: usize) {
        if (index as usize) < self.n && lines > 0 {
            prefetch_lines(self.code(index as usize).as_ptr() as *const u8, lines);
        }
    }

    fn code_size(&self) -> usize {
        self.d_align * std::mem::size_of::<f32>()
    }

    fn dimension(&self) -> usize {
        self.d
    }

    fn name(&self) -> &'static str {
        "FP32Quantizer"
    }
}
