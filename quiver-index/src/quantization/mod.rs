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

//! Vector Quantization
//!
//! A quantizer trains on the base matrix, owns the encoded block (one
//! 2 MiB-aligned allocation, one fixed-stride row per vector), and answers
//! distances between an encoded query and stored codes. Three variants:
//!
//! | Variant | Code          | Stride          | Parameters            |
//! |---------|---------------|-----------------|-----------------------|
//! | FP32    | f32 copy      | 4 * aligned dim | none                  |
//! | SQ8     | u8 per dim    | aligned dim     | per-dim scale/offset  |
//! | SQ4     | u4, 2 per byte| aligned dim / 2 | global scale/offset   |
//!
//! SQ8/SQ4 may carry a companion FP32 quantizer; `reorder` then re-ranks
//! the candidate pool with exact float distances before the top-k is
//! emitted, which recovers the ordering lost to quantization error.

mod fp32;
mod sq4;
mod sq8;

pub use fp32::{Fp32Quantizer, Fp32State};
pub use sq4::{Sq4Quantizer, Sq4State};
pub use sq8::{Sq8Quantizer, Sq8State};

use serde::{Deserialize, Serialize};

use quiver_core::error::{QuiverError, Result};
use quiver_core::memory::AlignedBlock;

use crate::pool::LinearPool;

/// Quantization level selector for the public API (0 = FP32, 1 = SQ8, 2 = SQ4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuantLevel {
    Fp32 = 0,
    Sq8 = 1,
    Sq4 = 2,
}

impl QuantLevel {
    pub fn from_index(index: usize) -> Result<Self> {
        match index {
            0 => Ok(QuantLevel::Fp32),
            1 => Ok(QuantLevel::Sq8),
            2 => Ok(QuantLevel::Sq4),
            other => Err(QuiverError::InvalidArgument(format!(
                "quantization level {other} out of range [0, 2]"
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            QuantLevel::Fp32 => "FP32",
            QuantLevel::Sq8 => "SQ8",
            QuantLevel::Sq4 => "SQ4",
        }
    }
}

/// The contract every quantizer satisfies. Training happens once; all
/// query-side methods are `&self` and safe to call concurrently.
pub trait Quantizer: Send + Sync {
    /// Owned, aligned encoding of one query vector.
    type QueryCode: Send + Sync;

    /// Train on the row-major base matrix and encode every row.
    fn train(&mut self, data: &[f32], n: usize, dim: usize) -> Result<()>;

    /// Encode a query into a fresh 64 B-aligned buffer.
    fn encode_query(&self, query: &[f32]) -> Result<Self::QueryCode>;

    /// Distance between the encoded query and stored code `index`.
    fn query_distance(&self, query: &Self::QueryCode, index: u32) -> f32;

    /// Emit the final top-k ids for the pool, re-ranking with a
    /// higher-precision distance when one is configured. Unfilled `dst`
    /// positions are written as -1.
    fn reorder(&self, pool: &LinearPool, query: &[f32], dst: &mut [i32], k: usize);

    /// Prefetch up to `lines` cache lines of code row `index`. No-op for
    /// out-of-range indices and `lines == 0`.
    fn prefetch(&self, index: u32, lines: usize);

    /// Bytes per stored code row.
    fn code_size(&self) -> usize;

    /// Configured (logical) dimension.
    fn dimension(&self) -> usize;

    fn name(&self) -> &'static str;
}

/// 64 B-aligned f32 query buffer.
pub struct AlignedF32 {
    block: AlignedBlock,
    len: usize,
}

impl AlignedF32 {
    pub(crate) fn zeroed(len: usize) -> Result<Self> {
        let block = AlignedBlock::zeroed_cache_aligned(len * std::mem::size_of::<f32>())?;
        Ok(Self { block, len })
    }

    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        unsafe { std::slice::from_raw_parts(self.block.as_ptr() as *const f32, self.len) }
    }

    #[inline]
    pub(crate) fn as_mut_slice(&mut self) -> &mut [f32] {
        unsafe { std::slice::from_raw_parts_mut(self.block.as_mut_ptr() as *mut f32, self.len) }
    }
}

/// 64 B-aligned byte query buffer (u8 and packed-u4 codes).
pub struct AlignedBytes {
    block: AlignedBlock,
    len: usize,
}

impl AlignedBytes {
    pub(crate) fn zeroed(len: usize) -> Result<Self> {
        let block = AlignedBlock::zeroed_cache_aligned(len)?;
        Ok(Self { block, len })
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.block.as_slice()[..self.len]
    }

    #[inline]
    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        let len = self.len;
        &mut self.block.as_mut_slice()[..len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_from_index() {
        assert_eq!(QuantLevel::from_index(0).unwrap(), QuantLevel::Fp32);
        assert_eq!(QuantLevel::from_index(1).unwrap(), QuantLevel::Sq8);
        assert_eq!(QuantLevel::from_index(2).unwrap(), QuantLevel::Sq4);
        assert!(QuantLevel::from_index(3).is_err());
    }

    #[test]
    fn test_aligned_buffers() {
        let mut floats = AlignedF32::zeroed(20).unwrap();
        assert_eq!(floats.as_slice().len(), 20);
        assert_eq!(floats.as_slice().as_ptr() as usize % 64, 0);
        floats.as_mut_slice()[19] = 1.5;
        assert_eq!(floats.as_slice()[19], 1.5);

        let bytes = AlignedBytes::zeroed(33).unwrap();
        assert_eq!(bytes.as_slice().len(), 33);
        assert_eq!(bytes.as_slice().as_ptr() as usize % 64, 0);
    }
}
