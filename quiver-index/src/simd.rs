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

//! SIMD Distance Kernels
//!
//! Vectorized squared-L2 and inner-product kernels over f32 arrays and over
//! 8-bit / 4-bit quantization codes, with runtime feature detection and a
//! process-wide function-pointer table published once at startup.
//!
//! ## Problem
//!
//! Graph search spends the bulk of its cycles in distance computations:
//! each popped node expands up to R = 2M neighbors, and every expansion is
//! one kernel call. Scalar loops reach ~3-4 FLOPS/cycle; packed FMA reaches
//! ~24-32 FLOPS/cycle.
//!
//! ## Dispatch
//!
//! | Level   | f32 kernels | u8 kernels | u4 kernels |
//! |---------|-------------|------------|------------|
//! | AVX-512 | native      | native     | AVX2 (L2)  |
//! | AVX2    | native      | scalar     | native (L2)|
//! | SSE4.1  | native      | scalar     | scalar     |
//! | NEON    | native      | scalar     | scalar     |
//! | Scalar  | scalar      | scalar     | scalar     |
//!
//! The 4-bit inner product has no SIMD kernel at any level; it always runs
//! through the scalar path. All kernels handle the largest whole SIMD-width
//! chunk then a scalar remainder, and agree with the scalar references
//! within 1e-5 relative error.

use std::sync::OnceLock;

use tracing::debug;

/// Detected SIMD capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimdLevel {
    /// No SIMD (scalar fallback)
    Scalar,
    /// SSE4.1 (x86_64)
    Sse41,
    /// AVX2 + FMA (x86_64)
    Avx2,
    /// AVX-512F (x86_64)
    Avx512,
    /// NEON (aarch64)
    Neon,
}

impl SimdLevel {
    /// Probe the CPU once at startup.
    #[allow(unreachable_code)]
    pub fn detect() -> Self {
        #[cfg(target_arch = "x86_64")]
        {
            if is_x86_feature_detected!("avx512f") {
                return SimdLevel::Avx512;
            }
            if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
                return SimdLevel::Avx2;
            }
            if is_x86_feature_detected!("sse4.1") {
                return SimdLevel::Sse41;
            }
            return SimdLevel::Scalar;
        }

        #[cfg(target_arch = "aarch64")]
        {
            // NEON is baseline on aarch64
            return SimdLevel::Neon;
        }

        SimdLevel::Scalar
    }

    pub fn name(&self) -> &'static str {
        match self {
            SimdLevel::Scalar => "scalar",
            SimdLevel::Sse41 => "sse4.1",
            SimdLevel::Avx2 => "avx2",
            SimdLevel::Avx512 => "avx512",
            SimdLevel::Neon => "neon",
        }
    }

    /// Width in f32 lanes.
    pub fn width(&self) -> usize {
        match self {
            SimdLevel::Scalar => 1,
            SimdLevel::Sse41 | SimdLevel::Neon => 4,
            SimdLevel::Avx2 => 8,
            SimdLevel::Avx512 => 16,
        }
    }
}

pub type F32Kernel = fn(&[f32], &[f32]) -> f32;
pub type U8Kernel = fn(&[u8], &[u8]) -> f32;
/// 4-bit kernels take the logical lane count; byte count is ceil(dim/2).
pub type U4Kernel = fn(&[u8], &[u8], usize) -> f32;

/// Function-pointer table published once per process.
pub struct KernelTable {
    pub level: SimdLevel,
    pub l2sqr_f32: F32Kernel,
    pub ip_f32: F32Kernel,
    pub l2sqr_u8: U8Kernel,
    pub ip_u8: U8Kernel,
    pub l2sqr_u4: U4Kernel,
    pub ip_u4: U4Kernel,
}

static KERNELS: OnceLock<KernelTable> = OnceLock::new();

/// The process-wide kernel table. Initialized on first use, read-only after.
pub fn kernels() -> &'static KernelTable {
    KERNELS.get_or_init(build_table)
}

fn build_table() -> KernelTable {
    let level = SimdLevel::detect();

    #[cfg(target_arch = "x86_64")]
    if level == SimdLevel::Scalar {
        tracing::warn!("no usable SIMD features detected on x86_64; distance kernels run scalar");
    }
    debug!(level = level.name(), "distance kernel dispatch");

    match level {
        #[cfg(target_arch = "x86_64")]
        SimdLevel::Avx512 => KernelTable {
            level,
            l2sqr_f32: |a, b| unsafe { l2sqr_f32_avx512(a, b) },
            ip_f32: |a, b| unsafe { ip_f32_avx512(a, b) },
            l2sqr_u8: |a, b| unsafe { l2sqr_u8_avx512(a, b) },
            ip_u8: |a, b| unsafe { ip_u8_avx512(a, b) },
            l2sqr_u4: |a, b, dim| unsafe { l2sqr_u4_avx2(a, b, dim) },
            ip_u4: ip_u4_scalar,
        },
        #[cfg(target_arch = "x86_64")]
        SimdLevel::Avx2 => KernelTable {
            level,
            l2sqr_f32: |a, b| unsafe { l2sqr_f32_avx2(a, b) },
            ip_f32: |a, b| unsafe { ip_f32_avx2(a, b) },
            l2sqr_u8: l2sqr_u8_scalar,
            ip_u8: ip_u8_scalar,
            l2sqr_u4: |a, b, dim| unsafe { l2sqr_u4_avx2(a, b, dim) },
            ip_u4: ip_u4_scalar,
        },
        #[cfg(target_arch = "x86_64")]
        SimdLevel::Sse41 => KernelTable {
            level,
            l2sqr_f32: |a, b| unsafe { l2sqr_f32_sse41(a, b) },
            ip_f32: |a, b| unsafe { ip_f32_sse41(a, b) },
            l2sqr_u8: l2sqr_u8_scalar,
            ip_u8: ip_u8_scalar,
            l2sqr_u4: l2sqr_u4_scalar,
            ip_u4: ip_u4_scalar,
        },
        #[cfg(target_arch = "aarch64")]
        SimdLevel::Neon => KernelTable {
            level,
            l2sqr_f32: |a, b| unsafe { l2sqr_f32_neon(a, b) },
            ip_f32: |a, b| unsafe { ip_f32_neon(a, b) },
            l2sqr_u8: l2sqr_u8_scalar,
            ip_u8: ip_u8_scalar,
            l2sqr_u4: l2sqr_u4_scalar,
            ip_u4: ip_u4_scalar,
        },
        _ => KernelTable {
            level: SimdLevel::Scalar,
            l2sqr_f32: l2sqr_f32_scalar,
            ip_f32: ip_f32_scalar,
            l2sqr_u8: l2sqr_u8_scalar,
            ip_u8: ip_u8_scalar,
            l2sqr_u4: l2sqr_u4_scalar,
            ip_u4: ip_u4_scalar,
        },
    }
}

// ============================================================================
// Dispatched entry points
// ============================================================================

/// Squared L2 distance between two f32 slices of equal length.
#[inline]
pub fn l2sqr_f32(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    (kernels().l2sqr_f32)(a, b)
}

/// Inner product of two f32 slices of equal length.
#[inline]
pub fn ip_f32(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    (kernels().ip_f32)(a, b)
}

/// Squared L2 distance between two u8 code slices (bytes are lanes).
#[inline]
pub fn l2sqr_u8(a: &[u8], b: &[u8]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    (kernels().l2sqr_u8)(a, b)
}

/// Inner product of two u8 code slices.
#[inline]
pub fn ip_u8(a: &[u8], b: &[u8]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    (kernels().ip_u8)(a, b)
}

/// Squared L2 distance over packed 4-bit lanes; `dim` is the lane count.
/// Low nibble of byte i is lane 2i, high nibble is lane 2i+1.
#[inline]
pub fn l2sqr_u4(a: &[u8], b: &[u8], dim: usize) -> f32 {
    debug_assert!(a.len() >= dim.div_ceil(2) && b.len() >= dim.div_ceil(2));
    (kernels().l2sqr_u4)(a, b, dim)
}

/// Inner product over packed 4-bit lanes; `dim` is the lane count.
/// Always scalar: there is no SIMD 4-bit IP kernel at any dispatch level.
#[inline]
pub fn ip_u4(a: &[u8], b: &[u8], dim: usize) -> f32 {
    debug_assert!(a.len() >= dim.div_ceil(2) && b.len() >= dim.div_ceil(2));
    (kernels().ip_u4)(a, b, dim)
}

/// Cosine distance `1 - cos(a, b)`. Zero-norm inputs map to distance 1.
#[inline]
pub fn cosine_f32(a: &[f32], b: &[f32]) -> f32 {
    let dot = ip_f32(a, b);
    let norm_a = ip_f32(a, a).sqrt();
    let norm_b = ip_f32(b, b).sqrt();
    if norm_a < 1e-10 || norm_b < 1e-10 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}

/// Cosine distance fast path for unit-norm inputs: `1 - <a, b>`.
#[inline]
pub fn cosine_unit_f32(a: &[f32], b: &[f32]) -> f32 {
    1.0 - ip_f32(a, b)
}

// ============================================================================
// Scalar references (always available; ground truth for the kernel tests)
// ============================================================================

pub fn l2sqr_f32_scalar(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let diff = x - y;
            diff * diff
        })
        .sum()
}

pub fn ip_f32_scalar(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub fn l2sqr_u8_scalar(a: &[u8], b: &[u8]) -> f32 {
    let mut res = 0.0f32;
    for i in 0..a.len() {
        let diff = a[i] as f32 - b[i] as f32;
        res += diff * diff;
    }
    res
}

pub fn ip_u8_scalar(a: &[u8], b: &[u8]) -> f32 {
    let mut res = 0.0f32;
    for i in 0..a.len() {
        res += a[i] as f32 * b[i] as f32;
    }
    res
}

#[inline]
fn nibble(codes: &[u8], lane: usize) -> f32 {
    let byte = codes[lane / 2];
    ((byte >> ((lane & 1) * 4)) & 0x0F) as f32
}

pub fn l2sqr_u4_scalar(a: &[u8], b: &[u8], dim: usize) -> f32 {
    let mut res = 0.0f32;
    for lane in 0..dim {
        let diff = nibble(a, lane) - nibble(b, lane);
        res += diff * diff;
    }
    res
}

pub fn ip_u4_scalar(a: &[u8], b: &[u8], dim: usize) -> f32 {
    let mut res = 0.0f32;
    for lane in 0..dim {
        res += nibble(a, lane) * nibble(b, lane);
    }
    res
}

// ============================================================================
// x86_64 SSE4.1 kernels
// ============================================================================

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "sse4.1")]
unsafe fn l2sqr_f32_sse41(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::x86_64::*;

    let n = a.len();
    let chunks = n / 4;
    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();
    let mut sum = _mm_setzero_ps();

    for i in 0..chunks {
        let offset = i * 4;
        let va = _mm_loadu_ps(a_ptr.add(offset));
        let vb = _mm_loadu_ps(b_ptr.add(offset));
        let diff = _mm_sub_ps(va, vb);
        sum = _mm_add_ps(sum, _mm_mul_ps(diff, diff));
    }

    let sum64 = _mm_add_ps(sum, _mm_movehl_ps(sum, sum));
    let sum32 = _mm_add_ss(sum64, _mm_shuffle_ps(sum64, sum64, 1));
    let mut result = _mm_cvtss_f32(sum32);

    for i in (chunks * 4)..n {
        let diff = *a.get_unchecked(i) - *b.get_unchecked(i);
        result += diff * diff;
    }

    result
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "sse4.1")]
unsafe fn ip_f32_sse41(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::x86_64::*;

    let n = a.len();
    let chunks = n / 4;
    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();
    let mut sum = _mm_setzero_ps();

    for i in 0..chunks {
        let offset = i * 4;
        let va = _mm_loadu_ps(a_ptr.add(offset));
        let vb = _mm_loadu_ps(b_ptr.add(offset));
        sum = _mm_add_ps(sum, _mm_mul_ps(va, vb));
    }

    let sum64 = _mm_add_ps(sum, _mm_movehl_ps(sum, sum));
    let sum32 = _mm_add_ss(sum64, _mm_shuffle_ps(sum64, sum64, 1));
    let mut result = _mm_cvtss_f32(sum32);

    for i in (chunks * 4)..n {
        result += *a.get_unchecked(i) * *b.get_unchecked(i);
    }

    result
}

// ============================================================================
// x86_64 AVX2 kernels
// ============================================================================

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2", enable = "fma")]
unsafe fn l2sqr_f32_avx2(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::x86_64::*;

    let n = a.len();
    let chunks = n / 8;
    let chunks4 = chunks / 4;
    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    // 4 accumulators to hide FMA latency
    let mut sum0 = _mm256_setzero_ps();
    let mut sum1 = _mm256_setzero_ps();
    let mut sum2 = _mm256_setzero_ps();
    let mut sum3 = _mm256_setzero_ps();

    for i in 0..chunks4 {
        let base = i * 32;

        let va0 = _mm256_loadu_ps(a_ptr.add(base));
        let vb0 = _mm256_loadu_ps(b_ptr.add(base));
        let diff0 = _mm256_sub_ps(va0, vb0);
        sum0 = _mm256_fmadd_ps(diff0, diff0, sum0);

        let va1 = _mm256_loadu_ps(a_ptr.add(base + 8));
        let vb1 = _mm256_loadu_ps(b_ptr.add(base + 8));
        let diff1 = _mm256_sub_ps(va1, vb1);
        sum1 = _mm256_fmadd_ps(diff1, diff1, sum1);

        let va2 = _mm256_loadu_ps(a_ptr.add(base + 16));
        let vb2 = _mm256_loadu_ps(b_ptr.add(base + 16));
        let diff2 = _mm256_sub_ps(va2, vb2);
        sum2 = _mm256_fmadd_ps(diff2, diff2, sum2);

        let va3 = _mm256_loadu_ps(a_ptr.add(base + 24));
        let vb3 = _mm256_loadu_ps(b_ptr.add(base + 24));
        let diff3 = _mm256_sub_ps(va3, vb3);
        sum3 = _mm256_fmadd_ps(diff3, diff3, sum3);
    }

    for i in (chunks4 * 4)..chunks {
        let offset = i * 8;
        let va = _mm256_loadu_ps(a_ptr.add(offset));
        let vb = _mm256_loadu_ps(b_ptr.add(offset));
        let diff = _mm256_sub_ps(va, vb);
        sum0 = _mm256_fmadd_ps(diff, diff, sum0);
    }

    let sum = _mm256_add_ps(_mm256_add_ps(sum0, sum1), _mm256_add_ps(sum2, sum3));

    // Horizontal sum
    let sum_high = _mm256_extractf128_ps(sum, 1);
    let sum_low = _mm256_castps256_ps128(sum);
    let sum128 = _mm_add_ps(sum_low, sum_high);
    let sum64 = _mm_add_ps(sum128, _mm_movehl_ps(sum128, sum128));
    let sum32 = _mm_add_ss(sum64, _mm_shuffle_ps(sum64, sum64, 1));
    let mut result = _mm_cvtss_f32(sum32);

    for i in (chunks * 8)..n {
        let diff = *a.get_unchecked(i) - *b.get_unchecked(i);
        result += diff * diff;
    }

    result
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2", enable = "fma")]
unsafe fn ip_f32_avx2(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::x86_64::*;

    let n = a.len();
    let chunks = n / 8;
    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();
    let mut sum = _mm256_setzero_ps();

    for i in 0..chunks {
        let offset = i * 8;
        let va = _mm256_loadu_ps(a_ptr.add(offset));
        let vb = _mm256_loadu_ps(b_ptr.add(offset));
        sum = _mm256_fmadd_ps(va, vb, sum);
    }

    // Horizontal sum
    let sum_high = _mm256_extractf128_ps(sum, 1);
    let sum_low = _mm256_castps256_ps128(sum);
    let sum128 = _mm_add_ps(sum_low, sum_high);
    let sum64 = _mm_add_ps(sum128, _mm_movehl_ps(sum128, sum128));
    let sum32 = _mm_add_ss(sum64, _mm_shuffle_ps(sum64, sum64, 1));
    let mut result = _mm_cvtss_f32(sum32);

    for i in (chunks * 8)..n {
        result += *a.get_unchecked(i) * *b.get_unchecked(i);
    }

    result
}

/// 4-bit L2 over both nibble planes of 16-byte blocks. Differences fit in
/// i16 and 16-bit madd pairs fit in i32 for any dim the engine supports.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn l2sqr_u4_avx2(a: &[u8], b: &[u8], dim: usize) -> f32 {
    use std::arch::x86_64::*;

    let bytes = dim / 2;
    let chunks = bytes / 16;
    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();
    let mask = _mm_set1_epi8(0x0F);
    let mut acc = _mm256_setzero_si256();

    for i in 0..chunks {
        let offset = i * 16;
        let va = _mm_loadu_si128(a_ptr.add(offset) as *const __m128i);
        let vb = _mm_loadu_si128(b_ptr.add(offset) as *const __m128i);

        let a_lo = _mm_and_si128(va, mask);
        let a_hi = _mm_and_si128(_mm_srli_epi16::<4>(va), mask);
        let b_lo = _mm_and_si128(vb, mask);
        let b_hi = _mm_and_si128(_mm_srli_epi16::<4>(vb), mask);

        let d_lo = _mm256_sub_epi16(_mm256_cvtepu8_epi16(a_lo), _mm256_cvtepu8_epi16(b_lo));
        let d_hi = _mm256_sub_epi16(_mm256_cvtepu8_epi16(a_hi), _mm256_cvtepu8_epi16(b_hi));

        acc = _mm256_add_epi32(acc, _mm256_madd_epi16(d_lo, d_lo));
        acc = _mm256_add_epi32(acc, _mm256_madd_epi16(d_hi, d_hi));
    }

    let mut lanes = [0i32; 8];
    _mm256_storeu_si256(lanes.as_mut_ptr() as *mut __m256i, acc);
    let mut result = lanes.iter().sum::<i32>() as f32;

    // Remainder lanes (partial block plus a possible odd trailing nibble)
    for lane in (chunks * 32)..dim {
        let av = ((*a.get_unchecked(lane / 2) >> ((lane & 1) * 4)) & 0x0F) as f32;
        let bv = ((*b.get_unchecked(lane / 2) >> ((lane & 1) * 4)) & 0x0F) as f32;
        let diff = av - bv;
        result += diff * diff;
    }

    result
}

// ============================================================================
// x86_64 AVX-512 kernels
// ============================================================================

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx512f")]
unsafe fn l2sqr_f32_avx512(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::x86_64::*;

    let n = a.len();
    let chunks = n / 16;
    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();
    let mut sum = _mm512_setzero_ps();

    for i in 0..chunks {
        let offset = i * 16;
        let va = _mm512_loadu_ps(a_ptr.add(offset));
        let vb = _mm512_loadu_ps(b_ptr.add(offset));
        let diff = _mm512_sub_ps(va, vb);
        sum = _mm512_fmadd_ps(diff, diff, sum);
    }

    let mut result = _mm512_reduce_add_ps(sum);

    for i in (chunks * 16)..n {
        let diff = *a.get_unchecked(i) - *b.get_unchecked(i);
        result += diff * diff;
    }

    result
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx512f")]
unsafe fn ip_f32_avx512(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::x86_64::*;

    let n = a.len();
    let chunks = n / 16;
    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();
    let mut sum = _mm512_setzero_ps();

    for i in 0..chunks {
        let offset = i * 16;
        let va = _mm512_loadu_ps(a_ptr.add(offset));
        let vb = _mm512_loadu_ps(b_ptr.add(offset));
        sum = _mm512_fmadd_ps(va, vb, sum);
    }

    let mut result = _mm512_reduce_add_ps(sum);

    for i in (chunks * 16)..n {
        result += *a.get_unchecked(i) * *b.get_unchecked(i);
    }

    result
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx512f")]
unsafe fn l2sqr_u8_avx512(a: &[u8], b: &[u8]) -> f32 {
    use std::arch::x86_64::*;

    let n = a.len();
    let chunks = n / 16;
    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();
    let mut sum = _mm512_setzero_ps();

    for i in 0..chunks {
        let offset = i * 16;
        let va8 = _mm_loadu_si128(a_ptr.add(offset) as *const __m128i);
        let vb8 = _mm_loadu_si128(b_ptr.add(offset) as *const __m128i);

        let va = _mm512_cvtepi32_ps(_mm512_cvtepu8_epi32(va8));
        let vb = _mm512_cvtepi32_ps(_mm512_cvtepu8_epi32(vb8));
        let diff = _mm512_sub_ps(va, vb);
        sum = _mm512_fmadd_ps(diff, diff, sum);
    }

    let mut result = _mm512_reduce_add_ps(sum);

    for i in (chunks * 16)..n {
        let diff = *a.get_unchecked(i) as f32 - *b.get_unchecked(i) as f32;
        result += diff * diff;
    }

    result
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx512f")]
unsafe fn ip_u8_avx512(a: &[u8], b: &[u8]) -> f32 {
    use std::arch::x86_64::*;

    let n = a.len();
    let chunks = n / 16;
    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();
    let mut sum = _mm512_setzero_ps();

    for i in 0..chunks {
        let offset = i * 16;
        let va8 = _mm_loadu_si128(a_ptr.add(offset) as *const __m128i);
        let vb8 = _mm_loadu_si128(b_ptr.add(offset) as *const __m128i);

        let va = _mm512_cvtepi32_ps(_mm512_cvtepu8_epi32(va8));
        let vb = _mm512_cvtepi32_ps(_mm512_cvtepu8_epi32(vb8));
        sum = _mm512_fmadd_ps(va, vb, sum);
    }

    let mut result = _mm512_reduce_add_ps(sum);

    for i in (chunks * 16)..n {
        result += *a.get_unchecked(i) as f32 * *b.get_unchecked(i) as f32;
    }

    result
}

// ============================================================================
// aarch64 NEON kernels
// ============================================================================

#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "neon")]
unsafe fn l2sqr_f32_neon(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::aarch64::*;

    let n = a.len();
    let chunks = n / 4;
    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();
    let mut sum = vdupq_n_f32(0.0);

    for i in 0..chunks {
        let offset = i * 4;
        let va = vld1q_f32(a_ptr.add(offset));
        let vb = vld1q_f32(b_ptr.add(offset));
        let diff = vsubq_f32(va, vb);
        sum = vfmaq_f32(sum, diff, diff);
    }

    let mut result = vaddvq_f32(sum);

    for i in (chunks * 4)..n {
        let diff = *a.get_unchecked(i) - *b.get_unchecked(i);
        result += diff * diff;
    }

    result
}

#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "neon")]
unsafe fn ip_f32_neon(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::aarch64::*;

    let n = a.len();
    let chunks = n / 4;
    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();
    let mut sum = vdupq_n_f32(0.0);

    for i in 0..chunks {
        let offset = i * 4;
        let va = vld1q_f32(a_ptr.add(offset));
        let vb = vld1q_f32(b_ptr.add(offset));
        sum = vfmaq_f32(sum, va, vb);
    }

    let mut result = vaddvq_f32(sum);

    for i in (chunks * 4)..n {
        result += *a.get_unchecked(i) * *b.get_unchecked(i);
    }

    result
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const DIMS: &[usize] = &[1, 4, 8, 16, 32, 64, 127, 128, 129, 256, 512, 1024];

    fn pseudo_vec(n: usize, seed: u64) -> Vec<f32> {
        (0..n)
            .map(|i| {
                let x = (i as u64).wrapping_mul(6364136223846793005).wrapping_add(seed);
                ((x >> 33) % 2000) as f32 / 1000.0 - 1.0
            })
            .collect()
    }

    // Values capped at 31 keep every accumulator integer-valued within f32
    // precision, so kernel-vs-reference comparisons are exact.
    fn pseudo_bytes(n: usize, seed: u64) -> Vec<u8> {
        (0..n)
            .map(|i| {
                (((i as u64).wrapping_mul(0x9E3779B97F4A7C15).wrapping_add(seed) >> 24) & 0x1F)
                    as u8
            })
            .collect()
    }

    fn assert_close(got: f32, want: f32) {
        let tol = 1e-5 * want.abs().max(1.0);
        assert!(
            (got - want).abs() <= tol,
            "got {got}, want {want} (tol {tol})"
        );
    }

    #[test]
    fn test_detection_publishes_once() {
        let level = kernels().level;
        assert_eq!(level, kernels().level);

        #[cfg(target_arch = "aarch64")]
        assert_eq!(level, SimdLevel::Neon);
    }

    #[test]
    fn test_l2sqr_f32_known_values() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [5.0, 6.0, 7.0, 8.0];
        assert_close(l2sqr_f32(&a, &b), 64.0);
        assert_close(l2sqr_f32(&a, &a), 0.0);
    }

    #[test]
    fn test_ip_f32_known_values() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [5.0, 6.0, 7.0, 8.0];
        assert_close(ip_f32(&a, &b), 70.0);
        assert_close(ip_f32(&a, &a), 30.0);
    }

    #[test]
    fn test_l2sqr_f32_matches_reference_across_dims() {
        for &dim in DIMS {
            let a = pseudo_vec(dim, 42);
            let b = pseudo_vec(dim, 123);
            assert_close(l2sqr_f32(&a, &b), l2sqr_f32_scalar(&a, &b));
        }
    }

    #[test]
    fn test_ip_f32_matches_reference_across_dims() {
        for &dim in DIMS {
            let a = pseudo_vec(dim, 7);
            let b = pseudo_vec(dim, 99);
            assert_close(ip_f32(&a, &b), ip_f32_scalar(&a, &b));
        }
    }

    #[test]
    fn test_l2_symmetry() {
        let a = pseudo_vec(129, 1);
        let b = pseudo_vec(129, 2);
        assert_close(l2sqr_f32(&a, &b), l2sqr_f32(&b, &a));
    }

    #[test]
    fn test_u8_kernels_match_reference() {
        for &dim in DIMS {
            let a = pseudo_bytes(dim, 3);
            let b = pseudo_bytes(dim, 11);
            assert_close(l2sqr_u8(&a, &b), l2sqr_u8_scalar(&a, &b));
            assert_close(ip_u8(&a, &b), ip_u8_scalar(&a, &b));
        }
    }

    #[test]
    fn test_u4_kernels_match_reference() {
        for &dim in DIMS {
            let bytes = dim.div_ceil(2);
            let mut a = pseudo_bytes(bytes, 5);
            let mut b = pseudo_bytes(bytes, 17);
            if dim % 2 == 1 {
                // trailing high nibble is padding and must be zero
                a[bytes - 1] &= 0x0F;
                b[bytes - 1] &= 0x0F;
            }
            assert_close(l2sqr_u4(&a, &b, dim), l2sqr_u4_scalar(&a, &b, dim));
            assert_close(ip_u4(&a, &b, dim), ip_u4_scalar(&a, &b, dim));
        }
    }

    #[test]
    fn test_u4_lane_order() {
        // byte 0x21 packs lane0 = 1 (low), lane1 = 2 (high)
        let a = [0x21u8];
        let b = [0x00u8];
        assert_close(l2sqr_u4(&a, &b, 2), 1.0 + 4.0);
        assert_close(ip_u4(&a, &a, 2), 1.0 + 4.0);
    }

    #[test]
    fn test_cosine() {
        let a = [1.0, 0.0, 0.0];
        let b = [0.0, 1.0, 0.0];
        assert_close(cosine_f32(&a, &a), 0.0);
        assert_close(cosine_f32(&a, &b), 1.0);

        let zero = [0.0, 0.0, 0.0];
        assert_close(cosine_f32(&a, &zero), 1.0);
    }

    #[test]
    fn test_cosine_unit_fast_path() {
        let inv = 1.0 / 2.0f32.sqrt();
        let a = [inv, inv];
        let b = [inv, -inv];
        assert_close(cosine_unit_f32(&a, &a), 0.0);
        assert_close(cosine_unit_f32(&a, &b), 1.0);
    }
}
