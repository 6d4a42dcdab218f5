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

//! Software Prefetch Hints
//!
//! Graph traversal touches neighbor rows and code rows in an order the
//! hardware prefetcher cannot predict, so the search loop issues explicit
//! prefetches a few steps ahead of each distance computation. Prefetching
//! is purely a hint: it never faults, and on platforms without an
//! instruction it compiles to nothing.

/// Cache line size in bytes.
pub const CACHE_LINE_SIZE: usize = 64;

/// Prefetch target cache level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchHint {
    /// All cache levels (L1, L2, L3); for data read in the next few steps.
    T0,
    /// L2 and higher.
    T1,
    /// L3 only; for streaming reads.
    T2,
}

/// Issue a single-line software prefetch.
#[cfg(target_arch = "x86_64")]
#[inline]
pub fn prefetch(ptr: *const u8, hint: PrefetchHint) {
    unsafe {
        use std::arch::x86_64::*;
        match hint {
            PrefetchHint::T0 => _mm_prefetch(ptr as *const i8, _MM_HINT_T0),
            PrefetchHint::T1 => _mm_prefetch(ptr as *const i8, _MM_HINT_T1),
            PrefetchHint::T2 => _mm_prefetch(ptr as *const i8, _MM_HINT_T2),
        }
    }
}

#[cfg(not(target_arch = "x86_64"))]
#[inline]
pub fn prefetch(_ptr: *const u8, _hint: PrefetchHint) {
    // No-op on non-x86 platforms
}

/// Prefetch `lines` consecutive cache lines into L1 starting at `ptr`.
#[inline]
pub fn prefetch_lines(ptr: *const u8, lines: usize) {
    for i in 0..lines {
        prefetch(ptr.wrapping_add(i * CACHE_LINE_SIZE), PrefetchHint::T0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefetch_is_a_hint() {
        // Any address is legal, including null and zero lines.
        let data = [0u8; 256];
        prefetch_lines(data.as_ptr(), 4);
        prefetch_lines(data.as_ptr(), 0);
        prefetch_lines(std::ptr::null(), 1);
        prefetch(data.as_ptr(), PrefetchHint::T2);
    }
}
