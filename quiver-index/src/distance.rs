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

//! Metric-Aware Distance Computers
//!
//! Thin wrappers binding a [`Metric`] to the dispatched kernels so that
//! every metric yields a *distance* (smaller is better): inner product is
//! returned as `1 - <a, b>` and cosine as `1 - cos(a, b)`. The pool and the
//! search loop then order candidates uniformly, whatever the metric.
//!
//! For quantization codes the inner-product and cosine paths compute
//! `1 - <q̂, x̂>` directly in integer code space; the approximation error is
//! bounded by the quantization step and a higher-precision reorder pass
//! restores the final ordering.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use quiver_core::error::QuiverError;

use crate::simd;

/// Distance metric over the base vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    /// Squared Euclidean distance.
    L2,
    /// Inner product, surfaced as `1 - <a, b>`.
    InnerProduct,
    /// Cosine distance `1 - cos(a, b)`.
    Cosine,
}

impl Metric {
    pub fn name(&self) -> &'static str {
        match self {
            Metric::L2 => "L2",
            Metric::InnerProduct => "IP",
            Metric::Cosine => "Cosine",
        }
    }
}

impl FromStr for Metric {
    type Err = QuiverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "L2" | "l2" => Ok(Metric::L2),
            "IP" | "ip" => Ok(Metric::InnerProduct),
            "Cosine" | "cosine" | "COSINE" => Ok(Metric::Cosine),
            other => Err(QuiverError::InvalidArgument(format!(
                "unknown metric {other:?} (expected L2, IP or Cosine)"
            ))),
        }
    }
}

/// Distance computer over f32 vectors (raw or FP32 codes).
#[derive(Debug, Clone, Copy)]
pub struct F32Computer {
    metric: Metric,
}

impl F32Computer {
    pub fn new(metric: Metric) -> Self {
        Self { metric }
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn name(&self) -> &'static str {
        self.metric.name()
    }

    #[inline]
    pub fn compute(&self, a: &[f32], b: &[f32]) -> f32 {
        match self.metric {
            Metric::L2 => simd::l2sqr_f32(a, b),
            Metric::InnerProduct => 1.0 - simd::ip_f32(a, b),
            Metric::Cosine => simd::cosine_f32(a, b),
        }
    }
}

/// Distance computer over 8-bit quantization codes.
#[derive(Debug, Clone, Copy)]
pub struct U8CodeComputer {
    metric: Metric,
}

impl U8CodeComputer {
    pub fn new(metric: Metric) -> Self {
        Self { metric }
    }

    pub fn name(&self) -> &'static str {
        self.metric.name()
    }

    #[inline]
    pub fn compute(&self, a: &[u8], b: &[u8]) -> f32 {
        match self.metric {
            Metric::L2 => simd::l2sqr_u8(a, b),
            // code-space inner product; reorder restores the exact ordering
            Metric::InnerProduct | Metric::Cosine => 1.0 - simd::ip_u8(a, b),
        }
    }
}

/// Distance computer over packed 4-bit quantization codes.
#[derive(Debug, Clone, Copy)]
pub struct U4CodeComputer {
    metric: Metric,
    lanes: usize,
}

impl U4CodeComputer {
    pub fn new(metric: Metric, lanes: usize) -> Self {
        Self { metric, lanes }
    }

    pub fn name(&self) -> &'static str {
        self.metric.name()
    }

    #[inline]
    pub fn compute(&self, a: &[u8], b: &[u8]) -> f32 {
        match self.metric {
            Metric::L2 => simd::l2sqr_u4(a, b, self.lanes),
            Metric::InnerProduct | Metric::Cosine => 1.0 - simd::ip_u4(a, b, self.lanes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_parse() {
        assert_eq!("L2".parse::<Metric>().unwrap(), Metric::L2);
        assert_eq!("IP".parse::<Metric>().unwrap(), Metric::InnerProduct);
        assert_eq!("Cosine".parse::<Metric>().unwrap(), Metric::Cosine);
        assert!("hamming".parse::<Metric>().is_err());
    }

    #[test]
    fn test_l2_computer() {
        let computer = F32Computer::new(Metric::L2);
        let a = [0.0f32, 0.0];
        let b = [3.0f32, 4.0];
        assert!((computer.compute(&a, &b) - 25.0).abs() < 1e-6);
        assert_eq!(computer.compute(&a, &a), 0.0);
    }

    #[test]
    fn test_ip_is_a_distance() {
        let computer = F32Computer::new(Metric::InnerProduct);
        let q = [1.0f32, 0.0];
        let close = [0.9f32, 0.1];
        let far = [0.1f32, 0.9];
        // larger inner product must map to smaller distance
        assert!(computer.compute(&q, &close) < computer.compute(&q, &far));
    }

    #[test]
    fn test_cosine_computer() {
        let computer = F32Computer::new(Metric::Cosine);
        let a = [2.0f32, 0.0];
        let b = [0.0f32, 5.0];
        assert!(computer.compute(&a, &a).abs() < 1e-6);
        assert!((computer.compute(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_u8_ordering_matches_float_ordering() {
        let computer = U8CodeComputer::new(Metric::L2);
        let q = [10u8, 10, 10, 10];
        let near = [12u8, 9, 10, 11];
        let far = [200u8, 1, 90, 10];
        assert!(computer.compute(&q, &near) < computer.compute(&q, &far));
    }

    #[test]
    fn test_u4_ip_distance() {
        let computer = U4CodeComputer::new(Metric::InnerProduct, 2);
        // lane0 = 3, lane1 = 2 -> ip with itself = 9 + 4
        let code = [0x23u8];
        assert!((computer.compute(&code, &code) - (1.0 - 13.0)).abs() < 1e-6);
    }
}
