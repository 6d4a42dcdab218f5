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

//! Quiver Index
//!
//! In-process approximate nearest-neighbor search over dense float
//! vectors: an HNSW proximity graph navigated with SIMD-dispatched
//! distance kernels and scalar quantization (FP32 / SQ8 / SQ4) for
//! distance acceleration.
//!
//! ## Pipeline
//!
//! ```text
//! IndexBuilder ──build──> DenseGraph (+ HnswInitializer)
//!                             │
//! base matrix ──train──> Quantizer (code block)
//!                             │
//!                       AnySearcher ──search──> top-k ids
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use quiver_index::{AnySearcher, IndexBuilder, Metric, QuantLevel};
//!
//! # fn main() -> quiver_core::Result<()> {
//! let (n, dim) = (10_000, 128);
//! let base: Vec<f32> = vec![0.0; n * dim];
//!
//! let builder = IndexBuilder::new("HNSW", dim, Metric::L2, 16, 200)?;
//! let graph = builder.build(&base, n)?;
//!
//! let mut searcher = AnySearcher::new(graph, dim, Metric::L2, QuantLevel::Sq8);
//! searcher.set_data(&base, n, dim)?;
//! searcher.optimize(0);
//! searcher.set_ef(64)?;
//!
//! let ids = searcher.search_topk(&base[..dim], 10)?;
//! # let _ = ids;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod dataset;
pub mod distance;
pub mod graph;
pub mod initializer;
pub mod pool;
pub mod prefetch;
pub mod quantization;
pub mod searcher;
pub mod simd;

pub use builder::IndexBuilder;
pub use distance::{F32Computer, Metric, U4CodeComputer, U8CodeComputer};
pub use graph::{DenseGraph, GraphMetadata, EMPTY_ID};
pub use initializer::HnswInitializer;
pub use pool::{Bitset, LinearPool, Neighbor};
pub use quantization::{
    Fp32Quantizer, QuantLevel, Quantizer, Sq4Quantizer, Sq8Quantizer,
};
pub use searcher::{set_num_threads, AnySearcher, Searcher};
pub use simd::{kernels, SimdLevel};
