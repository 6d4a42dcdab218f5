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

//! Graph Searcher
//!
//! Binds a [`DenseGraph`] to a quantizer: build once, search many. A
//! query encodes into the quantizer's code space, seeds a bounded
//! candidate pool via the HNSW descent, then expands neighbor rows
//! best-first while prefetching the codes it is about to touch. Two
//! prefetch parameters govern the schedule:
//!
//! - `po`: how many neighbor slots ahead of the scan to prefetch,
//! - `pl`: how many cache lines of each code row to pull.
//!
//! `optimize` sweeps both over a captured sample of base vectors and
//! keeps the fastest pair. Search is `&self` and lock-free; concurrent
//! calls each carry their own pool, visited set and encoded query.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, info};

use quiver_core::error::{QuiverError, Result};

use crate::distance::Metric;
use crate::graph::{DenseGraph, EMPTY_ID};
use crate::pool::LinearPool;
use crate::quantization::{Fp32Quantizer, QuantLevel, Quantizer, Sq4Quantizer, Sq8Quantizer};

/// Process-wide worker-count hint for batch search (0 = rayon default).
static GLOBAL_NUM_THREADS: AtomicUsize = AtomicUsize::new(0);

/// Set the global thread hint consumed by `batch_search(.., threads = 0)`.
pub fn set_num_threads(n: usize) {
    GLOBAL_NUM_THREADS.store(n, Ordering::Relaxed);
}

/// Sample size captured by `set_data` for the prefetch sweep.
const OPTIMIZE_POINTS: usize = 1000;
/// Sweep bounds: po in 1..=min(TRY_POS, R), pl in 1..=min(TRY_PLS, lines).
const TRY_POS: usize = 10;
const TRY_PLS: usize = 5;
/// k used while sweeping.
const TRY_K: usize = 10;

pub struct Searcher<Q: Quantizer> {
    graph: DenseGraph,
    quantizer: Q,
    nb: usize,
    dim: usize,
    ef: usize,
    po: usize,
    pl: usize,
    graph_po: usize,
    sample_queries: Vec<f32>,
    trained: bool,
}

impl<Q: Quantizer> Searcher<Q> {
    pub fn new(graph: DenseGraph, quantizer: Q) -> Self {
        let graph_po = (graph.max_degree() / 16).max(1);
        Self {
            graph,
            quantizer,
            nb: 0,
            dim: 0,
            ef: 32,
            po: 1,
            pl: 1,
            graph_po,
            sample_queries: Vec::new(),
            trained: false,
        }
    }

    pub fn graph(&self) -> &DenseGraph {
        &self.graph
    }

    pub fn quantizer(&self) -> &Q {
        &self.quantizer
    }

    pub fn ef(&self) -> usize {
        self.ef
    }

    pub fn prefetch_params(&self) -> (usize, usize) {
        (self.po, self.pl)
    }

    /// Train the quantizer on the base matrix and capture up to 1000 base
    /// rows as the optimization sample.
    pub fn set_data(&mut self, data: &[f32], n: usize, dim: usize) -> Result<()> {
        if n != self.graph.num_nodes() {
            return Err(QuiverError::InvalidArgument(format!(
                "graph covers {} nodes but the base matrix holds {n}",
                self.graph.num_nodes()
            )));
        }
        if data.len() != n * dim {
            return Err(QuiverError::InvalidArgument(format!(
                "base matrix of {} floats does not hold {n} x {dim} rows",
                data.len()
            )));
        }

        let start = Instant::now();
        self.quantizer.train(data, n, dim)?;
        info!(
            quantizer = self.quantizer.name(),
            elapsed_s = start.elapsed().as_secs_f64(),
            "quantizer training done"
        );

        self.nb = n;
        self.dim = dim;

        let sample_count = OPTIMIZE_POINTS.min(n.saturating_sub(1));
        let mut rng = StdRng::seed_from_u64(100);
        self.sample_queries = Vec::with_capacity(sample_count * dim);
        for _ in 0..sample_count {
            let row = rng.gen_range(0..n);
            self.sample_queries
                .extend_from_slice(&data[row * dim..(row + 1) * dim]);
        }

        self.trained = true;
        Ok(())
    }

    /// Runtime beam width; pool capacity per query is `max(k, ef)`.
    pub fn set_ef(&mut self, ef: usize) -> Result<()> {
        if ef == 0 {
            return Err(QuiverError::InvalidArgument(
                "ef must be positive".to_string(),
            ));
        }
        self.ef = ef;
        Ok(())
    }

    /// Top-k search; ids land in `dst[..k]`, -1 for unfilled positions.
    pub fn search(&self, query: &[f32], k: usize, dst: &mut [i32]) -> Result<()> {
        if !self.trained {
            return Err(QuiverError::NotTrained);
        }
        if query.len() != self.dim {
            return Err(QuiverError::InvalidArgument(format!(
                "query dimension {} does not match configured {}",
                query.len(),
                self.dim
            )));
        }
        let capacity = k.max(self.ef);
        if k == 0 || k > capacity || dst.len() < k {
            return Err(QuiverError::InvalidArgument(format!(
                "k = {k} outside [1, {capacity}] or dst too small"
            )));
        }

        let qcode = self.quantizer.encode_query(query)?;
        let mut pool = LinearPool::new(self.nb, capacity);
        self.graph
            .initialize_search(&mut pool, |v| self.quantizer.query_distance(&qcode, v));
        self.search_impl(&mut pool, &qcode);
        self.quantizer.reorder(&pool, query, dst, k);
        Ok(())
    }

    /// Convenience wrapper returning the ids as a Vec.
    pub fn search_topk(&self, query: &[f32], k: usize) -> Result<Vec<i32>> {
        let mut dst = vec![-1i32; k];
        self.search(query, k, &mut dst)?;
        Ok(dst)
    }

    /// Best-first expansion of the layer-0 graph with the po/pl prefetch
    /// schedule. Deterministic for fixed (graph, quantizer, ef, po, pl, q).
    fn search_impl(&self, pool: &mut LinearPool, qcode: &Q::QueryCode) {
        let r = self.graph.max_degree();
        while pool.has_next() {
            let u = pool.pop();
            self.graph.prefetch_neighbors(u, self.graph_po);
            let row = self.graph.neighbors(u);

            for &to in row.iter().take(self.po.min(r)) {
                if to == EMPTY_ID {
                    break;
                }
                self.quantizer.prefetch(to as u32, self.pl);
            }

            for i in 0..r {
                let v = row[i];
                if v == EMPTY_ID {
                    break;
                }
                if i + self.po < r {
                    let ahead = row[i + self.po];
                    if ahead != EMPTY_ID {
                        self.quantizer.prefetch(ahead as u32, self.pl);
                    }
                }
                let v = v as u32;
                if pool.visited.get(v as usize) {
                    continue;
                }
                pool.visited.set(v as usize);
                let dist = self.quantizer.query_distance(qcode, v);
                pool.insert(v, dist);
            }
        }
    }

    /// Independent searches over `nq` queries; results row-major in the
    /// returned vec. `threads = 0` uses the global hint, then rayon's
    /// default.
    pub fn batch_search(
        &self,
        queries: &[f32],
        nq: usize,
        k: usize,
        threads: usize,
    ) -> Result<Vec<i32>> {
        if !self.trained {
            return Err(QuiverError::NotTrained);
        }
        if k == 0 {
            return Err(QuiverError::InvalidArgument(
                "k must be positive".to_string(),
            ));
        }
        if queries.len() != nq * self.dim {
            return Err(QuiverError::InvalidArgument(format!(
                "query matrix of {} floats does not hold {nq} x {} rows",
                queries.len(),
                self.dim
            )));
        }

        let threads = if threads == 0 {
            GLOBAL_NUM_THREADS.load(Ordering::Relaxed)
        } else {
            threads
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| QuiverError::InvalidArgument(e.to_string()))?;

        let dim = self.dim;
        let mut out = vec![-1i32; nq * k];
        pool.install(|| {
            out.par_chunks_mut(k)
                .enumerate()
                .try_for_each(|(i, chunk)| self.search(&queries[i * dim..(i + 1) * dim], k, chunk))
        })?;
        Ok(out)
    }

    /// Sweep (po, pl) over the captured sample and keep the fastest pair.
    /// A (1, 1) baseline is measured for the log line only.
    pub fn optimize(&mut self, threads: usize) {
        if !self.trained || self.sample_queries.is_empty() {
            debug!("optimize skipped: no sample captured");
            return;
        }
        let r = self.graph.max_degree();
        let code_lines = self.quantizer.code_size().div_ceil(64);
        let max_po = TRY_POS.min(r);
        let max_pl = TRY_PLS.min(code_lines.max(1));

        let pool = match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
            Ok(pool) => pool,
            Err(_) => return,
        };

        info!(max_po, max_pl, "starting prefetch parameter sweep");
        // warmup pass so page faults do not bias the first cell
        self.run_sample(&pool);

        let mut best = (1usize, 1usize);
        let mut best_elapsed = f64::INFINITY;
        for po in 1..=max_po {
            for pl in 1..=max_pl {
                self.po = po;
                self.pl = pl;
                let start = Instant::now();
                self.run_sample(&pool);
                let elapsed = start.elapsed().as_secs_f64();
                if elapsed < best_elapsed {
                    best_elapsed = elapsed;
                    best = (po, pl);
                }
            }
        }

        self.po = 1;
        self.pl = 1;
        let start = Instant::now();
        self.run_sample(&pool);
        let baseline = start.elapsed().as_secs_f64();

        self.po = best.0;
        self.pl = best.1;
        info!(
            po = self.po,
            pl = self.pl,
            improvement_pct = 100.0 * (baseline / best_elapsed - 1.0),
            "prefetch parameters tuned"
        );
    }

    fn run_sample(&self, pool: &rayon::ThreadPool) {
        let dim = self.dim;
        pool.install(|| {
            self.sample_queries.par_chunks(dim).for_each(|query| {
                let mut dst = [-1i32; TRY_K];
                // sample rows are valid queries by construction
                let _ = self.search(query, TRY_K, &mut dst);
            });
        });
    }
}

// ============================================================================
// Level-erased searcher for the public API
// ============================================================================

/// Searcher over any quantization level, chosen at runtime. The hot loop
/// stays monomorphic per variant; this enum adds one branch per call at
/// the API boundary only.
pub enum AnySearcher {
    Fp32(Searcher<Fp32Quantizer>),
    Sq8(Searcher<Sq8Quantizer>),
    Sq4(Searcher<Sq4Quantizer>),
}

impl AnySearcher {
    /// SQ8/SQ4 get a companion FP32 quantizer so reorder can re-rank with
    /// exact distances.
    pub fn new(graph: DenseGraph, dim: usize, metric: Metric, level: QuantLevel) -> Self {
        match level {
            QuantLevel::Fp32 => {
                AnySearcher::Fp32(Searcher::new(graph, Fp32Quantizer::new(metric, dim)))
            }
            QuantLevel::Sq8 => {
                AnySearcher::Sq8(Searcher::new(graph, Sq8Quantizer::new(metric, dim, true)))
            }
            QuantLevel::Sq4 => {
                AnySearcher::Sq4(Searcher::new(graph, Sq4Quantizer::new(metric, dim, true)))
            }
        }
    }

    /// Construct and train in one step.
    pub fn with_data(
        graph: DenseGraph,
        data: &[f32],
        n: usize,
        dim: usize,
        metric: Metric,
        level: QuantLevel,
    ) -> Result<Self> {
        let mut searcher = Self::new(graph, dim, metric, level);
        searcher.set_data(data, n, dim)?;
        Ok(searcher)
    }

    pub fn set_data(&mut self, data: &[f32], n: usize, dim: usize) -> Result<()> {
        match self {
            AnySearcher::Fp32(s) => s.set_data(data, n, dim),
            AnySearcher::Sq8(s) => s.set_data(data, n, dim),
            AnySearcher::Sq4(s) => s.set_data(data, n, dim),
        }
    }

    pub fn set_ef(&mut self, ef: usize) -> Result<()> {
        match self {
            AnySearcher::Fp32(s) => s.set_ef(ef),
            AnySearcher::Sq8(s) => s.set_ef(ef),
            AnySearcher::Sq4(s) => s.set_ef(ef),
        }
    }

    pub fn optimize(&mut self, threads: usize) {
        match self {
            AnySearcher::Fp32(s) => s.optimize(threads),
            AnySearcher::Sq8(s) => s.optimize(threads),
            AnySearcher::Sq4(s) => s.optimize(threads),
        }
    }

    pub fn search(&self, query: &[f32], k: usize, dst: &mut [i32]) -> Result<()> {
        match self {
            AnySearcher::Fp32(s) => s.search(query, k, dst),
            AnySearcher::Sq8(s) => s.search(query, k, dst),
            AnySearcher::Sq4(s) => s.search(query, k, dst),
        }
    }

    pub fn search_topk(&self, query: &[f32], k: usize) -> Result<Vec<i32>> {
        match self {
            AnySearcher::Fp32(s) => s.search_topk(query, k),
            AnySearcher::Sq8(s) => s.search_topk(query, k),
            AnySearcher::Sq4(s) => s.search_topk(query, k),
        }
    }

    pub fn batch_search(
        &self,
        queries: &[f32],
        nq: usize,
        k: usize,
        threads: usize,
    ) -> Result<Vec<i32>> {
        match self {
            AnySearcher::Fp32(s) => s.batch_search(queries, nq, k, threads),
            AnySearcher::Sq8(s) => s.batch_search(queries, nq, k, threads),
            AnySearcher::Sq4(s) => s.batch_search(queries, nq, k, threads),
        }
    }

    pub fn quantizer_name(&self) -> &'static str {
        match self {
            AnySearcher::Fp32(s) => s.quantizer().name(),
            AnySearcher::Sq8(s) => s.quantizer().name(),
            AnySearcher::Sq4(s) => s.quantizer().name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::IndexBuilder;

    fn pseudo_data(n: usize, dim: usize, seed: u64) -> Vec<f32> {
        let mut state = seed;
        (0..n * dim)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                ((state >> 33) % 2000) as f32 / 1000.0 - 1.0
            })
            .collect()
    }

    fn built(n: usize, dim: usize) -> (DenseGraph, Vec<f32>) {
        let data = pseudo_data(n, dim, 42);
        let builder = IndexBuilder::new("HNSW", dim, Metric::L2, 8, 64).unwrap();
        (builder.build(&data, n).unwrap(), data)
    }

    #[test]
    fn test_search_before_set_data_fails() {
        let (graph, _) = built(50, 8);
        let searcher = AnySearcher::new(graph, 8, Metric::L2, QuantLevel::Fp32);
        let err = searcher.search_topk(&[0.0; 8], 5).unwrap_err();
        assert!(matches!(err, QuiverError::NotTrained));
    }

    #[test]
    fn test_search_validates_arguments() {
        let (graph, data) = built(50, 8);
        let searcher =
            AnySearcher::with_data(graph, &data, 50, 8, Metric::L2, QuantLevel::Fp32).unwrap();

        // wrong dimension
        assert!(searcher.search_topk(&[0.0; 4], 5).is_err());
        // k = 0
        let mut dst = [0i32; 1];
        assert!(searcher.search(&data[..8], 0, &mut dst).is_err());
        // dst too small
        assert!(searcher.search(&data[..8], 2, &mut dst).is_err());
    }

    #[test]
    fn test_self_query_returns_self() {
        let (n, dim) = (120, 8);
        let (graph, data) = built(n, dim);
        let mut searcher = AnySearcher::with_data(graph, &data, n, dim, Metric::L2, QuantLevel::Fp32)
            .unwrap();
        searcher.set_ef(50).unwrap();

        for u in 0..20 {
            let out = searcher.search_topk(&data[u * dim..(u + 1) * dim], 5).unwrap();
            assert_eq!(out[0], u as i32, "self-query {u} missed itself");
        }
    }

    #[test]
    fn test_results_are_distinct_in_range() {
        let (n, dim) = (150, 8);
        let (graph, data) = built(n, dim);
        let mut searcher = AnySearcher::with_data(graph, &data, n, dim, Metric::L2, QuantLevel::Fp32)
            .unwrap();
        searcher.set_ef(40).unwrap();

        let query = pseudo_data(1, dim, 9);
        let out = searcher.search_topk(&query, 10).unwrap();
        let mut seen = std::collections::HashSet::new();
        for &id in &out {
            assert!(id >= 0 && (id as usize) < n);
            assert!(seen.insert(id), "duplicate id {id}");
        }
    }

    #[test]
    fn test_batch_matches_single_queries() {
        let (n, dim) = (100, 8);
        let (graph, data) = built(n, dim);
        let mut searcher = AnySearcher::with_data(graph, &data, n, dim, Metric::L2, QuantLevel::Fp32)
            .unwrap();
        searcher.set_ef(32).unwrap();

        let queries = pseudo_data(4, dim, 77);
        let batch = searcher.batch_search(&queries, 4, 5, 2).unwrap();
        for i in 0..4 {
            let single = searcher.search_topk(&queries[i * dim..(i + 1) * dim], 5).unwrap();
            assert_eq!(&batch[i * 5..(i + 1) * 5], &single[..]);
        }
    }

    #[test]
    fn test_optimize_keeps_search_working() {
        let (n, dim) = (200, 16);
        let (graph, data) = built(n, dim);
        let mut searcher = AnySearcher::with_data(graph, &data, n, dim, Metric::L2, QuantLevel::Sq8)
            .unwrap();
        searcher.optimize(2);
        searcher.set_ef(50).unwrap();

        let out = searcher.search_topk(&data[..dim], 10).unwrap();
        assert_eq!(out[0], 0);
    }

    #[test]
    fn test_sq8_shares_results_with_fp32() {
        let (n, dim) = (200, 8);
        let data = pseudo_data(n, dim, 42);
        let builder = IndexBuilder::new("HNSW", dim, Metric::L2, 8, 64).unwrap();

        let graph_a = builder.build(&data, n).unwrap();
        let mut fp32 = AnySearcher::with_data(graph_a, &data, n, dim, Metric::L2, QuantLevel::Fp32)
            .unwrap();
        fp32.set_ef(50).unwrap();

        let graph_b = builder.build(&data, n).unwrap();
        let mut sq8 = AnySearcher::with_data(graph_b, &data, n, dim, Metric::L2, QuantLevel::Sq8)
            .unwrap();
        sq8.set_ef(50).unwrap();

        let query = pseudo_data(1, dim, 5);
        let a = fp32.search_topk(&query, 10).unwrap();
        let b = sq8.search_topk(&query, 10).unwrap();
        let overlap = a.iter().filter(|id| b.contains(id)).count();
        assert!(overlap >= 3, "FP32/SQ8 overlap {overlap}/10 too low");
    }
}
