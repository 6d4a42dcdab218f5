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

//! HNSW Graph Construction
//!
//! Classical HNSW insertion, serialized: each point draws a geometric
//! level, greedily descends from the entry point through the layers above
//! it, then runs an `ef_construction`-wide beam search per layer and links
//! to neighbors chosen by the diversity heuristic (a candidate is kept
//! only if it is closer to the query than to every already-kept neighbor).
//! Reverse edges that overflow a row re-run the heuristic on that row.
//!
//! Construction state lives in per-layer `Vec`s; the finished hierarchy is
//! extracted into the flat [`DenseGraph`] (layer 0, R = 2M) plus a
//! [`HnswInitializer`] (layers >= 1, K = M).

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use smallvec::SmallVec;
use tracing::info;

use quiver_core::error::{QuiverError, Result};

use crate::distance::{F32Computer, Metric};
use crate::graph::DenseGraph;
use crate::initializer::HnswInitializer;
use crate::pool::Bitset;

/// Level cap; the geometric distribution makes higher levels vanishingly
/// rare and bounding them keeps per-node lists small.
const MAX_LEVEL: usize = 16;

/// A node with its distance to the current query point.
#[derive(Debug, Clone, Copy)]
struct ScoredNode {
    id: u32,
    distance: f32,
}

impl PartialEq for ScoredNode {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance
    }
}

impl Eq for ScoredNode {}

impl PartialOrd for ScoredNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoredNode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .partial_cmp(&other.distance)
            .unwrap_or(Ordering::Equal)
    }
}

/// Public builder: validates parameters, then constructs a [`DenseGraph`].
pub struct IndexBuilder {
    dim: usize,
    metric: Metric,
    m: usize,
    ef_construction: usize,
    seed: u64,
}

impl IndexBuilder {
    /// `kind` must be "HNSW". `m` is the nominal out-degree (layer 0 gets
    /// 2M), `ef_construction` the insertion beam width.
    pub fn new(
        kind: &str,
        dim: usize,
        metric: Metric,
        m: usize,
        ef_construction: usize,
    ) -> Result<Self> {
        if kind != "HNSW" {
            return Err(QuiverError::InvalidArgument(format!(
                "unknown index kind {kind:?} (expected \"HNSW\")"
            )));
        }
        if dim == 0 {
            return Err(QuiverError::InvalidArgument(
                "dim must be positive".to_string(),
            ));
        }
        if m == 0 {
            return Err(QuiverError::InvalidArgument(
                "M must be positive".to_string(),
            ));
        }
        Ok(Self {
            dim,
            metric,
            m,
            ef_construction: ef_construction.max(1),
            seed: 100,
        })
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Build the graph over `n` row-major base vectors. Insertion order is
    /// index order; the result is deterministic for a fixed seed.
    pub fn build(&self, data: &[f32], n: usize) -> Result<DenseGraph> {
        if n == 0 {
            return Err(QuiverError::InvalidArgument(
                "cannot build an index over zero vectors".to_string(),
            ));
        }
        if n > i32::MAX as usize {
            return Err(QuiverError::InvalidArgument(format!(
                "{n} vectors exceed the i32 id space"
            )));
        }
        if data.len() != n * self.dim {
            return Err(QuiverError::InvalidArgument(format!(
                "base matrix of {} floats does not hold {n} x {} rows",
                data.len(),
                self.dim
            )));
        }

        info!(
            n,
            dim = self.dim,
            m = self.m,
            ef_construction = self.ef_construction,
            "building HNSW graph"
        );
        let start = Instant::now();

        let mut build = HnswBuild::new(
            data,
            n,
            self.dim,
            self.m,
            self.ef_construction,
            self.metric,
            self.seed,
        );
        for i in 0..n {
            build.insert(i as u32);
            if (i + 1) % 10_000 == 0 {
                info!("HNSW build progress [{}/{n}]", i + 1);
            }
        }

        let graph = build.extract(self.metric.name())?;
        info!(elapsed_s = start.elapsed().as_secs_f64(), "HNSW build complete");
        Ok(graph)
    }
}

/// In-flight construction state.
struct HnswBuild<'a> {
    data: &'a [f32],
    n: usize,
    dim: usize,
    m: usize,
    ef: usize,
    computer: F32Computer,
    level_mult: f64,
    rng: StdRng,
    levels: Vec<usize>,
    /// links[u][layer] is u's neighbor list at that layer.
    links: Vec<Vec<Vec<u32>>>,
    entry: u32,
    max_level: usize,
    visited: Bitset,
}

impl<'a> HnswBuild<'a> {
    fn new(
        data: &'a [f32],
        n: usize,
        dim: usize,
        m: usize,
        ef: usize,
        metric: Metric,
        seed: u64,
    ) -> Self {
        Self {
            data,
            n,
            dim,
            m,
            ef,
            computer: F32Computer::new(metric),
            level_mult: 1.0 / (m.max(2) as f64).ln(),
            rng: StdRng::seed_from_u64(seed),
            levels: vec![0; n],
            links: vec![Vec::new(); n],
            entry: 0,
            max_level: 0,
            visited: Bitset::new(n),
        }
    }

    #[inline]
    fn row(&self, u: u32) -> &[f32] {
        &self.data[u as usize * self.dim..(u as usize + 1) * self.dim]
    }

    #[inline]
    fn distance(&self, a: u32, b: u32) -> f32 {
        self.computer.compute(self.row(a), self.row(b))
    }

    /// Geometric level draw: floor(-ln(U(0,1)) / ln(M)).
    fn random_level(&mut self) -> usize {
        let uniform: f64 = self.rng.gen::<f64>().max(f64::MIN_POSITIVE);
        let level = (-uniform.ln() * self.level_mult) as usize;
        level.min(MAX_LEVEL)
    }

    fn insert(&mut self, u: u32) {
        let level = self.random_level();
        self.levels[u as usize] = level;
        self.links[u as usize] = vec![Vec::new(); level + 1];

        if u == 0 {
            self.entry = 0;
            self.max_level = level;
            return;
        }

        // Greedy descent through the layers above the new point's level.
        let mut cur = self.entry;
        let mut cur_dist = self.distance(u, cur);
        for layer in (level + 1..=self.max_level).rev() {
            let mut changed = true;
            while changed {
                changed = false;
                for &v in &self.links[cur as usize][layer] {
                    let dist = self.distance(u, v);
                    if dist < cur_dist {
                        cur_dist = dist;
                        cur = v;
                        changed = true;
                    }
                }
            }
        }

        // Beam search and linking, top shared layer down to 0.
        for layer in (0..=level.min(self.max_level)).rev() {
            let candidates = self.search_layer(u, cur, layer);
            let selected = self.select_neighbors(&candidates, self.m);
            for &v in &selected {
                self.connect(u, v, layer);
            }
            if let Some(best) = candidates.first() {
                cur = best.id;
            }
        }

        if level > self.max_level {
            self.max_level = level;
            self.entry = u;
        }
    }

    /// Beam search of width `ef` at one layer, seeded at `ep`. Returns all
    /// collected candidates sorted by ascending distance to `q`.
    fn search_layer(&mut self, q: u32, ep: u32, layer: usize) -> Vec<ScoredNode> {
        self.visited.clear();
        self.visited.set(ep as usize);
        let ep_dist = self.distance(q, ep);

        let mut frontier = BinaryHeap::new();
        let mut results: BinaryHeap<ScoredNode> = BinaryHeap::new();
        frontier.push(Reverse(ScoredNode {
            id: ep,
            distance: ep_dist,
        }));
        results.push(ScoredNode {
            id: ep,
            distance: ep_dist,
        });

        while let Some(Reverse(candidate)) = frontier.pop() {
            let worst = results
                .peek()
                .map(|r| r.distance)
                .unwrap_or(f32::INFINITY);
            if results.len() >= self.ef && candidate.distance > worst {
                break;
            }
            for i in 0..self.links[candidate.id as usize][layer].len() {
                let v = self.links[candidate.id as usize][layer][i];
                if self.visited.get(v as usize) {
                    continue;
                }
                self.visited.set(v as usize);
                let dist = self.distance(q, v);
                let worst = results
                    .peek()
                    .map(|r| r.distance)
                    .unwrap_or(f32::INFINITY);
                if results.len() < self.ef || dist < worst {
                    frontier.push(Reverse(ScoredNode { id: v, distance: dist }));
                    results.push(ScoredNode { id: v, distance: dist });
                    if results.len() > self.ef {
                        results.pop();
                    }
                }
            }
        }

        results.into_sorted_vec()
    }

    /// HNSW diversity heuristic over candidates sorted by ascending
    /// distance: keep a candidate only if it is closer to the query than
    /// to every neighbor already kept.
    fn select_neighbors(&self, candidates: &[ScoredNode], m: usize) -> SmallVec<[u32; 64]> {
        let mut selected: SmallVec<[ScoredNode; 64]> = SmallVec::new();
        for candidate in candidates {
            if selected.len() >= m {
                break;
            }
            let diverse = selected
                .iter()
                .all(|kept| self.distance(candidate.id, kept.id) >= candidate.distance);
            if diverse {
                selected.push(*candidate);
            }
        }
        selected.iter().map(|c| c.id).collect()
    }

    /// Link `u <-> v` at `layer`; re-prune `v`'s row if it overflows.
    fn connect(&mut self, u: u32, v: u32, layer: usize) {
        self.links[u as usize][layer].push(v);

        let cap = if layer == 0 { self.m * 2 } else { self.m };
        let reverse = &mut self.links[v as usize][layer];
        if !reverse.contains(&u) {
            reverse.push(u);
        }
        if self.links[v as usize][layer].len() > cap {
            let mut candidates: Vec<ScoredNode> = self.links[v as usize][layer]
                .iter()
                .map(|&w| ScoredNode {
                    id: w,
                    distance: self.distance(v, w),
                })
                .collect();
            candidates.sort();
            let kept = self.select_neighbors(&candidates, cap);
            self.links[v as usize][layer] = kept.into_vec();
        }
    }

    /// Flatten level 0 into the dense matrix and layers >= 1 into the
    /// initializer.
    fn extract(self, distance_name: &str) -> Result<DenseGraph> {
        let mut graph = DenseGraph::new(self.n, 2 * self.m)?;
        for u in 0..self.n {
            let row: Vec<i32> = self.links[u][0]
                .iter()
                .take(2 * self.m)
                .map(|&v| v as i32)
                .collect();
            graph.set_neighbors(u as u32, &row)?;
        }

        let mut init = HnswInitializer::new(self.n, self.m);
        init.set_entry_point(self.entry);
        for u in 0..self.n {
            let level = self.levels[u];
            init.set_level(u, level);
            for layer in 1..=level {
                for (i, &v) in self.links[u][layer].iter().take(self.m).enumerate() {
                    init.set_at(layer, u, i, v as i32);
                }
            }
        }

        graph.set_initializer(init);
        graph.set_entry_points(vec![self.entry]);
        graph.set_names("HNSW", distance_name);
        Ok(graph)
    }
}
