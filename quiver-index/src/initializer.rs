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

//! HNSW Entry Descent
//!
//! The upper layers of the HNSW hierarchy survive extraction as a
//! [`HnswInitializer`]: per node, its level and a `level * K` adjacency
//! list (layer k occupying slice `[(k-1)*K, k*K)`, `-1` sentinels). At
//! query time a greedy descent from the global entry point walks each
//! layer to its local minimum, then steps down; the final node seeds the
//! layer-0 candidate pool.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use quiver_core::error::{QuiverError, Result};

use crate::graph::EMPTY_ID;
use crate::pool::LinearPool;

/// Upper-layer adjacency for the HNSW entry descent.
#[derive(Debug, Clone, PartialEq)]
pub struct HnswInitializer {
    n: usize,
    k: usize,
    ep: u32,
    levels: Vec<usize>,
    lists: Vec<Vec<i32>>,
}

impl HnswInitializer {
    pub fn new(n: usize, k: usize) -> Self {
        Self {
            n,
            k,
            ep: 0,
            levels: vec![0; n],
            lists: vec![Vec::new(); n],
        }
    }

    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.n
    }

    #[inline]
    pub fn degree_bound(&self) -> usize {
        self.k
    }

    #[inline]
    pub fn entry_point(&self) -> u32 {
        self.ep
    }

    pub fn set_entry_point(&mut self, ep: u32) {
        self.ep = ep;
    }

    #[inline]
    pub fn level(&self, u: usize) -> usize {
        self.levels[u]
    }

    /// Set node level and size its adjacency to `level * K` sentinels.
    pub fn set_level(&mut self, u: usize, level: usize) {
        self.levels[u] = level;
        self.lists[u] = vec![EMPTY_ID; level * self.k];
    }

    /// Neighbor slot `i` of node `u` at `level` (1-based levels).
    #[inline]
    pub fn at(&self, level: usize, u: usize, i: usize) -> i32 {
        self.lists[u][(level - 1) * self.k + i]
    }

    pub fn set_at(&mut self, level: usize, u: usize, i: usize, v: i32) {
        self.lists[u][(level - 1) * self.k + i] = v;
    }

    /// Neighbor row of node `u` at `level` (1-based levels).
    #[inline]
    pub fn edges(&self, level: usize, u: usize) -> &[i32] {
        let base = (level - 1) * self.k;
        &self.lists[u][base..base + self.k]
    }

    /// Greedy descent from the entry point down to layer 1. The best node
    /// found is inserted into `pool` with its (already computed) distance
    /// and marked visited.
    pub fn descend<F: FnMut(u32) -> f32>(&self, pool: &mut LinearPool, mut query_dist: F) {
        let mut u = self.ep;
        let mut cur_dist = query_dist(u);
        for level in (1..=self.levels[u as usize]).rev() {
            let mut changed = true;
            while changed {
                changed = false;
                let list = self.edges(level, u as usize);
                for &v in list {
                    if v == EMPTY_ID {
                        break;
                    }
                    let dist = query_dist(v as u32);
                    if dist < cur_dist {
                        cur_dist = dist;
                        u = v as u32;
                        changed = true;
                    }
                }
            }
        }
        pool.insert(u, cur_dist);
        pool.visited.set(u as usize);
    }

    pub fn save<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_i32::<LittleEndian>(self.n as i32)?;
        writer.write_i32::<LittleEndian>(self.k as i32)?;
        writer.write_i32::<LittleEndian>(self.ep as i32)?;
        for u in 0..self.n {
            let cur = (self.levels[u] * self.k) as i32;
            writer.write_i32::<LittleEndian>(cur)?;
            for i in 0..cur as usize {
                writer.write_i32::<LittleEndian>(self.lists[u][i])?;
            }
        }
        Ok(())
    }

    pub fn load<R: Read>(reader: &mut R) -> Result<Self> {
        let n = reader.read_i32::<LittleEndian>()?;
        let k = reader.read_i32::<LittleEndian>()?;
        let ep = reader.read_i32::<LittleEndian>()?;
        if n < 0 || k <= 0 {
            return Err(QuiverError::CorruptFormat(format!(
                "initializer header invalid: n={n}, k={k}"
            )));
        }
        let (n, k) = (n as usize, k as usize);
        if ep < 0 || ep as usize >= n {
            return Err(QuiverError::CorruptFormat(format!(
                "initializer entry point {ep} out of range [0, {n})"
            )));
        }

        let mut init = Self::new(n, k);
        init.ep = ep as u32;
        for u in 0..n {
            let cur = reader.read_i32::<LittleEndian>()?;
            if cur < 0 || cur as usize % k != 0 {
                return Err(QuiverError::CorruptFormat(format!(
                    "node {u} has invalid upper-layer length {cur} (K = {k})"
                )));
            }
            let cur = cur as usize;
            init.levels[u] = cur / k;
            let mut list = vec![EMPTY_ID; cur];
            for slot in list.iter_mut() {
                let v = reader.read_i32::<LittleEndian>()?;
                if v != EMPTY_ID && (v < 0 || v as usize >= n) {
                    return Err(QuiverError::CorruptFormat(format!(
                        "node {u} has upper-layer neighbor {v} out of range [0, {n})"
                    )));
                }
                *slot = v;
            }
            init.lists[u] = list;
        }

        let ep_level = init.levels[init.ep as usize];
        if init.levels.iter().any(|&l| l > ep_level) {
            return Err(QuiverError::CorruptFormat(
                "entry point is not on the top layer".to_string(),
            ));
        }

        // A layer-l edge may only point at a node that exists on layer l,
        // otherwise the descent would walk off the end of its list.
        for u in 0..n {
            for level in 1..=init.levels[u] {
                for &v in init.edges(level, u) {
                    if v != EMPTY_ID && init.levels[v as usize] < level {
                        return Err(QuiverError::CorruptFormat(format!(
                            "node {u} links to {v} on layer {level}, but {v} tops out below it"
                        )));
                    }
                }
            }
        }
        Ok(init)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Nodes 0 and 1 share levels 1-2; node 2 exists only on layer 0.
    fn line_initializer() -> HnswInitializer {
        let mut init = HnswInitializer::new(3, 2);
        init.set_entry_point(0);
        init.set_level(0, 2);
        init.set_level(1, 2);
        init.set_at(1, 0, 0, 1); // level 1: 0 -> 1
        init.set_at(2, 0, 0, 1); // level 2: 0 -> 1
        init.set_at(1, 1, 0, 0); // level 1: 1 -> 0
        init.set_at(2, 1, 0, 0); // level 2: 1 -> 0
        init
    }

    #[test]
    fn test_layout_accessors() {
        let init = line_initializer();
        assert_eq!(init.level(0), 2);
        assert_eq!(init.at(1, 0, 0), 1);
        assert_eq!(init.at(1, 0, 1), EMPTY_ID);
        assert_eq!(init.edges(2, 0), &[1, EMPTY_ID]);
    }

    #[test]
    fn test_descend_walks_to_local_minimum() {
        let init = line_initializer();
        // node 1 is closest; descent from ep=0 must end there
        let dists = [5.0f32, 1.0, 3.0];
        let mut pool = LinearPool::new(3, 4);
        init.descend(&mut pool, |v| dists[v as usize]);

        assert_eq!(pool.len(), 1);
        assert_eq!(pool.id(0), 1);
        assert_eq!(pool.distance(0), 1.0);
        assert!(pool.visited.get(1));
        assert!(!pool.visited.get(0));
    }

    #[test]
    fn test_descend_stays_when_ep_is_best() {
        let init = line_initializer();
        let dists = [0.5f32, 1.0, 3.0];
        let mut pool = LinearPool::new(3, 4);
        init.descend(&mut pool, |v| dists[v as usize]);
        assert_eq!(pool.id(0), 0);
    }

    #[test]
    fn test_save_load_round_trip() {
        let init = line_initializer();
        let mut bytes = Vec::new();
        init.save(&mut bytes).unwrap();

        let loaded = HnswInitializer::load(&mut bytes.as_slice()).unwrap();
        assert_eq!(loaded, init);
    }

    #[test]
    fn test_load_rejects_bad_entry_point() {
        let mut init = line_initializer();
        init.set_entry_point(7);
        let mut bytes = Vec::new();
        init.save(&mut bytes).unwrap();

        let err = HnswInitializer::load(&mut bytes.as_slice()).unwrap_err();
        assert!(matches!(err, QuiverError::CorruptFormat(_)));
    }

    #[test]
    fn test_load_rejects_out_of_range_neighbor() {
        let mut init = line_initializer();
        init.set_at(1, 1, 0, 99);
        let mut bytes = Vec::new();
        init.save(&mut bytes).unwrap();

        let err = HnswInitializer::load(&mut bytes.as_slice()).unwrap_err();
        assert!(matches!(err, QuiverError::CorruptFormat(_)));
    }

    #[test]
    fn test_load_rejects_demoted_entry_point() {
        let mut init = line_initializer();
        init.set_entry_point(2); // level 0, below node 0's level 2
        let mut bytes = Vec::new();
        init.save(&mut bytes).unwrap();

        let err = HnswInitializer::load(&mut bytes.as_slice()).unwrap_err();
        assert!(matches!(err, QuiverError::CorruptFormat(_)));
    }
}
