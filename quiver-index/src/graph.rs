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

//! Dense Graph Memory Layout
//!
//! The level-0 proximity graph is a single contiguous `N x R` i32 matrix:
//! one fixed-width neighbor row per node, `-1` sentinels past the live
//! degree, 64 B row alignment. Compared to a `Vec<Vec<u32>>` adjacency this
//! removes the per-node pointer chase and heap header, makes neighbor
//! expansion a linear scan of one cache-resident row, and turns
//! serialization into a straight sweep over one allocation.
//!
//! Invariant: in every row the non-sentinel ids precede all sentinels, and
//! `degree(u)` equals the first sentinel position of row `u`.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use quiver_core::error::{QuiverError, Result};
use quiver_core::memory::AlignedBlock;

use crate::initializer::HnswInitializer;
use crate::pool::LinearPool;
use crate::prefetch::prefetch_lines;

/// Sentinel for "no neighbor" in a fixed-width adjacency row.
pub const EMPTY_ID: i32 = -1;

/// Graph-level bookkeeping carried through serialization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphMetadata {
    pub num_nodes: usize,
    pub max_degree: usize,
    pub total_edges: u64,
    pub builder_name: String,
    pub distance_type: String,
    pub entry_points: Vec<u32>,
}

/// Fixed-width dense adjacency with optional HNSW entry descent.
#[derive(Debug)]
pub struct DenseGraph {
    num_nodes: usize,
    max_degree: usize,
    data: AlignedBlock,
    degrees: Vec<usize>,
    entry_points: Vec<u32>,
    initializer: Option<HnswInitializer>,
    total_edges: u64,
    builder_name: String,
    distance_type: String,
}

impl DenseGraph {
    /// Allocate an empty graph: all rows full of sentinels, all degrees 0.
    pub fn new(num_nodes: usize, max_degree: usize) -> Result<Self> {
        if num_nodes == 0 || max_degree == 0 {
            return Err(QuiverError::InvalidArgument(format!(
                "graph dimensions must be positive (num_nodes={num_nodes}, max_degree={max_degree})"
            )));
        }
        if num_nodes > i32::MAX as usize {
            return Err(QuiverError::InvalidArgument(format!(
                "num_nodes {num_nodes} exceeds the i32 id space"
            )));
        }
        let mut data = AlignedBlock::zeroed_cache_aligned(
            num_nodes * max_degree * std::mem::size_of::<i32>(),
        )?;
        unsafe {
            std::slice::from_raw_parts_mut(data.as_mut_ptr() as *mut i32, num_nodes * max_degree)
                .fill(EMPTY_ID);
        }
        Ok(Self {
            num_nodes,
            max_degree,
            data,
            degrees: vec![0; num_nodes],
            entry_points: Vec::new(),
            initializer: None,
            total_edges: 0,
            builder_name: String::new(),
            distance_type: String::new(),
        })
    }

    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    #[inline]
    pub fn max_degree(&self) -> usize {
        self.max_degree
    }

    #[inline]
    fn edge_matrix(&self) -> &[i32] {
        unsafe {
            std::slice::from_raw_parts(
                self.data.as_ptr() as *const i32,
                self.num_nodes * self.max_degree,
            )
        }
    }

    #[inline]
    fn edge_matrix_mut(&mut self) -> &mut [i32] {
        unsafe {
            std::slice::from_raw_parts_mut(
                self.data.as_mut_ptr() as *mut i32,
                self.num_nodes * self.max_degree,
            )
        }
    }

    /// Full fixed-width neighbor row of `u` (sentinels included).
    #[inline]
    pub fn neighbors(&self, u: u32) -> &[i32] {
        let base = u as usize * self.max_degree;
        &self.edge_matrix()[base..base + self.max_degree]
    }

    /// Element access into the edge matrix.
    #[inline]
    pub fn at(&self, u: u32, i: usize) -> i32 {
        self.edge_matrix()[u as usize * self.max_degree + i]
    }

    #[inline]
    pub fn degree(&self, u: u32) -> usize {
        self.degrees[u as usize]
    }

    #[inline]
    pub fn entry_points(&self) -> &[u32] {
        &self.entry_points
    }

    pub fn set_entry_points(&mut self, entry_points: Vec<u32>) {
        self.entry_points = entry_points;
    }

    pub fn initializer(&self) -> Option<&HnswInitializer> {
        self.initializer.as_ref()
    }

    pub fn set_initializer(&mut self, initializer: HnswInitializer) {
        self.initializer = Some(initializer);
    }

    pub fn set_names(&mut self, builder_name: &str, distance_type: &str) {
        self.builder_name = builder_name.to_string();
        self.distance_type = distance_type.to_string();
    }

    pub fn metadata(&self) -> GraphMetadata {
        GraphMetadata {
            num_nodes: self.num_nodes,
            max_degree: self.max_degree,
            total_edges: self.total_edges,
            builder_name: self.builder_name.clone(),
            distance_type: self.distance_type.clone(),
            entry_points: self.entry_points.clone(),
        }
    }

    fn check_node(&self, u: u32) -> Result<()> {
        if (u as usize) < self.num_nodes {
            Ok(())
        } else {
            Err(QuiverError::InvalidArgument(format!(
                "node id {u} out of range [0, {})",
                self.num_nodes
            )))
        }
    }

    /// Replace the whole row of `u`. Unused slots become sentinels.
    pub fn set_neighbors(&mut self, u: u32, neighbors: &[i32]) -> Result<()> {
        self.check_node(u)?;
        if neighbors.len() > self.max_degree {
            return Err(QuiverError::InvalidArgument(format!(
                "{} neighbors exceed max degree {}",
                neighbors.len(),
                self.max_degree
            )));
        }
        let old_degree = self.degrees[u as usize] as u64;
        let max_degree = self.max_degree;
        let base = u as usize * max_degree;
        let row = &mut self.edge_matrix_mut()[base..base + max_degree];
        row[..neighbors.len()].copy_from_slice(neighbors);
        row[neighbors.len()..].fill(EMPTY_ID);
        self.degrees[u as usize] = neighbors.len();
        self.total_edges = self.total_edges - old_degree + neighbors.len() as u64;
        Ok(())
    }

    /// Append edge `u -> v`. Idempotent; a full row drops the edge.
    pub fn add_edge(&mut self, u: u32, v: u32) -> Result<()> {
        self.check_node(u)?;
        self.check_node(v)?;
        let degree = self.degrees[u as usize];
        let max_degree = self.max_degree;
        let base = u as usize * max_degree;
        let row = &mut self.edge_matrix_mut()[base..base + max_degree];
        if row[..degree].contains(&(v as i32)) {
            return Ok(());
        }
        if degree < max_degree {
            row[degree] = v as i32;
            self.degrees[u as usize] = degree + 1;
            self.total_edges += 1;
        }
        Ok(())
    }

    /// Remove edge `u -> v` if present, compacting the row.
    pub fn remove_edge(&mut self, u: u32, v: u32) -> Result<()> {
        self.check_node(u)?;
        self.check_node(v)?;
        let degree = self.degrees[u as usize];
        let max_degree = self.max_degree;
        let base = u as usize * max_degree;
        let row = &mut self.edge_matrix_mut()[base..base + max_degree];
        if let Some(pos) = row[..degree].iter().position(|&x| x == v as i32) {
            row.copy_within(pos + 1..degree, pos);
            row[degree - 1] = EMPTY_ID;
            self.degrees[u as usize] = degree - 1;
            self.total_edges -= 1;
        }
        Ok(())
    }

    /// Stream up to `lines` cache lines of `u`'s neighbor row.
    #[inline]
    pub fn prefetch_neighbors(&self, u: u32, lines: usize) {
        let base = u as usize * self.max_degree;
        let ptr = unsafe { (self.data.as_ptr() as *const i32).add(base) };
        prefetch_lines(ptr as *const u8, lines);
    }

    /// Seed `pool` for a search: run the HNSW descent when an initializer
    /// is present, otherwise insert every entry point.
    pub fn initialize_search<F: FnMut(u32) -> f32>(
        &self,
        pool: &mut LinearPool,
        mut query_dist: F,
    ) {
        if let Some(init) = &self.initializer {
            init.descend(pool, query_dist);
        } else {
            for &ep in &self.entry_points {
                let dist = query_dist(ep);
                pool.insert(ep, dist);
                pool.visited.set(ep as usize);
            }
        }
    }

    // ------------------------------------------------------------------
    // Serialization (little-endian)
    // ------------------------------------------------------------------

    /// Write the graph. On any IO failure the partial file is removed.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let result = self.save_inner(path);
        if result.is_err() {
            let _ = fs::remove_file(path);
        }
        result
    }

    fn save_inner(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        if let Some(init) = &self.initializer {
            init.save(&mut writer)?;
        }

        writer.write_u64::<LittleEndian>(self.num_nodes as u64)?;
        writer.write_u64::<LittleEndian>(self.max_degree as u64)?;
        for &e in self.edge_matrix() {
            writer.write_i32::<LittleEndian>(e)?;
        }

        writer.write_u64::<LittleEndian>(self.degrees.len() as u64)?;
        for &d in &self.degrees {
            writer.write_u64::<LittleEndian>(d as u64)?;
        }

        writer.write_u64::<LittleEndian>(self.entry_points.len() as u64)?;
        for &ep in &self.entry_points {
            writer.write_u64::<LittleEndian>(ep as u64)?;
        }

        writer.write_u64::<LittleEndian>(self.total_edges)?;

        writer.write_u64::<LittleEndian>(self.builder_name.len() as u64)?;
        writer.write_all(self.builder_name.as_bytes())?;
        writer.write_u64::<LittleEndian>(self.distance_type.len() as u64)?;
        writer.write_all(self.distance_type.as_bytes())?;

        writer.flush()?;
        Ok(())
    }

    /// Read a graph written by [`DenseGraph::save`]. The initializer block
    /// leads the file for every HNSW-built graph and is required here; all
    /// structural invariants are re-checked before the graph is returned.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let initializer = HnswInitializer::load(&mut reader)?;

        let num_nodes = reader.read_u64::<LittleEndian>()? as usize;
        let max_degree = reader.read_u64::<LittleEndian>()? as usize;
        if num_nodes != initializer.num_nodes() {
            return Err(QuiverError::CorruptFormat(format!(
                "initializer covers {} nodes but the graph has {num_nodes}",
                initializer.num_nodes()
            )));
        }

        let mut graph = Self::new(num_nodes, max_degree)?;
        {
            let matrix = graph.edge_matrix_mut();
            for slot in matrix.iter_mut() {
                *slot = reader.read_i32::<LittleEndian>()?;
            }
        }

        let degrees_size = reader.read_u64::<LittleEndian>()? as usize;
        if degrees_size != num_nodes {
            return Err(QuiverError::CorruptFormat(format!(
                "degree table covers {degrees_size} nodes, expected {num_nodes}"
            )));
        }
        for d in graph.degrees.iter_mut() {
            *d = reader.read_u64::<LittleEndian>()? as usize;
        }

        let entry_points_size = reader.read_u64::<LittleEndian>()? as usize;
        if entry_points_size == 0 || entry_points_size > num_nodes {
            return Err(QuiverError::CorruptFormat(format!(
                "entry point count {entry_points_size} out of range [1, {num_nodes}]"
            )));
        }
        graph.entry_points = Vec::with_capacity(entry_points_size);
        for _ in 0..entry_points_size {
            let ep = reader.read_u64::<LittleEndian>()?;
            if ep >= num_nodes as u64 {
                return Err(QuiverError::CorruptFormat(format!(
                    "entry point {ep} out of range [0, {num_nodes})"
                )));
            }
            graph.entry_points.push(ep as u32);
        }

        graph.total_edges = reader.read_u64::<LittleEndian>()?;
        graph.builder_name = read_string(&mut reader)?;
        graph.distance_type = read_string(&mut reader)?;
        graph.initializer = Some(initializer);

        graph.validate()?;
        Ok(graph)
    }

    /// Re-check the row invariants: ids in range, non-sentinels packed
    /// before sentinels, and the degree table agreeing with the rows.
    fn validate(&self) -> Result<()> {
        let n = self.num_nodes as i32;
        for u in 0..self.num_nodes {
            let row = self.neighbors(u as u32);
            let mut first_sentinel = self.max_degree;
            for (i, &v) in row.iter().enumerate() {
                if v == EMPTY_ID {
                    first_sentinel = first_sentinel.min(i);
                } else {
                    if v < 0 || v >= n {
                        return Err(QuiverError::CorruptFormat(format!(
                            "node {u} has neighbor {v} out of range [0, {n})"
                        )));
                    }
                    if first_sentinel < i {
                        return Err(QuiverError::CorruptFormat(format!(
                            "node {u} has neighbor {v} after a sentinel"
                        )));
                    }
                }
            }
            if self.degrees[u] != first_sentinel {
                return Err(QuiverError::CorruptFormat(format!(
                    "node {u} records degree {} but its row holds {first_sentinel}",
                    self.degrees[u]
                )));
            }
        }
        Ok(())
    }
}

fn read_string<R: Read>(reader: &mut R) -> Result<String> {
    let len = reader.read_u64::<LittleEndian>()? as usize;
    if len > 1 << 16 {
        return Err(QuiverError::CorruptFormat(format!(
            "metadata string of {len} bytes is implausible"
        )));
    }
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes)?;
    String::from_utf8(bytes)
        .map_err(|_| QuiverError::CorruptFormat("metadata string is not UTF-8".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_graph() -> DenseGraph {
        let mut graph = DenseGraph::new(4, 3).unwrap();
        graph.add_edge(0, 1).unwrap();
        graph.add_edge(0, 2).unwrap();
        graph.add_edge(1, 0).unwrap();
        graph.add_edge(2, 3).unwrap();
        graph.set_entry_points(vec![0]);
        graph
    }

    #[test]
    fn test_new_graph_is_all_sentinels() {
        let graph = DenseGraph::new(3, 4).unwrap();
        for u in 0..3 {
            assert_eq!(graph.neighbors(u), &[EMPTY_ID; 4]);
            assert_eq!(graph.degree(u), 0);
        }
    }

    #[test]
    fn test_add_edge_is_idempotent() {
        let mut graph = small_graph();
        assert_eq!(graph.degree(0), 2);
        graph.add_edge(0, 1).unwrap();
        assert_eq!(graph.degree(0), 2);
        assert_eq!(graph.metadata().total_edges, 4);
    }

    #[test]
    fn test_add_edge_full_row_drops() {
        let mut graph = DenseGraph::new(5, 2).unwrap();
        graph.add_edge(0, 1).unwrap();
        graph.add_edge(0, 2).unwrap();
        graph.add_edge(0, 3).unwrap();
        assert_eq!(graph.degree(0), 2);
        assert_eq!(graph.neighbors(0), &[1, 2]);
    }

    #[test]
    fn test_add_edge_rejects_out_of_range() {
        let mut graph = small_graph();
        assert!(graph.add_edge(0, 9).is_err());
        assert!(graph.add_edge(9, 0).is_err());
    }

    #[test]
    fn test_remove_edge_compacts() {
        let mut graph = small_graph();
        graph.remove_edge(0, 1).unwrap();
        assert_eq!(graph.neighbors(0), &[2, EMPTY_ID, EMPTY_ID]);
        assert_eq!(graph.degree(0), 1);
        // removing again is a no-op
        graph.remove_edge(0, 1).unwrap();
        assert_eq!(graph.degree(0), 1);
    }

    #[test]
    fn test_set_neighbors() {
        let mut graph = DenseGraph::new(4, 3).unwrap();
        graph.set_neighbors(2, &[0, 1, 3]).unwrap();
        assert_eq!(graph.neighbors(2), &[0, 1, 3]);
        assert_eq!(graph.degree(2), 3);
        graph.set_neighbors(2, &[1]).unwrap();
        assert_eq!(graph.neighbors(2), &[1, EMPTY_ID, EMPTY_ID]);
        assert_eq!(graph.metadata().total_edges, 1);
        assert!(graph.set_neighbors(2, &[0, 1, 3, 0]).is_err());
    }

    #[test]
    fn test_initialize_search_from_entry_points() {
        let graph = small_graph();
        let dists = [3.0f32, 1.0, 2.0, 0.5];
        let mut pool = LinearPool::new(4, 8);
        graph.initialize_search(&mut pool, |v| dists[v as usize]);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.id(0), 0);
        assert!(pool.visited.get(0));
    }

    #[test]
    fn test_validate_catches_degree_mismatch() {
        let mut graph = small_graph();
        graph.degrees[0] = 3;
        assert!(matches!(
            graph.validate(),
            Err(QuiverError::CorruptFormat(_))
        ));
    }

    #[test]
    fn test_validate_catches_out_of_range_neighbor() {
        let mut graph = small_graph();
        let max_degree = graph.max_degree;
        graph.edge_matrix_mut()[max_degree] = 99; // node 1, slot 0
        assert!(matches!(
            graph.validate(),
            Err(QuiverError::CorruptFormat(_))
        ));
    }

    #[test]
    fn test_validate_catches_id_after_sentinel() {
        let mut graph = small_graph();
        // node 3 has degree 0; plant an id in its second slot only
        let base = 3 * graph.max_degree;
        graph.edge_matrix_mut()[base + 1] = 0;
        assert!(matches!(
            graph.validate(),
            Err(QuiverError::CorruptFormat(_))
        ));
    }
}
