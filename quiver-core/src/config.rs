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

//! Engine Configuration
//!
//! Three config sections cover index construction, query execution, and
//! quantization. An INI-style file format (`[section]` headers, `key=value`
//! lines, `#` comments) maps onto them; unknown keys are ignored so old
//! binaries keep reading new config files.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// HNSW construction parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HnswConfig {
    /// Nominal out-degree per node (M). Layer 0 allows 2M.
    pub m: usize,
    /// Beam width for neighbor selection during insertion.
    pub ef_construction: usize,
    /// Capacity hint for the build.
    pub max_elements: usize,
    /// Accepted for compatibility; replacement after build is not supported.
    pub allow_replace_deleted: bool,
    /// Seed for the level generator.
    pub random_seed: u64,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            max_elements: 1_000_000,
            allow_replace_deleted: false,
            random_seed: 100,
        }
    }
}

/// Query-time parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Beam width during search.
    pub ef: usize,
    /// Worker count for batch search (0 = all cores).
    pub num_threads: usize,
    /// Whether the prefetch schedule is applied.
    pub use_prefetch: bool,
    /// Queries per batch-search chunk.
    pub batch_size: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            ef: 50,
            num_threads: 1,
            use_prefetch: true,
            batch_size: 1000,
        }
    }
}

/// Quantizer parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantizationConfig {
    pub nbits: usize,
    pub subvector_size: usize,
    pub num_centroids: usize,
}

impl Default for QuantizationConfig {
    fn default() -> Self {
        Self {
            nbits: 8,
            subvector_size: 8,
            num_centroids: 256,
        }
    }
}

/// All recognized configuration, loadable from an INI-style file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigSet {
    pub hnsw: HnswConfig,
    pub search: SearchConfig,
    pub quantization: QuantizationConfig,
}

impl ConfigSet {
    /// Parse an INI-style config file. Lines outside a `[section]` and
    /// unknown keys are ignored.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(Self::parse(&text))
    }

    /// Parse config text. Never fails: malformed lines are skipped.
    pub fn parse(text: &str) -> Self {
        let mut config = Self::default();
        let mut section = "";

        for raw_line in text.lines() {
            let line = match raw_line.find('#') {
                Some(pos) => &raw_line[..pos],
                None => raw_line,
            }
            .trim();
            if line.is_empty() {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                section = match &line[1..line.len() - 1] {
                    "hnsw" => "hnsw",
                    "search" => "search",
                    "quantization" => "quantization",
                    _ => "",
                };
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());
            config.apply(section, key, value);
        }

        config
    }

    fn apply(&mut self, section: &str, key: &str, value: &str) {
        fn num(value: &str) -> Option<usize> {
            value.parse().ok()
        }
        fn flag(value: &str) -> Option<bool> {
            match value {
                "true" | "1" | "yes" => Some(true),
                "false" | "0" | "no" => Some(false),
                _ => None,
            }
        }

        match (section, key) {
            ("hnsw", "m") | ("hnsw", "M") => {
                if let Some(v) = num(value) {
                    self.hnsw.m = v;
                }
            }
            ("hnsw", "ef_construction") => {
                if let Some(v) = num(value) {
                    self.hnsw.ef_construction = v;
                }
            }
            ("hnsw", "max_elements") => {
                if let Some(v) = num(value) {
                    self.hnsw.max_elements = v;
                }
            }
            ("hnsw", "allow_replace_deleted") => {
                if let Some(v) = flag(value) {
                    self.hnsw.allow_replace_deleted = v;
                }
            }
            ("hnsw", "random_seed") => {
                if let Ok(v) = value.parse() {
                    self.hnsw.random_seed = v;
                }
            }
            ("search", "ef") => {
                if let Some(v) = num(value) {
                    self.search.ef = v;
                }
            }
            ("search", "num_threads") => {
                if let Some(v) = num(value) {
                    self.search.num_threads = v;
                }
            }
            ("search", "use_prefetch") => {
                if let Some(v) = flag(value) {
                    self.search.use_prefetch = v;
                }
            }
            ("search", "batch_size") => {
                if let Some(v) = num(value) {
                    self.search.batch_size = v;
                }
            }
            ("quantization", "nbits") => {
                if let Some(v) = num(value) {
                    self.quantization.nbits = v;
                }
            }
            ("quantization", "subvector_size") => {
                if let Some(v) = num(value) {
                    self.quantization.subvector_size = v;
                }
            }
            ("quantization", "num_centroids") => {
                if let Some(v) = num(value) {
                    self.quantization.num_centroids = v;
                }
            }
            _ => {} // unknown key or section: forward compatibility
        }
    }

    /// Write the config back out in the same INI format.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.render())?;
        Ok(())
    }

    fn render(&self) -> String {
        format!(
            "[hnsw]\n\
             m={}\n\
             ef_construction={}\n\
             max_elements={}\n\
             allow_replace_deleted={}\n\
             random_seed={}\n\
             \n\
             [search]\n\
             ef={}\n\
             num_threads={}\n\
             use_prefetch={}\n\
             batch_size={}\n\
             \n\
             [quantization]\n\
             nbits={}\n\
             subvector_size={}\n\
             num_centroids={}\n",
            self.hnsw.m,
            self.hnsw.ef_construction,
            self.hnsw.max_elements,
            self.hnsw.allow_replace_deleted,
            self.hnsw.random_seed,
            self.search.ef,
            self.search.num_threads,
            self.search.use_prefetch,
            self.search.batch_size,
            self.quantization.nbits,
            self.quantization.subvector_size,
            self.quantization.num_centroids,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConfigSet::default();
        assert_eq!(config.hnsw.m, 16);
        assert_eq!(config.hnsw.ef_construction, 200);
        assert_eq!(config.search.ef, 50);
        assert_eq!(config.quantization.nbits, 8);
    }

    #[test]
    fn test_parse_sections_and_comments() {
        let text = "\
# engine settings
[hnsw]
m = 32
ef_construction=100   # wide beam
random_seed=42

[search]
ef=64
use_prefetch=false

[quantization]
nbits=4
";
        let config = ConfigSet::parse(text);
        assert_eq!(config.hnsw.m, 32);
        assert_eq!(config.hnsw.ef_construction, 100);
        assert_eq!(config.hnsw.random_seed, 42);
        assert_eq!(config.search.ef, 64);
        assert!(!config.search.use_prefetch);
        assert_eq!(config.quantization.nbits, 4);
        // untouched keys keep defaults
        assert_eq!(config.search.batch_size, 1000);
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let text = "\
[hnsw]
m=8
future_knob=77

[telemetry]
endpoint=localhost
";
        let config = ConfigSet::parse(text);
        assert_eq!(config.hnsw.m, 8);
    }

    #[test]
    fn test_lines_outside_sections_ignored() {
        let text = "ef=999\n[search]\nef=10\n";
        let config = ConfigSet::parse(text);
        assert_eq!(config.search.ef, 10);
    }

    #[test]
    fn test_render_parse_round_trip() {
        let mut config = ConfigSet::default();
        config.hnsw.m = 24;
        config.search.num_threads = 8;
        config.quantization.num_centroids = 512;

        let parsed = ConfigSet::parse(&config.render());
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quiver.ini");

        let mut config = ConfigSet::default();
        config.hnsw.random_seed = 7;
        config.save_to_file(&path).unwrap();

        let loaded = ConfigSet::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
