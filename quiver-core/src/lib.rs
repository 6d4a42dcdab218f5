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

//! Quiver Core
//!
//! Foundation crate for the quiver ANN search engine: the error taxonomy,
//! configuration types with INI-style file I/O, and aligned memory blocks
//! used for code storage and adjacency matrices.

pub mod config;
pub mod error;
pub mod memory;

pub use config::{ConfigSet, HnswConfig, QuantizationConfig, SearchConfig};
pub use error::{check_dim, QuiverError, Result};
pub use memory::{align_up, AlignedBlock, CACHE_LINE, HUGE_PAGE};
