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

//! Quiver Recall/QPS Driver
//!
//! Reference binary: builds (or reloads) an HNSW graph over a base set,
//! then measures Recall@k and QPS against a ground-truth file.
//!
//! # Usage
//!
//! ```bash
//! bench base.fvecs query.fvecs gt.ivecs graph.bin LEVEL TOPK SEARCH_EF [NUM_THREADS] [ITERS]
//! ```
//!
//! `LEVEL` selects quantization: 0 = FP32, 1 = SQ8, 2 = SQ4. The graph is
//! built and saved when `graph.bin` does not exist, and reloaded otherwise.

use std::collections::HashSet;
use std::path::Path;
use std::time::Instant;

use tracing_subscriber::EnvFilter;

use quiver_core::error::{QuiverError, Result};
use quiver_index::dataset::{load_fvecs, load_ivecs};
use quiver_index::{AnySearcher, DenseGraph, IndexBuilder, Metric, QuantLevel};

struct Args {
    base_path: String,
    query_path: String,
    gt_path: String,
    graph_path: String,
    level: QuantLevel,
    topk: usize,
    search_ef: usize,
    num_threads: usize,
    iters: usize,
}

fn parse_args() -> Result<Args> {
    let argv: Vec<String> = std::env::args().collect();
    if argv.len() < 8 {
        return Err(QuiverError::InvalidArgument(format!(
            "usage: {} base_path query_path gt_path graph_path level topk search_ef \
             [num_threads] [iters]",
            argv.first().map(String::as_str).unwrap_or("bench")
        )));
    }
    let parse = |s: &str, what: &str| -> Result<usize> {
        s.parse()
            .map_err(|_| QuiverError::InvalidArgument(format!("{what} must be a number, got {s:?}")))
    };
    Ok(Args {
        base_path: argv[1].clone(),
        query_path: argv[2].clone(),
        gt_path: argv[3].clone(),
        graph_path: argv[4].clone(),
        level: QuantLevel::from_index(parse(&argv[5], "level")?)?,
        topk: parse(&argv[6], "topk")?,
        search_ef: parse(&argv[7], "search_ef")?,
        num_threads: argv
            .get(8)
            .map(|s| parse(s.as_str(), "num_threads"))
            .transpose()?
            .unwrap_or(1),
        iters: argv
            .get(9)
            .map(|s| parse(s.as_str(), "iters"))
            .transpose()?
            .unwrap_or(10),
    })
}

fn run(args: &Args) -> Result<()> {
    let (base, n, dim) = load_fvecs(&args.base_path)?;
    let (queries, nq, query_dim) = load_fvecs(&args.query_path)?;
    let (gt, gt_rows, gt_k) = load_ivecs(&args.gt_path)?;
    if query_dim != dim {
        return Err(QuiverError::InvalidArgument(format!(
            "query dimension {query_dim} does not match base dimension {dim}"
        )));
    }
    if gt_rows != nq || gt_k < args.topk {
        return Err(QuiverError::InvalidArgument(format!(
            "ground truth is {gt_rows} x {gt_k}, need {nq} x >= {}",
            args.topk
        )));
    }

    if !Path::new(&args.graph_path).exists() {
        let builder = IndexBuilder::new("HNSW", dim, Metric::L2, 16, 200)?;
        let graph = builder.build(&base, n)?;
        graph.save(&args.graph_path)?;
    }
    let graph = DenseGraph::load(&args.graph_path)?;

    let mut searcher = AnySearcher::new(graph, dim, Metric::L2, args.level);
    searcher.set_data(&base, n, dim)?;
    searcher.optimize(args.num_threads);
    searcher.set_ef(args.search_ef)?;

    let mut best_qps = 0.0f64;
    for iter in 1..=args.iters {
        println!("iter : [{iter}/{}]", args.iters);

        let start = Instant::now();
        let pred = searcher.batch_search(&queries, nq, args.topk, args.num_threads)?;
        let elapsed = start.elapsed().as_secs_f64();
        let qps = nq as f64 / elapsed;
        best_qps = best_qps.max(qps);

        let mut hits = 0usize;
        for i in 0..nq {
            let truth: HashSet<i32> = gt[i * gt_k..i * gt_k + args.topk].iter().copied().collect();
            hits += pred[i * args.topk..(i + 1) * args.topk]
                .iter()
                .filter(|id| truth.contains(id))
                .count();
        }
        let recall = hits as f64 / (nq * args.topk) as f64;
        println!("\tRecall@{} = {recall:.4}, QPS = {qps:.2}", args.topk);
    }
    println!("Best QPS = {best_qps:.2}");
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let exit = parse_args().and_then(|args| run(&args));
    if let Err(e) = exit {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
