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

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use quiver_index::{simd, AnySearcher, IndexBuilder, Metric, QuantLevel};

fn random_vec(n: usize, rng: &mut StdRng) -> Vec<f32> {
    (0..n).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
}

fn bench_kernels(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(42);
    let mut group = c.benchmark_group("kernels");

    for dim in [128usize, 768, 1536] {
        let a = random_vec(dim, &mut rng);
        let b = random_vec(dim, &mut rng);
        group.bench_with_input(BenchmarkId::new("l2sqr_f32", dim), &dim, |bench, _| {
            bench.iter(|| simd::l2sqr_f32(black_box(&a), black_box(&b)))
        });
        group.bench_with_input(BenchmarkId::new("ip_f32", dim), &dim, |bench, _| {
            bench.iter(|| simd::ip_f32(black_box(&a), black_box(&b)))
        });

        let code_a: Vec<u8> = (0..dim).map(|_| rng.gen()).collect();
        let code_b: Vec<u8> = (0..dim).map(|_| rng.gen()).collect();
        group.bench_with_input(BenchmarkId::new("l2sqr_u8", dim), &dim, |bench, _| {
            bench.iter(|| simd::l2sqr_u8(black_box(&code_a), black_box(&code_b)))
        });
        group.bench_with_input(BenchmarkId::new("l2sqr_u4", dim), &dim, |bench, _| {
            bench.iter(|| {
                simd::l2sqr_u4(black_box(&code_a[..dim / 2]), black_box(&code_b[..dim / 2]), dim)
            })
        });
    }
    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let (n, dim) = (10_000, 128);
    let mut rng = StdRng::seed_from_u64(42);
    let data = random_vec(n * dim, &mut rng);

    let builder = IndexBuilder::new("HNSW", dim, Metric::L2, 16, 200)
        .unwrap()
        .with_seed(42);

    let mut group = c.benchmark_group("search");
    group.sample_size(20);

    for level in [QuantLevel::Fp32, QuantLevel::Sq8] {
        let graph = builder.build(&data, n).unwrap();
        let mut searcher =
            AnySearcher::with_data(graph, &data, n, dim, Metric::L2, level).unwrap();
        searcher.set_ef(64).unwrap();

        let query = random_vec(dim, &mut rng);
        group.bench_function(BenchmarkId::new("top10", level.name()), |bench| {
            bench.iter(|| searcher.search_topk(black_box(&query), 10).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_kernels, bench_search);
criterion_main!(benches);
