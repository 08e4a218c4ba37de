use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use meerdag::data::MemoryProvider;
use meerdag::{AlgorithmKind, CandidateBlock, DagConfig, Hash, MeerDag, MemoryStore};
use std::sync::Arc;

// ============================================================================
// Helpers
// ============================================================================

fn new_dag(kind: AlgorithmKind) -> (MeerDag, Arc<MemoryProvider>) {
    let provider = Arc::new(MemoryProvider::new());
    let config = DagConfig { k: Some(18), ..DagConfig::with_algorithm(kind) };
    let dag = MeerDag::open(config, Arc::new(MemoryStore::new()), provider.clone()).unwrap();
    (dag, provider)
}

fn add(dag: &MeerDag, provider: &MemoryProvider, hash: Hash, parents: Vec<Hash>) {
    let mut block = CandidateBlock::new(hash, parents.clone());
    if !parents.is_empty() {
        block = block.main_parent(dag.select_main_parent(&parents).unwrap());
    }
    let block = Arc::new(block);
    provider.insert(block.clone());
    dag.add_block(block).unwrap();
}

/// Every round adds `width` blocks, each merging all tips of the previous round
fn build_layers(kind: AlgorithmKind, rounds: u32, width: u32) -> (MeerDag, Arc<MemoryProvider>) {
    let (dag, provider) = new_dag(kind);
    add(&dag, &provider, Hash::digest(b"genesis"), vec![]);
    for round in 0..rounds {
        let tips = dag.tips();
        for i in 0..width {
            let hash = Hash::digest(format!("{}-{}", round, i).as_bytes());
            add(&dag, &provider, hash, tips.clone());
        }
    }
    (dag, provider)
}

// ============================================================================
// Insertion Benchmarks
// ============================================================================

fn bench_insertion(c: &mut Criterion) {
    let mut group = c.benchmark_group("insertion");

    for kind in [AlgorithmKind::Phantom, AlgorithmKind::Ghostdag] {
        for width in [1u32, 4] {
            let blocks = 50 * u64::from(width);
            group.throughput(Throughput::Elements(blocks));
            group.bench_with_input(BenchmarkId::new(kind.name(), format!("width-{}", width)), &width, |b, &width| {
                b.iter(|| {
                    let (dag, _) = build_layers(kind, 50, width);
                    black_box(dag.block_total());
                });
            });
        }
    }

    group.finish();
}

// ============================================================================
// Commit Benchmarks
// ============================================================================

fn bench_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit");

    for kind in [AlgorithmKind::Phantom, AlgorithmKind::Ghostdag] {
        group.bench_function(kind.name(), |b| {
            b.iter_batched(
                || build_layers(kind, 20, 3),
                |(dag, _)| black_box(dag.commit().unwrap()),
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

// ============================================================================
// Query Benchmarks
// ============================================================================

fn bench_maturity(c: &mut Criterion) {
    let mut group = c.benchmark_group("maturity");
    let (dag, _provider) = build_layers(AlgorithmKind::Ghostdag, 100, 3);
    let targets: Vec<Hash> = dag.ordered_hashes(0, 120);

    for parallel in [false, true] {
        group.bench_with_input(BenchmarkId::new("check_blue_and_mature", parallel), &parallel, |b, &parallel| {
            b.iter(|| black_box(dag.check_blue_and_mature(&targets, &[], 10, parallel).unwrap()));
        });
    }

    group.bench_function("graph_state", |b| b.iter(|| black_box(dag.get_graph_state())));

    group.finish();
}

criterion_group!(benches, bench_insertion, bench_commit, bench_maturity);
criterion_main!(benches);
