// Throughput of the LMDB graph primitives
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use followgraph_storage::LmdbGraph;

const MAP_SIZE: usize = 256 * 1024 * 1024;

fn open_graph() -> (tempfile::TempDir, LmdbGraph) {
    let dir = tempfile::tempdir().unwrap();
    let graph = LmdbGraph::open(dir.path(), MAP_SIZE).unwrap();
    (dir, graph)
}

fn populated(users: i64) -> (tempfile::TempDir, LmdbGraph) {
    let (dir, graph) = open_graph();
    for id in 0..users {
        graph.upsert_node(id).unwrap();
    }
    (dir, graph)
}

fn benchmark_upsert_node(c: &mut Criterion) {
    let mut group = c.benchmark_group("upsert_node");

    for size in [100i64, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("fresh", size), size, |b, &size| {
            let (_dir, graph) = open_graph();
            let mut next = 0i64;
            b.iter(|| {
                for _ in 0..size {
                    graph.upsert_node(black_box(next)).unwrap();
                    next += 1;
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("repeat", size), size, |b, &size| {
            let (_dir, graph) = populated(size);
            b.iter(|| {
                for id in 0..size {
                    graph.upsert_node(black_box(id)).unwrap();
                }
            });
        });
    }

    group.finish();
}

fn benchmark_upsert_edge(c: &mut Criterion) {
    let mut group = c.benchmark_group("upsert_edge");

    for size in [100i64, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("fan_in", size), size, |b, &size| {
            let (_dir, graph) = populated(size + 1);
            b.iter(|| {
                for follower in 1..=size {
                    black_box(graph.upsert_edge(follower, 0).unwrap());
                }
            });
        });
    }

    group.bench_function("missing_endpoint", |b| {
        let (_dir, graph) = populated(1);
        b.iter(|| black_box(graph.upsert_edge(0, black_box(1)).unwrap()));
    });

    group.finish();
}

fn benchmark_lookups(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup");
    let (_dir, graph) = populated(10_000);
    for follower in 1..1000 {
        graph.upsert_edge(follower, 0).unwrap();
    }

    group.bench_function("node_exists", |b| {
        let mut id = 0i64;
        b.iter(|| {
            id = (id + 7919) % 20_000;
            black_box(graph.node_exists(black_box(id)).unwrap())
        });
    });

    group.bench_function("followers_1k", |b| {
        b.iter(|| black_box(graph.followers(black_box(0)).unwrap()));
    });

    group.finish();
}

fn benchmark_delete_cascade(c: &mut Criterion) {
    let mut group = c.benchmark_group("delete_node");

    group.bench_function("with_1k_followers", |b| {
        b.iter_batched(
            || {
                let (dir, graph) = populated(1001);
                for follower in 1..=1000 {
                    graph.upsert_edge(follower, 0).unwrap();
                }
                (dir, graph)
            },
            |(_dir, graph)| black_box(graph.delete_node(0).unwrap()),
            criterion::BatchSize::LargeInput,
        );
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_upsert_node,
    benchmark_upsert_edge,
    benchmark_lookups,
    benchmark_delete_cascade
);
criterion_main!(benches);
