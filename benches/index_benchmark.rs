use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use rand::Rng;
use tokio::runtime::Runtime;
use verbex::{CancellationToken, Index, IndexConfig, SearchOptions};

/// Helper to generate document content from a small vocabulary
fn generate_content(word_count: usize) -> String {
    let mut rng = rand::thread_rng();
    let words = [
        "the", "quick", "brown", "fox", "jumps", "over", "lazy", "dog", "search", "index",
        "document", "token", "query", "score", "term", "phrase",
    ];
    (0..word_count)
        .map(|_| words[rng.gen_range(0..words.len())])
        .collect::<Vec<_>>()
        .join(" ")
}

fn open_index(rt: &Runtime) -> Index {
    let index = Index::new(IndexConfig::new("bench")).unwrap();
    rt.block_on(index.open()).unwrap();
    index
}

/// Benchmark single document ingestion
fn bench_single_ingest(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let index = open_index(&rt);
    let cancel = CancellationToken::new();

    c.bench_function("single_document_ingest", |b| {
        let mut id = 0u64;
        b.iter(|| {
            let content = generate_content(100);
            rt.block_on(index.add_document(&format!("doc-{id}"), &content, &cancel))
                .unwrap();
            id += 1;
        });
    });
}

/// Benchmark search over corpora of increasing size
fn bench_search(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let cancel = CancellationToken::new();
    let mut group = c.benchmark_group("search");

    for corpus_size in [100usize, 1000].iter() {
        let index = open_index(&rt);
        for i in 0..*corpus_size {
            let content = generate_content(50);
            rt.block_on(index.add_document(&format!("doc-{i}"), &content, &cancel))
                .unwrap();
        }

        group.bench_with_input(
            BenchmarkId::from_parameter(corpus_size),
            corpus_size,
            |b, _| {
                b.iter(|| {
                    let results = rt
                        .block_on(index.search(
                            "quick fox",
                            &SearchOptions::default(),
                            &cancel,
                        ))
                        .unwrap();
                    black_box(results);
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_single_ingest, bench_search);
criterion_main!(benches);
