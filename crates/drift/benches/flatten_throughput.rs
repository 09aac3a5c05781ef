//! Flattening throughput benchmarks.
//!
//! Measures documents per second for each strategy over the same nested
//! input, parsing included.

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use drift::flatten::{
    Flattener, HorizontalFlattener, MultiTableFlattener, SequentialIds, VerticalFlattener,
};

mod bench_utils;

fn flatten_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("flatten");

    let strategies: Vec<Arc<dyn Flattener>> = vec![
        Arc::new(HorizontalFlattener::new("_")),
        Arc::new(VerticalFlattener::new(None, true)),
        Arc::new(MultiTableFlattener::new(Arc::new(SequentialIds::new()))),
    ];

    for items in [1, 5, 20] {
        let documents = bench_utils::generate_documents(1_000, items);
        group.throughput(Throughput::Elements(documents.len() as u64));

        for flattener in &strategies {
            group.bench_with_input(
                BenchmarkId::new(flattener.name(), items),
                &documents,
                |b, documents| {
                    b.iter(|| {
                        let mut rows = 0usize;
                        for doc in documents {
                            rows += flattener.flatten("orders", doc).unwrap().len();
                        }
                        rows
                    });
                },
            );
        }
    }

    group.finish();
}

/// Vertical explosion of sibling arrays grows as the product of their lengths.
fn cross_product_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("vertical_cross_product");
    let flattener = VerticalFlattener::new(None, true);

    for len in [2, 4, 8] {
        let array: Vec<String> = (0..len).map(|i| i.to_string()).collect();
        let doc = format!(
            r#"{{"a":[{0}],"b":[{0}],"c":[{0}]}}"#,
            array.join(",")
        );
        group.throughput(Throughput::Elements((len * len * len) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(len), &doc, |b, doc| {
            b.iter(|| flattener.flatten("t", doc).unwrap().len());
        });
    }

    group.finish();
}

criterion_group!(benches, flatten_benchmarks, cross_product_benchmarks);
criterion_main!(benches);
