//! Benchmark utilities for generating test documents.

use rand::Rng;

/// Generate nested order documents.
///
/// Each document has a nested `customer` object and an `items` array of
/// `items_per_doc` objects, so vertical flattening yields `items_per_doc`
/// rows and multi-table flattening yields `1 + items_per_doc` rows.
pub fn generate_documents(count: usize, items_per_doc: usize) -> Vec<String> {
    let mut rng = rand::rng();
    let sides = ["buy", "sell"];

    (0..count)
        .map(|i| {
            let items: Vec<String> = (0..items_per_doc)
                .map(|j| {
                    format!(
                        r#"{{"sku":"sku_{}","price":{:.2},"quantity":{}}}"#,
                        j,
                        rng.random_range(1.0..500.0),
                        rng.random_range(1..10)
                    )
                })
                .collect();
            format!(
                r#"{{"id":"order_{}","timestamp":{},"side":"{}","active":{},"customer":{{"name":"c{}","address":{{"city":"x","zip":"{:05}"}}}},"items":[{}]}}"#,
                i,
                1_700_000_000_000i64 + i as i64,
                sides[rng.random_range(0..2)],
                rng.random_bool(0.9),
                i % 100,
                i % 99_999,
                items.join(",")
            )
        })
        .collect()
}
