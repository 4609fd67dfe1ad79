//! Benchmarks `GraphQuery`'s hot paths against a seeded in-memory store,
//! grounded on the teacher's `benches/queries.rs` criterion harness shape.

use claude_knowledge::{GraphQuery, Store, ValidatedDepth};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tokio::runtime::Runtime;

fn seed(rt: &Runtime, entity_count: usize) -> Store {
    rt.block_on(async {
        let store = Store::open_in_memory().await.expect("open store");
        store
            .transaction(move |tx| {
                for i in 0..entity_count {
                    tx.execute(
                        "INSERT INTO code_entities (id, package, file_path, kind, name, line, exported) VALUES (?1, 'pkg', ?2, 'function', ?3, 1, 1)",
                        rusqlite::params![format!("pkg:f{i}.ts:function:f{i}"), format!("f{i}.ts"), format!("f{i}")],
                    )?;
                    if i > 0 {
                        tx.execute(
                            "INSERT INTO code_relationships (from_id, to_id, rel_type) VALUES (?1, ?2, 'calls')",
                            rusqlite::params![
                                format!("pkg:f{}.ts:function:f{}", i - 1, i - 1),
                                format!("pkg:f{i}.ts:function:f{i}")
                            ],
                        )?;
                    }
                }
                Ok(())
            })
            .await
            .expect("seed entities");
        store
    })
}

fn bench_blast_radius(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    let store = seed(&rt, 500);
    let query = GraphQuery::new(store);
    let depth = ValidatedDepth::new(10).unwrap();

    c.bench_function("blast_radius_chain_500", |b| {
        b.iter(|| {
            rt.block_on(async {
                let rows = query.blast_radius(black_box("f0.ts"), depth).await.unwrap();
                black_box(rows.len())
            })
        })
    });
}

fn bench_what_calls(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    let store = seed(&rt, 500);
    let query = GraphQuery::new(store);

    c.bench_function("what_calls_chain_500", |b| {
        b.iter(|| {
            rt.block_on(async {
                let rows = query.what_calls(black_box("f250")).await.unwrap();
                black_box(rows.len())
            })
        })
    });
}

criterion_group!(benches, bench_blast_radius, bench_what_calls);
criterion_main!(benches);
