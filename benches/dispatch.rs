//! Dispatch Path Benchmarks
//!
//! Measures the three resolution tiers against each other:
//!
//! 1. **Static slot**: compiled-in descriptor lookup, no shared state
//! 2. **Cache hit**: type-keyed memo after one cold call
//! 3. **Cold path**: registry lookup plus cache population every call
//!
//! The spread between tiers is the whole point of the cache; the cold path
//! is forced by clearing the cache inside the timed loop.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use polyproto::{op_fn, Arity, Protocol, ProtocolRegistry, TypeBuilder, TypeRegistry, Value};
use std::sync::Arc;

// =============================================================================
// Benchmark Helpers
// =============================================================================

fn declare_fs(protocols: &ProtocolRegistry) -> Arc<Protocol> {
    protocols
        .declare("FileSystem", &[("ls", Arity::Exact(1))])
        .unwrap()
}

fn identity() -> polyproto::OpFn {
    op_fn(|recv, _args| Ok(recv.clone()))
}

// =============================================================================
// Dispatch Tier Benchmarks
// =============================================================================

fn bench_dispatch_tiers(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");

    group.bench_function("static_slot", |b| {
        let protocols = ProtocolRegistry::new();
        let types = TypeRegistry::new();
        let fs = declare_fs(&protocols);
        let ls = fs.operation("ls").unwrap();
        let ty = TypeBuilder::new("RemoteStore")
            .static_impl(&fs, "ls", identity())
            .unwrap()
            .build(&types);
        let recv = Value::instance(ty, Value::Int(1));
        let args = [Value::str("p")];

        b.iter(|| black_box(ls.invoke(black_box(&recv), &args).unwrap()));
    });

    group.bench_function("cache_hit", |b| {
        let protocols = ProtocolRegistry::new();
        let fs = declare_fs(&protocols);
        fs.register_binding("ls", Value::Int(0).type_id(), identity())
            .unwrap();
        let ls = fs.operation("ls").unwrap();
        let recv = Value::Int(1);
        let args = [Value::str("p")];
        // Warm the cache once.
        ls.invoke(&recv, &args).unwrap();

        b.iter(|| black_box(ls.invoke(black_box(&recv), &args).unwrap()));
    });

    group.bench_function("cold_path", |b| {
        let protocols = ProtocolRegistry::new();
        let fs = declare_fs(&protocols);
        fs.register_binding("ls", Value::Int(0).type_id(), identity())
            .unwrap();
        let ls = fs.operation("ls").unwrap();
        let recv = Value::Int(1);
        let args = [Value::str("p")];

        b.iter(|| {
            ls.clear_cache();
            black_box(ls.invoke(black_box(&recv), &args).unwrap())
        });
    });

    group.finish();
}

// =============================================================================
// Registration Benchmarks
// =============================================================================

fn bench_registration(c: &mut Criterion) {
    let mut group = c.benchmark_group("registration");

    group.bench_function("register_binding", |b| {
        let protocols = ProtocolRegistry::new();
        let fs = declare_fs(&protocols);
        let tid = Value::Int(0).type_id();

        b.iter(|| fs.register_binding("ls", black_box(tid), identity()).unwrap());
    });

    group.bench_function("registry_lookup", |b| {
        let protocols = ProtocolRegistry::new();
        let fs = declare_fs(&protocols);
        fs.register_binding("ls", Value::Int(0).type_id(), identity())
            .unwrap();
        let op = fs.op("ls").unwrap().id();
        let tid = Value::Int(0).type_id();

        b.iter(|| black_box(fs.lookup(op, black_box(tid))));
    });

    group.finish();
}

criterion_group!(benches, bench_dispatch_tiers, bench_registration);
criterion_main!(benches);
