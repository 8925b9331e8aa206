//! Benchmarks for the chunk encode path (encrypt + fragment)
//!
//! Run with: cargo bench --package vaultfs-core

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use vaultfs_core::{
    Chunk, ErasureFragmenter, MapKey, SplitFragmenter, SymmetricKey, DEFAULT_CHUNK_SIZE,
};

/// Generate test data of specified size
fn generate_data(size: usize) -> Bytes {
    Bytes::from((0..size).map(|i| (i % 256) as u8).collect::<Vec<u8>>())
}

/// Benchmark chunk encryption at various chunk sizes
fn bench_encrypt(c: &mut Criterion) {
    let base_key = SymmetricKey::generate();
    let mut group = c.benchmark_group("chunk_encrypt");

    for size in [
        64 * 1024,       // 64 KB
        1024 * 1024,     // 1 MB
        DEFAULT_CHUNK_SIZE,
    ] {
        let chunk = Chunk::new(
            generate_data(size),
            &base_key,
            MapKey::random(),
            DEFAULT_CHUNK_SIZE,
        )
        .unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(
            BenchmarkId::new("aes_gcm", format!("{}KB", size / 1024)),
            &chunk,
            |b, chunk| b.iter(|| black_box(chunk).encrypt().unwrap()),
        );
    }

    group.finish();
}

/// Benchmark fragment generation with both fragmenters
fn bench_fragment(c: &mut Criterion) {
    let base_key = SymmetricKey::generate();
    let erasure = ErasureFragmenter::new().unwrap();
    let split = SplitFragmenter::default();

    let mut group = c.benchmark_group("chunk_fragment");

    for size in [1024 * 1024, DEFAULT_CHUNK_SIZE] {
        let chunk = Chunk::new(
            generate_data(size),
            &base_key,
            MapKey::random(),
            DEFAULT_CHUNK_SIZE,
        )
        .unwrap();
        let encrypted = chunk.encrypt().unwrap();
        let label = format!("{}MB", size / (1024 * 1024));

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("erasure", &label), &encrypted, |b, encrypted| {
            b.iter(|| encrypted.generate_fragments(black_box(&erasure)).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("split", &label), &encrypted, |b, encrypted| {
            b.iter(|| encrypted.generate_fragments(black_box(&split)).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_encrypt, bench_fragment);
criterion_main!(benches);
