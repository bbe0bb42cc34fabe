//! Benchmarks for entry conversion and id allocation.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use statestore::convert;
use statestore::model::{Block, ChangedFields, EntryRecord, FileEntry, NamespaceEntry, Snapshot};
use statestore::namespace::OwnerPermissionResolver;
use statestore::oracle::{LocalOracle, TimestampOracle};
use statestore::store::CreateFile;
use statestore::types::{FileHeader, PermissionWord};

fn file_with_blocks(blocks: u64) -> NamespaceEntry {
    let mut file: FileEntry = CreateFile {
        parent_id: 1,
        id: 2,
        name: "part-00000.parquet".to_string(),
        permission: PermissionWord::pack(0, 0, 0o644),
        modification_time: 1_700_000_000_000,
        access_time: 1_700_000_000_000,
        header: FileHeader::pack(3, 128 * 1024 * 1024, 0).unwrap(),
        lease: None,
    }
    .into_entry();
    file.blocks = (0..blocks).map(|i| Block::new(1000 + i, i + 1, 2)).collect();
    NamespaceEntry::File(file)
}

fn bench_materialize(c: &mut Criterion) {
    let resolver = OwnerPermissionResolver::new("hdfs", "supergroup");
    let mut group = c.benchmark_group("materialize");

    for blocks in [0u64, 16, 256].iter() {
        let record = EntryRecord::from(&file_with_blocks(*blocks));
        group.throughput(Throughput::Elements(*blocks));
        group.bench_with_input(BenchmarkId::from_parameter(blocks), blocks, |b, _| {
            b.iter(|| convert::materialize(black_box(&record), &resolver))
        });
    }
    group.finish();
}

fn bench_diff(c: &mut Criterion) {
    let previous = file_with_blocks(256);
    let mut current = previous.clone();
    current.attrs_mut().access_time += 1;

    c.bench_function("diff_256_blocks", |b| {
        b.iter(|| convert::diff(black_box(&previous), black_box(&current)))
    });
}

fn bench_snapshot_encode(c: &mut Criterion) {
    let entry = file_with_blocks(256);
    let mut group = c.benchmark_group("snapshot_encode");

    for (label, changed) in [
        ("attributes", ChangedFields::ATTRIBUTES),
        ("all", ChangedFields::ALL),
    ] {
        let snapshot = Snapshot::new(entry.clone(), changed);
        group.bench_function(label, |b| {
            b.iter(|| serde_json::to_vec(&EntryRecord::from_snapshot(black_box(&snapshot))))
        });
    }
    group.finish();
}

fn bench_local_oracle(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let oracle = LocalOracle::default();

    c.bench_function("local_oracle_batch_64", |b| {
        b.to_async(&runtime).iter(|| oracle.next_batch(black_box(64)))
    });
}

criterion_group!(
    benches,
    bench_materialize,
    bench_diff,
    bench_snapshot_encode,
    bench_local_oracle
);
criterion_main!(benches);
