//! Benchmark for storage class parameter resolution

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use glusterfs_simple_provisioner::{ConfigResolver, VolumeRequest};
use std::collections::BTreeMap;

fn params(hosts: usize) -> BTreeMap<String, String> {
    let paths: Vec<String> = (0..hosts).map(|i| format!("host-{}:/data/bricks", i)).collect();
    BTreeMap::from([
        ("brickRootPaths".to_string(), paths.join(", ")),
        ("namespace".to_string(), "glusterfs".to_string()),
        ("volumeType".to_string(), "replica 3".to_string()),
        ("resturl".to_string(), "http://ignored".to_string()),
    ])
}

fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("config_resolver");
    group.throughput(Throughput::Elements(1));

    for hosts in [3usize, 32] {
        let input = params(hosts);
        group.bench_function(format!("resolve_{}_hosts", hosts), |b| {
            b.iter(|| ConfigResolver::resolve(black_box(&input)))
        });
    }

    group.finish();
}

fn bench_brick_targets(c: &mut Criterion) {
    let mut group = c.benchmark_group("config_resolver");
    let config = ConfigResolver::resolve(&params(32)).expect("valid parameters");
    let request = VolumeRequest::new("ns1", "pvc-0000", config);

    group.bench_function("brick_targets_32_hosts", |b| {
        b.iter(|| black_box(&request).brick_targets())
    });

    group.finish();
}

criterion_group!(benches, bench_resolve, bench_brick_targets);
criterion_main!(benches);
