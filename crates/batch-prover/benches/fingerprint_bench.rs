// crates/batch-prover/benches/fingerprint_bench.rs
//
// Every task pays the cost of `cache::fingerprint` regardless of cache
// outcome (§4.7 step 1 runs before the cache lookup can short-circuit
// anything downstream), so it is the one pipeline step worth benchmarking
// across a range of theory-file sizes.

use std::path::PathBuf;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use batch_prover::cache::{fingerprint, FingerprintInput};

fn write_theory_file(dir: &std::path::Path, name: &str, size_bytes: usize) -> PathBuf {
    let path = dir.join(name);
    let mut contents = String::from("theory Bench begin\n");
    while contents.len() < size_bytes {
        contents.push_str("rule Step: [ Fr(~x) ] --[ Step(~x) ]-> [ Out(~x) ]\n");
    }
    contents.push_str("lemma secrecy: \"All x #i. Step(x) @ i ==> not (Ex #j. K(x) @ j)\"\nend\n");
    std::fs::write(&path, contents).unwrap();
    path
}

fn bench_fingerprint(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let mut group = c.benchmark_group("fingerprint");

    for (name, size) in [
        ("1kib", 1024),
        ("64kib", 64 * 1024),
        ("1mib", 1024 * 1024),
    ] {
        let theory_file = write_theory_file(dir.path(), &format!("{name}.spthy"), size);
        group.bench_function(name, |b| {
            b.iter(|| {
                let input = FingerprintInput {
                    target_identity: "/usr/bin/tamarin-prover",
                    theory_file: black_box(&theory_file),
                    lemma: Some("secrecy"),
                    prover_options: &[],
                    preprocess_flags: &[],
                    max_cores: 4,
                    max_memory_gib: 16,
                    timeout_seconds: 3600,
                };
                black_box(fingerprint(&input).unwrap())
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_fingerprint);
criterion_main!(benches);
