use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use election_ledger::crypto::{CredentialHasher, CryptoUtils, SecureMemory};
use rand::RngCore;
use std::hint::black_box;
use std::time::Duration;

/// Credential hashing benchmarks
/// Verification of known and unknown voters must cost the same
fn bench_credential_hashing(c: &mut Criterion) {
    let hasher = CredentialHasher::for_testing();

    let mut group = c.benchmark_group("credential_hash");
    group.warm_up_time(Duration::from_millis(100));
    group.measurement_time(Duration::from_secs(5));

    group.bench_function("hash", |b| {
        b.iter(|| hasher.hash(black_box("correct horse battery staple")))
    });

    // Test with different credential lengths
    for credential_len in [8, 32, 128, 512].iter() {
        let credential = "x".repeat(*credential_len);
        group.bench_with_input(
            BenchmarkId::new("variable_input", credential_len),
            credential_len,
            |b, _| b.iter(|| hasher.hash(black_box(&credential))),
        );
    }

    group.finish();
}

fn bench_timing_attack_resistance(c: &mut Criterion) {
    let hasher = CredentialHasher::for_testing();
    let stored = hasher.hash("correct horse battery staple");

    let mut group = c.benchmark_group("timing_resistance");
    group.warm_up_time(Duration::from_millis(100));
    group.measurement_time(Duration::from_secs(5));

    group.bench_function("verify_match", |b| {
        b.iter(|| hasher.verify(black_box(&stored), black_box("correct horse battery staple")))
    });

    group.bench_function("verify_mismatch", |b| {
        b.iter(|| hasher.verify(black_box(&stored), black_box("wrong horse battery staple!")))
    });

    // Unknown voters take the decoy path; should track the two above
    group.bench_function("verify_unknown_voter", |b| {
        b.iter(|| hasher.verify_decoy(black_box("correct horse battery staple")))
    });

    group.bench_function("random_credentials", |b| {
        b.iter_batched(
            || {
                let mut bytes = [0u8; 16];
                rand::thread_rng().fill_bytes(&mut bytes);
                hex::encode(bytes)
            },
            |credential| hasher.verify(black_box(&stored), black_box(&credential)),
            criterion::BatchSize::SmallInput,
        )
    });

    group.finish();
}

fn bench_chain_hashing(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain_hash");
    group.warm_up_time(Duration::from_millis(100));

    for entry_len in [128, 512, 2048].iter() {
        let content = vec![7u8; *entry_len];
        let previous = SecureMemory::secure_random_bytes::<32>();
        group.bench_with_input(BenchmarkId::new("entry", entry_len), entry_len, |b, _| {
            b.iter(|| CryptoUtils::chain_hash(black_box(&previous), black_box(&content)))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_credential_hashing,
    bench_timing_attack_resistance,
    bench_chain_hashing
);

criterion_main!(benches);
