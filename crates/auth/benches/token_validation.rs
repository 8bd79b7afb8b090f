use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use std::sync::Arc;

use chrono::{Duration, Utc};
use keyward_auth::{KeyRing, Principal, Role, SigningKey, TokenConfig, TokenService};
use keyward_core::{BackendKind, TokenType};

fn service() -> (Arc<KeyRing>, TokenService) {
    let ring = KeyRing::arc(SigningKey::generate());
    let tokens = TokenService::new(ring.clone(), TokenConfig::default());
    (ring, tokens)
}

fn principal(role_count: usize) -> Principal {
    Principal::new("bench-user", BackendKind::Local)
        .with_roles((0..role_count).map(|i| Role::new(format!("role-{i}"))))
}

/// Per-request access-token validation with a growing role claim.
fn bench_access_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("access_validation");
    group.throughput(Throughput::Elements(1));

    let (_ring, tokens) = service();
    let now = Utc::now();

    for role_count in [0usize, 4, 32].iter() {
        let issued = tokens.issue_access(&principal(*role_count), now).expect("issue");
        group.bench_with_input(BenchmarkId::from_parameter(role_count), &issued.token, |b, token| {
            b.iter(|| tokens.validate(black_box(token), TokenType::Access, now).expect("valid"));
        });
    }

    group.finish();
}

/// Validation of a token signed by the previous key during the grace window.
fn bench_previous_key_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("previous_key_validation");

    let (ring, tokens) = service();
    let now = Utc::now();
    let issued = tokens.issue_access(&principal(4), now).expect("issue");
    ring.rotate(SigningKey::generate(), now + Duration::seconds(1));
    let later = now + Duration::seconds(2);

    group.bench_function("within_grace", |b| {
        b.iter(|| tokens.validate(black_box(&issued.token), TokenType::Access, later).expect("valid"));
    });

    group.finish();
}

fn bench_issue_pair(c: &mut Criterion) {
    let (_ring, tokens) = service();
    let p = principal(4);
    let now = Utc::now();

    c.bench_function("issue_access_and_refresh", |b| {
        b.iter(|| {
            let access = tokens.issue_access(black_box(&p), now).expect("issue");
            let refresh = tokens.issue_refresh(black_box(&p), now).expect("issue");
            black_box((access, refresh))
        });
    });
}

criterion_group!(
    benches,
    bench_access_validation,
    bench_previous_key_validation,
    bench_issue_pair
);
criterion_main!(benches);
