use criterion::{criterion_group, criterion_main, Criterion};
use proximity_mesh::loopback::{LoopbackCall, RecordingSurface};
use proximity_mesh::mesh::identity::sanitize;
use proximity_mesh::mesh::registry::{CallHandle, PeerRegistry};
use proximity_mesh::mesh::render::RenderSink;
use proximity_mesh::Direction;
use std::hint::black_box;
use std::sync::Arc;

fn bench_sanitize(c: &mut Criterion) {
    let ids: Vec<String> = (0..64)
        .map(|i| format!("room:lobby/{}-{}", i, uuid::Uuid::new_v4()))
        .collect();

    c.bench_function("sanitize_session_ids", |b| {
        b.iter(|| {
            for id in &ids {
                black_box(sanitize(black_box(id)));
            }
        })
    });
}

fn bench_registry_churn(c: &mut Criterion) {
    let registry = PeerRegistry::new();
    let surface = Arc::new(RecordingSurface::default());
    let peers: Vec<_> = (0..32).map(|i| sanitize(&format!("peer-{}", i))).collect();

    c.bench_function("registry_reserve_commit_remove_32", |b| {
        b.iter(|| {
            for peer in &peers {
                if registry.try_reserve(Direction::Outgoing, peer) {
                    let call = LoopbackCall::new(peer.clone(), Direction::Outgoing);
                    let sink = RenderSink::new(surface.clone(), peer.clone(), false);
                    let handle = CallHandle::new(peer.clone(), Direction::Outgoing, call, sink);
                    let _ = registry.commit(handle);
                }
            }
            for peer in &peers {
                black_box(registry.remove(Direction::Outgoing, peer));
            }
        })
    });
}

criterion_group!(benches, bench_sanitize, bench_registry_churn);
criterion_main!(benches);
