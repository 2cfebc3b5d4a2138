use criterion::{black_box, criterion_group, criterion_main, Criterion};
use cdml_core::{ComponentModel, Facet};
use cdml_sync::broadcast::SubscriptionHub;
use cdml_sync::protocol::ServerMessage;
use cdml_sync::reconcile::{Action, ProjectState};
use cdml_sync::storage::ProjectSnapshot;

fn sample(name: &str) -> ComponentModel {
    let mut model = ComponentModel::blank(name, format!("{name}.cdml"));
    let interface = model.interface.get_or_insert_with(Default::default);
    for i in 0..8 {
        interface.facets.push(Facet::new("api", format!("GET /{name}/{i}")));
    }
    model
}

fn bench_message_encode(c: &mut Criterion) {
    let msg = ServerMessage::FileChanged {
        file: "cache.cdml".into(),
        component: Some(sample("cache")),
    };

    c.bench_function("file_changed_encode", |b| {
        b.iter(|| black_box(msg.encode().unwrap()))
    });
}

fn bench_message_decode(c: &mut Criterion) {
    let encoded = ServerMessage::FileChanged {
        file: "cache.cdml".into(),
        component: Some(sample("cache")),
    }
    .encode()
    .unwrap();

    c.bench_function("file_changed_decode", |b| {
        b.iter(|| black_box(ServerMessage::decode(black_box(&encoded)).unwrap()))
    });
}

fn bench_hub_fanout(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let hub = SubscriptionHub::new();
    let mut receivers = Vec::new();
    rt.block_on(async {
        for _ in 0..100 {
            receivers.push(hub.register().await.1);
        }
    });
    let msg = ServerMessage::FileDeleted {
        file: "cache.cdml".into(),
    };

    c.bench_function("hub_broadcast_100_peers", |b| {
        b.iter(|| {
            rt.block_on(async {
                black_box(hub.broadcast(black_box(&msg)).await.unwrap());
            });
            for rx in receivers.iter_mut() {
                while rx.try_recv().is_ok() {}
            }
        })
    });
}

fn bench_reduce_echo(c: &mut Criterion) {
    let components: Vec<ComponentModel> =
        (0..200).map(|i| sample(&format!("c{i}"))).collect();
    let edited = sample("c100");

    c.bench_function("reduce_edit_and_echo_200_docs", |b| {
        b.iter(|| {
            let mut state = ProjectState::new();
            state.reduce(Action::Loaded(ProjectSnapshot {
                name: "bench".into(),
                components: components.clone(),
            }));
            state.reduce(Action::Edit(edited.clone()));
            black_box(state.reduce(Action::Remote(ServerMessage::FileChanged {
                file: edited.file.clone(),
                component: Some(edited.clone()),
            })));
        })
    });
}

criterion_group!(
    benches,
    bench_message_encode,
    bench_message_decode,
    bench_hub_fanout,
    bench_reduce_echo,
);
criterion_main!(benches);
