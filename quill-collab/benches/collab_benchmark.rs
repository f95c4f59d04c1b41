use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use quill_collab::broadcast::BroadcastGroup;
use quill_collab::protocol::SyncMessage;
use quill_collab::storage::{DocumentStore, StoreConfig};
use quill_collab::SubjectRef;
use quill_core::{SubjectConfig, SubjectSchema};
use serde_json::json;
use uuid::Uuid;
use yrs::{Doc, ReadTxn, Transact};

fn report_schema() -> SubjectSchema {
    let config: SubjectConfig = serde_json::from_value(json!({
        "kind": "report",
        "fields": [
            {"name": "title", "path": ["plain_fields", "title"], "kind": "scalar",
             "default": "", "copy_to": "stored_title"}
        ],
        "tags": {"copy_to": "tag_list"}
    }))
    .unwrap();
    SubjectSchema::from_config(&config).unwrap()
}

fn title_update(client: &Doc, schema: &SubjectSchema, title: &str) -> Vec<u8> {
    let sv = client.transact().state_vector();
    {
        let mut txn = client.transact_mut();
        schema.value("title").unwrap().set_any(&mut txn, title).unwrap();
    }
    client.transact().encode_state_as_update_v1(&sv)
}

fn bench_update_encode(c: &mut Criterion) {
    let origin = Uuid::new_v4();
    let update = vec![0u8; 64];

    c.bench_function("update_encode_64B", |b| {
        b.iter(|| {
            let msg = SyncMessage::update(black_box(origin), black_box(update.clone()));
            black_box(msg.encode().unwrap());
        })
    });
}

fn bench_update_decode(c: &mut Criterion) {
    let encoded = SyncMessage::update(Uuid::new_v4(), vec![0u8; 64]).encode().unwrap();

    c.bench_function("update_decode_64B", |b| {
        b.iter(|| {
            black_box(SyncMessage::decode(black_box(&encoded)).unwrap());
        })
    });
}

fn bench_broadcast_100_peers(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let msg = SyncMessage::update(Uuid::new_v4(), vec![0u8; 64]);

    c.bench_function("broadcast_100_peers", |b| {
        b.iter(|| {
            rt.block_on(async {
                let group = BroadcastGroup::new(1024);
                let mut receivers = Vec::new();
                for _ in 0..100 {
                    receivers.push(group.add_peer(Uuid::new_v4()).await);
                }
                black_box(group.broadcast(black_box(&msg)).unwrap());
            });
        })
    });
}

fn bench_persist_updates(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let store = DocumentStore::open(StoreConfig::for_testing(dir.path())).unwrap();
    let schema = report_schema();
    let subject = SubjectRef::new("report", 1);
    store.create_subject(&subject, &schema, None).unwrap();
    let client = store.load_document(&subject).unwrap();

    c.bench_function("persist_single_update", |b| {
        let mut revision = 0u64;
        b.iter(|| {
            revision += 1;
            let update = title_update(&client, &schema, &format!("revision {revision}"));
            black_box(store.persist_updates(&subject, Some(1), &[update], &schema).unwrap());
        })
    });
}

fn bench_replay_100_entries(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let store = DocumentStore::open(StoreConfig::for_testing(dir.path())).unwrap();
    let schema = report_schema();
    let subject = SubjectRef::new("report", 1);
    store.create_subject(&subject, &schema, None).unwrap();
    let client = store.load_document(&subject).unwrap();
    for i in 0..100 {
        let update = title_update(&client, &schema, &format!("t{i}"));
        store.persist_updates(&subject, None, &[update], &schema).unwrap();
    }
    let last = store.next_history_id().unwrap() - 1;

    c.bench_function("replay_100_entries", |b| {
        b.iter(|| {
            black_box(store.replay(&subject, black_box(last), true).unwrap());
        })
    });
}

criterion_group!(
    benches,
    bench_update_encode,
    bench_update_decode,
    bench_broadcast_100_peers,
    bench_persist_updates,
    bench_replay_100_entries,
);
criterion_main!(benches);
