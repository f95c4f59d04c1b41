//! End-to-end tests: a real server on a free port, real WebSocket editors.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;
use yrs::updates::encoder::Encode;
use yrs::{Doc, ReadTxn, Transact, TransactionMut};

use quill_collab::{
    apply_update, DocumentStore, MessageType, RelayContext, SaveWorker, ServerConfig,
    StoreConfig, SubjectRef, SyncMessage, SyncServer, TokenGrant, TokenTable, WorkerConfig,
    NOT_FOUND_CLOSE_CODE,
};
use quill_core::{SchemaRegistry, SubjectConfig, SubjectSchema, Tags};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn report_config() -> SubjectConfig {
    serde_json::from_value(json!({
        "kind": "report",
        "fields": [
            {"name": "title", "path": ["plain_fields", "title"], "kind": "scalar",
             "default": "", "copy_to": "stored_title"}
        ],
        "tags": {"copy_to": "tag_list"}
    }))
    .unwrap()
}

fn report_schema() -> SubjectSchema {
    SubjectSchema::from_config(&report_config()).unwrap()
}

fn title_of(doc: &Doc) -> String {
    report_schema().value("title").unwrap().get_string(&doc.transact())
}

fn has_tag(doc: &Doc, tag: &str) -> bool {
    let txn = doc.transact();
    Tags::get(&txn).is_some_and(|tags| tags.contains(&txn, tag))
}

struct TestServer {
    addr: SocketAddr,
    store: Arc<DocumentStore>,
    ctx: Arc<RelayContext>,
    _dir: TempDir,
}

/// Start a server whose store holds `report/1`.
async fn start_test_server(debounce_ms: u64) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(DocumentStore::open(StoreConfig::for_testing(dir.path())).unwrap());
    store
        .create_subject(&SubjectRef::new("report", 1), &report_schema(), None)
        .unwrap();

    let schemas = Arc::new(SchemaRegistry::from_config(&[report_config()]).unwrap());
    let (worker, _task) = SaveWorker::spawn(store.clone(), schemas, WorkerConfig { debounce_ms });
    let policy = Arc::new(TokenTable::new([
        TokenGrant { token: "alice".into(), author: 1, kinds: vec![] },
        TokenGrant { token: "bob".into(), author: 2, kinds: vec!["report".into()] },
    ]));
    let config = ServerConfig {
        bind_addr: "127.0.0.1:0".into(),
        broadcast_capacity: 64,
        flush_timeout_ms: 5_000,
    };
    let server = SyncServer::new(config, store.clone(), worker, policy);
    let ctx = server.context();
    let (addr, _) = server.spawn("127.0.0.1:0").await.unwrap();

    TestServer {
        addr,
        store,
        ctx,
        _dir: dir,
    }
}

async fn next_message(ws: &mut Client) -> SyncMessage {
    loop {
        let msg = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("no frame within 2s")
            .expect("stream ended")
            .unwrap();
        if let Message::Binary(data) = msg {
            return SyncMessage::decode(&data).unwrap();
        }
    }
}

/// A client-side replica speaking the sync protocol.
struct Editor {
    ws: Client,
    doc: Doc,
}

impl Editor {
    async fn connect(addr: SocketAddr, route: &str) -> Self {
        let (mut ws, _) = connect_async(format!("ws://{addr}{route}")).await.unwrap();
        let doc = Doc::new();

        let opening = next_message(&mut ws).await;
        assert_eq!(opening.msg_type, MessageType::SyncStep1);

        let ask = SyncMessage::sync_step1(Uuid::nil(), doc.transact().state_vector().encode_v1());
        ws.send(Message::Binary(ask.encode().unwrap().into())).await.unwrap();
        let reply = next_message(&mut ws).await;
        assert_eq!(reply.msg_type, MessageType::SyncStep2);
        apply_update(&doc, &reply.payload).unwrap();

        Self { ws, doc }
    }

    async fn edit(&mut self, f: impl FnOnce(&mut TransactionMut<'_>)) {
        let sv = self.doc.transact().state_vector();
        {
            let mut txn = self.doc.transact_mut();
            f(&mut txn);
        }
        let update = self.doc.transact().encode_state_as_update_v1(&sv);
        self.send_raw(SyncMessage::update(Uuid::nil(), update).encode().unwrap()).await;
    }

    async fn set_title(&mut self, title: &str) {
        let schema = report_schema();
        self.edit(|txn| schema.value("title").unwrap().set_any(txn, title).unwrap()).await;
    }

    async fn send_raw(&mut self, bytes: Vec<u8>) {
        self.ws.send(Message::Binary(bytes.into())).await.unwrap();
    }

    /// Wait for the next update from the server and apply it.
    async fn receive(&mut self) -> SyncMessage {
        let msg = next_message(&mut self.ws).await;
        if msg.carries_update() {
            apply_update(&self.doc, &msg.payload).unwrap();
        }
        msg
    }

    async fn close(mut self) {
        let _ = self.ws.close(None).await;
        while let Ok(Some(Ok(_))) = timeout(Duration::from_secs(2), self.ws.next()).await {}
    }
}

async fn wait_for_history(store: &DocumentStore, subject: &SubjectRef, len: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while store.history_for(subject, false).unwrap().len() < len {
        assert!(Instant::now() < deadline, "history never reached {len} entries");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_unknown_subject_is_closed_with_4404() {
    let server = start_test_server(50).await;

    for route in ["/report/99?token=alice", "/report/1?token=mallory", "/report/1", "/nowhere"] {
        let (mut ws, _) = connect_async(format!("ws://{}{route}", server.addr)).await.unwrap();
        let msg = timeout(Duration::from_secs(2), ws.next()).await.unwrap().unwrap().unwrap();
        match msg {
            Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), NOT_FOUND_CLOSE_CODE),
            other => panic!("expected a close frame for {route}, got {other:?}"),
        }
    }
    assert_eq!(server.ctx.stats().rejected_connections, 4);
    assert_eq!(server.ctx.rooms.room_count().await, 0);
}

#[tokio::test]
async fn test_edits_reach_other_editors() {
    let server = start_test_server(50).await;
    let mut alice = Editor::connect(server.addr, "/report/1?token=alice").await;
    let mut bob = Editor::connect(server.addr, "/report/1?token=bob").await;

    alice.set_title("Draft").await;
    let msg = bob.receive().await;
    assert_eq!(msg.msg_type, MessageType::Update);
    assert_eq!(title_of(&bob.doc), "Draft");

    // no echo back to the author
    assert!(timeout(Duration::from_millis(200), alice.ws.next()).await.is_err());
    assert_eq!(server.ctx.rooms.room_count().await, 1);
}

#[tokio::test]
async fn test_late_joiner_receives_current_state() {
    let server = start_test_server(50).await;
    let mut alice = Editor::connect(server.addr, "/report/1?token=alice").await;
    alice.set_title("Existing").await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let bob = Editor::connect(server.addr, "/report/1?token=bob").await;
    assert_eq!(title_of(&bob.doc), "Existing");
}

#[tokio::test]
async fn test_disconnect_flushes_buffered_edits() {
    // a debounce long enough that only the disconnect can trigger the save
    let server = start_test_server(60_000).await;
    let subject = SubjectRef::new("report", 1);

    let mut alice = Editor::connect(server.addr, "/report/1?token=alice").await;
    alice.set_title("Before close").await;
    alice.close().await;

    wait_for_history(&server.store, &subject, 2).await;
    let history = server.store.history_for(&subject, false).unwrap();
    assert_eq!(history[1].author, Some(1));
    assert_eq!(
        server.store.shadow_value(&subject, "stored_title").unwrap(),
        Some(json!("Before close"))
    );
}

#[tokio::test]
async fn test_malformed_frames_are_ignored() {
    let server = start_test_server(50).await;
    let mut alice = Editor::connect(server.addr, "/report/1?token=alice").await;
    let mut bob = Editor::connect(server.addr, "/report/1?token=bob").await;

    alice.send_raw(vec![0xff, 0x00, 0x13]).await;
    alice
        .send_raw(SyncMessage::update(Uuid::nil(), vec![0xff, 0xff, 0xff]).encode().unwrap())
        .await;
    alice.set_title("Still here").await;

    bob.receive().await;
    assert_eq!(title_of(&bob.doc), "Still here");
    assert_eq!(server.ctx.stats().malformed_frames, 2);
}

#[tokio::test]
async fn test_concurrent_title_and_tags() {
    let server = start_test_server(60_000).await;
    let subject = SubjectRef::new("report", 1);
    let mut alice = Editor::connect(server.addr, "/report/1?token=alice").await;
    let mut bob = Editor::connect(server.addr, "/report/1?token=bob").await;

    alice.set_title("Draft").await;
    bob.edit(|txn| Tags::get_or_insert(txn).insert(txn, "urgent")).await;
    alice.close().await;
    bob.close().await;

    wait_for_history(&server.store, &subject, 3).await;
    let doc = server.store.load_document(&subject).unwrap();
    assert_eq!(title_of(&doc), "Draft");
    assert!(has_tag(&doc, "urgent"));

    // one entry per independent flush, each replaying to a partial state
    let history = server.store.history_for(&subject, false).unwrap();
    assert_eq!(history.len(), 3);
    let first = server.store.replay(&subject, history[1].id, true).unwrap();
    let partial = (title_of(&first) == "Draft") as u8 + has_tag(&first, "urgent") as u8;
    assert_eq!(partial, 1);
    let last = server.store.replay(&subject, history[2].id, true).unwrap();
    assert_eq!(title_of(&last), "Draft");
    assert!(has_tag(&last, "urgent"));
}
