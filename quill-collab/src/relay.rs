//! Per-connection sync relay.
//!
//! ```text
//! Connecting ──handshake──► Authorizing ──subject + token ok──► Active
//!                                │                                │
//!                                │ missing / refused (4404)       │ close, error
//!                                ▼                                ▼
//!                              Closed ◄──────────────────────── Closing
//!                                          flush, unobserve
//! ```
//!
//! While active, frames from the client are applied to the room's document
//! in a transaction whose origin is this connection. The document's update
//! observer runs inside that transaction, so it only records the encoded
//! delta; the relay drains those records after each frame, broadcasting them
//! to the room and forwarding them to the save worker.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Origin, ReadTxn, StateVector, Subscription, Transact, Update};

use crate::auth::AccessPolicy;
use crate::broadcast::Frame;
use crate::protocol::{MessageType, ProtocolError, SyncMessage};
use crate::room::{Room, RoomManager};
use crate::storage::{DocumentStore, StoreError};
use crate::subject::{AuthorId, SubjectRef};
use crate::worker::{ConnectionId, DocUpdated, WorkerHandle};

/// Close code sent when the subject does not exist or may not be edited.
pub const NOT_FOUND_CLOSE_CODE: u16 = 4404;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("cannot observe document: {0}")]
    Observer(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Connecting,
    Authorizing,
    Active,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub rejected_connections: u64,
    pub frames_received: u64,
    pub malformed_frames: u64,
}

#[derive(Default)]
struct AtomicRelayStats {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    rejected_connections: AtomicU64,
    frames_received: AtomicU64,
    malformed_frames: AtomicU64,
}

/// Everything a connection needs, shared by all of them.
pub struct RelayContext {
    pub store: Arc<DocumentStore>,
    pub rooms: RoomManager,
    pub worker: WorkerHandle,
    pub policy: Arc<dyn AccessPolicy>,
    /// Upper bound on waiting for the final save when a connection closes
    pub flush_timeout: Duration,
    stats: AtomicRelayStats,
}

impl RelayContext {
    pub fn new(
        store: Arc<DocumentStore>,
        worker: WorkerHandle,
        policy: Arc<dyn AccessPolicy>,
        broadcast_capacity: usize,
        flush_timeout: Duration,
    ) -> Self {
        Self {
            store,
            rooms: RoomManager::new(broadcast_capacity),
            worker,
            policy,
            flush_timeout,
            stats: AtomicRelayStats::default(),
        }
    }

    pub fn stats(&self) -> RelayStats {
        let s = &self.stats;
        RelayStats {
            total_connections: s.total_connections.load(Ordering::Relaxed),
            active_connections: s.active_connections.load(Ordering::Relaxed),
            rejected_connections: s.rejected_connections.load(Ordering::Relaxed),
            frames_received: s.frames_received.load(Ordering::Relaxed),
            malformed_frames: s.malformed_frames.load(Ordering::Relaxed),
        }
    }
}

/// Route and credentials captured during the handshake.
#[derive(Debug, Default)]
struct Handshake {
    path: String,
    token: Option<String>,
}

impl Handshake {
    fn capture(request: &Request) -> Self {
        let bearer = request
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_string);
        let query = request.uri().query().and_then(|q| {
            q.split('&')
                .find_map(|pair| pair.strip_prefix("token="))
                .map(str::to_string)
        });
        Self {
            path: request.uri().path().to_string(),
            token: bearer.or(query),
        }
    }
}

type Socket = WebSocketStream<TcpStream>;
type Sink = SplitSink<Socket, Message>;

/// Edits recorded by the update observer, waiting to be forwarded.
type UpdateBuffer = Arc<Mutex<Vec<Vec<u8>>>>;

fn drain(buffer: &UpdateBuffer) -> Vec<Vec<u8>> {
    match buffer.lock() {
        Ok(mut pending) => std::mem::take(&mut *pending),
        Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
    }
}

struct Connection {
    id: ConnectionId,
    addr: SocketAddr,
    state: RelayState,
    ctx: Arc<RelayContext>,
}

impl Connection {
    fn transition(&mut self, next: RelayState) {
        log::trace!("Connection {} ({}): {:?} -> {:?}", self.id, self.addr, self.state, next);
        self.state = next;
    }
}

/// Drive one accepted TCP stream through its whole lifecycle.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    ctx: Arc<RelayContext>,
) -> Result<(), RelayError> {
    let mut conn = Connection {
        id: Uuid::new_v4(),
        addr,
        state: RelayState::Connecting,
        ctx,
    };
    conn.ctx.stats.total_connections.fetch_add(1, Ordering::Relaxed);

    let mut handshake = Handshake::default();
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        handshake = Handshake::capture(request);
        Ok(response)
    };
    let ws = tokio_tungstenite::accept_hdr_async(stream, callback).await?;
    log::info!("WebSocket connection {} established from {addr} ({})", conn.id, handshake.path);

    conn.transition(RelayState::Authorizing);
    let Some((subject, author)) = authorize(&conn.ctx, &handshake) else {
        return reject(&mut conn, ws, &handshake.path).await;
    };

    let (room, rx) = match conn.ctx.rooms.join(&subject, conn.id, &conn.ctx.store).await {
        Ok(joined) => joined,
        // deleted between the existence check and the join
        Err(StoreError::NotFound(_)) => return reject(&mut conn, ws, &handshake.path).await,
        Err(e) => return Err(e.into()),
    };

    conn.transition(RelayState::Active);
    conn.ctx.stats.active_connections.fetch_add(1, Ordering::Relaxed);
    log::info!("Connection {} editing {subject} as {author:?}", conn.id);

    let buffer: UpdateBuffer = Arc::default();
    let result = match observe(&conn, &room, &buffer) {
        Ok(subscription) => {
            let result = run_active(&conn, ws, &room, rx, &buffer, author).await;
            conn.transition(RelayState::Closing);
            // final save, then the observer goes away
            match tokio::time::timeout(conn.ctx.flush_timeout, conn.ctx.worker.flush_and_wait(conn.id)).await {
                Ok(Some(outcome)) => log::debug!("Final flush for {}: {outcome:?}", conn.id),
                Ok(None) => log::warn!("Save worker stopped before final flush of {}", conn.id),
                Err(_) => log::warn!(
                    "Final flush for {} still running after {:?}",
                    conn.id,
                    conn.ctx.flush_timeout
                ),
            }
            drop(subscription);
            result
        }
        Err(e) => {
            conn.transition(RelayState::Closing);
            Err(e)
        }
    };

    conn.ctx.rooms.leave(&subject, &conn.id).await;
    conn.ctx.stats.active_connections.fetch_sub(1, Ordering::Relaxed);
    conn.transition(RelayState::Closed);
    log::info!("Connection {} closed from {addr}", conn.id);

    result
}

fn authorize(ctx: &RelayContext, handshake: &Handshake) -> Option<(SubjectRef, Option<AuthorId>)> {
    let subject = SubjectRef::parse_route(&handshake.path)?;
    match ctx.store.subject_exists(&subject) {
        Ok(true) => {}
        Ok(false) => return None,
        Err(e) => {
            log::error!("Cannot check {subject}: {e}");
            return None;
        }
    }
    let author = ctx.policy.authorize(handshake.token.as_deref(), &subject)?;
    Some((subject, Some(author)))
}

async fn reject(conn: &mut Connection, mut ws: Socket, path: &str) -> Result<(), RelayError> {
    log::info!("Rejecting connection {} for {path}: not found or not permitted", conn.id);
    conn.ctx.stats.rejected_connections.fetch_add(1, Ordering::Relaxed);

    let frame = CloseFrame {
        code: CloseCode::Library(NOT_FOUND_CLOSE_CODE),
        reason: Utf8Bytes::from_static("not found"),
    };
    ws.send(Message::Close(Some(frame))).await?;
    // wait briefly for the client's close reply
    let _ = tokio::time::timeout(Duration::from_secs(1), async {
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;

    conn.transition(RelayState::Closed);
    Ok(())
}

/// Record every delta produced by a transaction originating from `conn`.
///
/// Runs synchronously inside the mutation, so it only buffers.
fn observe(conn: &Connection, room: &Room, buffer: &UpdateBuffer) -> Result<Subscription, RelayError> {
    let buffer = buffer.clone();
    let own = origin_of(conn.id);
    room.doc()
        .observe_update_v1(move |txn, event| {
            if txn.origin() == Some(&own) {
                if let Ok(mut pending) = buffer.lock() {
                    pending.push(event.update.clone());
                }
            }
        })
        .map_err(|e| RelayError::Observer(e.to_string()))
}

fn origin_of(id: ConnectionId) -> Origin {
    Origin::from(id.as_bytes().as_slice())
}

async fn run_active(
    conn: &Connection,
    ws: Socket,
    room: &Room,
    mut rx: broadcast::Receiver<Frame>,
    buffer: &UpdateBuffer,
    author: Option<AuthorId>,
) -> Result<(), RelayError> {
    let (mut sink, mut stream) = ws.split();
    let origin = origin_of(conn.id);

    let state_vector = room.doc().transact().state_vector().encode_v1();
    send(&mut sink, &SyncMessage::sync_step1(Uuid::nil(), state_vector)).await?;

    let result = loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        conn.ctx.stats.frames_received.fetch_add(1, Ordering::Relaxed);
                        let handled = handle_frame(conn, &mut sink, room, &origin, &data).await;
                        forward(conn, room, buffer, author);
                        if let Err(e) = handled {
                            break Err(e);
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sink.send(Message::Pong(data)).await {
                            break Err(e.into());
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::warn!("WebSocket error on {}: {e}", conn.id);
                        break Ok(());
                    }
                }
            }

            frame = rx.recv() => {
                match frame {
                    Ok(frame) if frame.origin == conn.id => {}
                    Ok(frame) => {
                        if let Err(e) = sink.send(Message::Binary(frame.bytes.to_vec().into())).await {
                            break Err(e.into());
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        // missed updates; resend the whole state, merging is idempotent
                        log::warn!("Connection {} lagged by {n} frames, resyncing", conn.id);
                        let state = room.doc().transact().encode_state_as_update_v1(&StateVector::default());
                        if let Err(e) = send(&mut sink, &SyncMessage::sync_step2(Uuid::nil(), state)).await {
                            break Err(e);
                        }
                    }
                    Err(RecvError::Closed) => break Ok(()),
                }
            }
        }
    };

    // edits applied right before the connection went away
    forward(conn, room, buffer, author);
    let _ = sink.close().await;
    result
}

/// Apply one client frame. Malformed frames are logged and have no effect.
async fn handle_frame(
    conn: &Connection,
    sink: &mut Sink,
    room: &Room,
    origin: &Origin,
    data: &[u8],
) -> Result<(), RelayError> {
    let msg = match SyncMessage::decode(data) {
        Ok(msg) => msg,
        Err(e) => {
            malformed(conn, &e.to_string());
            return Ok(());
        }
    };

    match msg.msg_type {
        MessageType::SyncStep1 => match StateVector::decode_v1(&msg.payload) {
            Ok(remote) => {
                let diff = room.doc().transact().encode_state_as_update_v1(&remote);
                send(sink, &SyncMessage::sync_step2(Uuid::nil(), diff)).await?;
            }
            Err(e) => malformed(conn, &e.to_string()),
        },
        MessageType::SyncStep2 | MessageType::Update => {
            let applied = Update::decode_v1(&msg.payload)
                .map_err(|e| e.to_string())
                .and_then(|update| {
                    room.doc()
                        .transact_mut_with(origin.clone())
                        .apply_update(update)
                        .map_err(|e| e.to_string())
                });
            if let Err(e) = applied {
                malformed(conn, &e);
            }
        }
        MessageType::Ping => send(sink, &SyncMessage::pong(Uuid::nil())).await?,
        MessageType::Pong => {}
    }
    Ok(())
}

fn malformed(conn: &Connection, reason: &str) {
    conn.ctx.stats.malformed_frames.fetch_add(1, Ordering::Relaxed);
    log::warn!("Ignoring malformed frame from {}: {reason}", conn.id);
}

/// Broadcast and hand to the save worker everything the observer recorded.
fn forward(conn: &Connection, room: &Room, buffer: &UpdateBuffer, author: Option<AuthorId>) {
    for update in drain(buffer) {
        if let Err(e) = room.group().broadcast(&SyncMessage::update(conn.id, update.clone())) {
            log::error!("Cannot encode update from {}: {e}", conn.id);
        }
        conn.ctx.worker.doc_updated(DocUpdated {
            connection_id: conn.id,
            subject: room.subject().clone(),
            author,
            update,
        });
    }
}

async fn send(sink: &mut Sink, msg: &SyncMessage) -> Result<(), RelayError> {
    sink.send(Message::Binary(msg.encode()?.into())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str, auth: Option<&str>) -> Request {
        let mut builder = Request::builder().uri(uri);
        if let Some(auth) = auth {
            builder = builder.header("Authorization", auth);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn test_handshake_reads_bearer_header() {
        let hs = Handshake::capture(&request("/report/3", Some("Bearer alice")));
        assert_eq!(hs.path, "/report/3");
        assert_eq!(hs.token.as_deref(), Some("alice"));
    }

    #[test]
    fn test_handshake_reads_query_token() {
        let hs = Handshake::capture(&request("/report/3?x=1&token=bob", None));
        assert_eq!(hs.path, "/report/3");
        assert_eq!(hs.token.as_deref(), Some("bob"));

        let hs = Handshake::capture(&request("/report/3", Some("Basic abc")));
        assert_eq!(hs.token, None);
    }

    #[test]
    fn test_drain_empties_buffer() {
        let buffer: UpdateBuffer = Arc::default();
        buffer.lock().unwrap().push(vec![1]);
        buffer.lock().unwrap().push(vec![2]);
        assert_eq!(drain(&buffer), vec![vec![1], vec![2]]);
        assert!(drain(&buffer).is_empty());
    }
}
