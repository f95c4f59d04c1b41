//! Debounced persistence worker.
//!
//! ```text
//! relay ──doc_updated──► ┌──────────────────────────────┐
//!                        │ pending: conn → PendingState │──timer──┐
//! relay ──doc_flush────► │ in_flight: conn → save task  │◄────────┘
//!                        └──────────────┬───────────────┘
//!                                       │ spawn_blocking
//!                                       ▼
//!                         DocumentStore::persist_updates
//! ```
//!
//! Buffers are keyed by connection, not by subject: a reconnecting client
//! gets a fresh connection id, and two editors of one subject save
//! independently. Their saves commute, and the store's row lock serializes
//! them. Saves for one connection run in order; different connections save
//! concurrently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use quill_core::{SchemaRegistry, SubjectSchema};

use crate::storage::{DocumentStore, PersistOutcome};
use crate::subject::{AuthorId, SubjectRef};

pub type ConnectionId = Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Quiet period after the last update before a save, in milliseconds
    pub debounce_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { debounce_ms: 1_000 }
    }
}

impl WorkerConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// An update produced on one connection.
#[derive(Debug, Clone)]
pub struct DocUpdated {
    pub connection_id: ConnectionId,
    pub subject: SubjectRef,
    pub author: Option<AuthorId>,
    pub update: Vec<u8>,
}

#[derive(Debug)]
pub enum WorkerMessage {
    DocUpdated(DocUpdated),
    DocFlush {
        connection_id: ConnectionId,
        ack: Option<oneshot::Sender<FlushOutcome>>,
    },
}

/// What a flush did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was buffered.
    Empty,
    /// The buffered updates did not change the stored document.
    Unchanged,
    Saved { history_id: u64 },
    /// The updates build on edits another connection has not saved yet;
    /// the store keeps them until it has.
    Deferred,
    /// The subject no longer exists; the buffer was dropped.
    Abandoned,
    /// The save failed and was logged.
    Failed,
}

/// Sending side of the worker channel.
#[derive(Clone)]
pub struct WorkerHandle {
    tx: mpsc::UnboundedSender<WorkerMessage>,
}

impl WorkerHandle {
    /// Returns `false` once the worker has stopped.
    pub fn doc_updated(&self, update: DocUpdated) -> bool {
        self.tx.send(WorkerMessage::DocUpdated(update)).is_ok()
    }

    pub fn flush(&self, connection_id: ConnectionId) -> bool {
        self.tx
            .send(WorkerMessage::DocFlush { connection_id, ack: None })
            .is_ok()
    }

    /// Flush and wait until everything this connection buffered is saved.
    /// `None` when the worker has stopped.
    pub async fn flush_and_wait(&self, connection_id: ConnectionId) -> Option<FlushOutcome> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(WorkerMessage::DocFlush {
                connection_id,
                ack: Some(ack),
            })
            .ok()?;
        done.await.ok()
    }
}

/// Updates buffered for one connection. Every update in a buffer shares
/// its subject and author, so one history entry can name them.
struct PendingState {
    subject: SubjectRef,
    author: Option<AuthorId>,
    updates: Vec<Vec<u8>>,
    timer: Option<JoinHandle<()>>,
}

pub struct SaveWorker {
    store: Arc<DocumentStore>,
    schemas: Arc<SchemaRegistry>,
    config: WorkerConfig,
    rx: mpsc::UnboundedReceiver<WorkerMessage>,
    /// Timers hold a weak sender so they never keep the worker alive
    timer_tx: mpsc::WeakUnboundedSender<WorkerMessage>,
    pending: HashMap<ConnectionId, PendingState>,
    in_flight: HashMap<ConnectionId, JoinHandle<()>>,
}

impl SaveWorker {
    /// Start the worker. It runs until every [`WorkerHandle`] is dropped,
    /// then saves whatever is still buffered and exits.
    pub fn spawn(
        store: Arc<DocumentStore>,
        schemas: Arc<SchemaRegistry>,
        config: WorkerConfig,
    ) -> (WorkerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = SaveWorker {
            store,
            schemas,
            config,
            rx,
            timer_tx: tx.downgrade(),
            pending: HashMap::new(),
            in_flight: HashMap::new(),
        };
        let task = tokio::spawn(worker.run());
        (WorkerHandle { tx }, task)
    }

    async fn run(mut self) {
        log::info!("Save worker started (debounce {}ms)", self.config.debounce_ms);

        while let Some(msg) = self.rx.recv().await {
            self.in_flight.retain(|_, task| !task.is_finished());
            match msg {
                WorkerMessage::DocUpdated(update) => self.on_update(update),
                WorkerMessage::DocFlush { connection_id, ack } => self.flush(connection_id, ack),
            }
        }

        let remaining: Vec<ConnectionId> = self.pending.keys().copied().collect();
        log::info!("Save worker stopping, flushing {} pending buffers", remaining.len());
        for connection_id in remaining {
            self.flush(connection_id, None);
        }
        for (_, task) in self.in_flight.drain() {
            let _ = task.await;
        }
    }

    fn on_update(&mut self, update: DocUpdated) {
        let connection_id = update.connection_id;

        // a buffer holds one subject and one author; save it before rebinding
        if matches!(
            self.pending.get(&connection_id),
            Some(state) if state.subject != update.subject || state.author != update.author
        ) {
            self.flush(connection_id, None);
        }

        let state = self
            .pending
            .entry(connection_id)
            .or_insert_with(|| PendingState {
                subject: update.subject.clone(),
                author: update.author,
                updates: Vec::new(),
                timer: None,
            });
        state.updates.push(update.update);
        log::trace!(
            "Buffered update for {} from {connection_id} ({} pending)",
            state.subject,
            state.updates.len()
        );

        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        let debounce = self.config.debounce();
        let tx = self.timer_tx.clone();
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(WorkerMessage::DocFlush { connection_id, ack: None });
            }
        }));
    }

    fn flush(&mut self, connection_id: ConnectionId, ack: Option<oneshot::Sender<FlushOutcome>>) {
        let mut pending = self.pending.remove(&connection_id);
        if let Some(timer) = pending.as_mut().and_then(|state| state.timer.take()) {
            timer.abort();
        }
        let previous = self.in_flight.remove(&connection_id);

        if pending.is_none() && previous.is_none() {
            if let Some(ack) = ack {
                let _ = ack.send(FlushOutcome::Empty);
            }
            return;
        }

        let store = self.store.clone();
        let schemas = self.schemas.clone();
        let task = tokio::spawn(async move {
            // keep saves of one connection in receipt order
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            let outcome = match pending {
                Some(state) => save(store, schemas, connection_id, state).await,
                None => FlushOutcome::Empty,
            };
            if let Some(ack) = ack {
                let _ = ack.send(outcome);
            }
        });
        self.in_flight.insert(connection_id, task);
    }
}

async fn save(
    store: Arc<DocumentStore>,
    schemas: Arc<SchemaRegistry>,
    connection_id: ConnectionId,
    state: PendingState,
) -> FlushOutcome {
    let PendingState {
        subject,
        author,
        updates,
        ..
    } = state;
    if updates.is_empty() {
        return FlushOutcome::Empty;
    }

    let schema = schemas
        .get(&subject.kind)
        .unwrap_or_else(|| Arc::new(SubjectSchema::new(&subject.kind)));
    let count = updates.len();
    let target = subject.clone();
    let result = tokio::task::spawn_blocking(move || {
        store.persist_updates(&target, author, &updates, &schema)
    })
    .await;

    match result {
        Ok(Ok(PersistOutcome::Saved { history_id })) => {
            log::info!("Saved {count} updates to {subject} from {connection_id} (history {history_id})");
            FlushOutcome::Saved { history_id }
        }
        Ok(Ok(PersistOutcome::Deferred)) => {
            log::debug!("Parked {count} updates to {subject} from {connection_id} until their dependencies are saved");
            FlushOutcome::Deferred
        }
        Ok(Ok(PersistOutcome::Unchanged)) => {
            log::debug!("{count} updates to {subject} from {connection_id} changed nothing");
            FlushOutcome::Unchanged
        }
        Ok(Ok(PersistOutcome::SubjectMissing)) => {
            log::warn!("Abandoned {count} updates from {connection_id}: {subject} no longer exists");
            FlushOutcome::Abandoned
        }
        Ok(Err(e)) => {
            log::error!("Failed to save {count} updates to {subject} from {connection_id}: {e}");
            FlushOutcome::Failed
        }
        Err(e) => {
            log::error!("Save task for {subject} panicked: {e}");
            FlushOutcome::Failed
        }
    }
}
