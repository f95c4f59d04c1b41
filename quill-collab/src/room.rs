//! Live rooms: the in-memory document of a subject shared by all of its
//! connections, plus their broadcast group.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use yrs::Doc;

use crate::broadcast::{BroadcastGroup, Frame};
use crate::storage::{DocumentStore, StoreError};
use crate::subject::SubjectRef;
use crate::worker::ConnectionId;

pub struct Room {
    subject: SubjectRef,
    doc: Doc,
    group: BroadcastGroup,
}

impl Room {
    pub fn subject(&self) -> &SubjectRef {
        &self.subject
    }

    pub fn doc(&self) -> &Doc {
        &self.doc
    }

    pub fn group(&self) -> &BroadcastGroup {
        &self.group
    }
}

/// Rooms by [`SubjectRef::room_name`].
pub struct RoomManager {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    capacity: usize,
}

impl RoomManager {
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Add a connection to the subject's room, opening the room from the store if
    /// nobody is editing the subject yet.
    ///
    /// Lookup and registration happen under one write lock so a concurrent
    /// [`RoomManager::leave`] cannot drop the room in between.
    pub async fn join(
        &self,
        subject: &SubjectRef,
        connection_id: ConnectionId,
        store: &DocumentStore,
    ) -> Result<(Arc<Room>, broadcast::Receiver<Frame>), StoreError> {
        let name = subject.room_name();
        let mut rooms = self.rooms.write().await;

        let room = match rooms.get(&name) {
            Some(room) => room.clone(),
            None => {
                let doc = store.load_document(subject)?;
                let room = Arc::new(Room {
                    subject: subject.clone(),
                    doc,
                    group: BroadcastGroup::new(self.capacity),
                });
                rooms.insert(name.clone(), room.clone());
                log::info!("Opened room {name}");
                room
            }
        };

        let rx = room.group.add_peer(connection_id).await;
        Ok((room, rx))
    }

    /// Remove a connection and close the room once it is empty. Returns whether the
    /// room was closed.
    pub async fn leave(&self, subject: &SubjectRef, connection_id: &ConnectionId) -> bool {
        let name = subject.room_name();
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get(&name) else {
            return false;
        };
        room.group.remove_peer(connection_id).await;
        if room.group.peer_count().await == 0 {
            rooms.remove(&name);
            log::info!("Closed room {name} (empty)");
            return true;
        }
        false
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{report_schema, temp_store};
    use uuid::Uuid;

    #[tokio::test]
    async fn test_connections_share_one_room() {
        let (_dir, store) = temp_store();
        let subject = SubjectRef::new("report", 1);
        store.create_subject(&subject, &report_schema(), None).unwrap();
        let manager = RoomManager::new(16);

        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (room_a, _rx_a) = manager.join(&subject, a, &store).await.unwrap();
        let (room_b, _rx_b) = manager.join(&subject, b, &store).await.unwrap();
        assert!(Arc::ptr_eq(&room_a, &room_b));
        assert_eq!(manager.room_count().await, 1);
        assert_eq!(room_a.group().peer_count().await, 2);

        assert!(!manager.leave(&subject, &a).await);
        assert!(manager.leave(&subject, &b).await);
        assert_eq!(manager.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_missing_subject_opens_no_room() {
        let (_dir, store) = temp_store();
        let manager = RoomManager::new(16);
        let result = manager.join(&SubjectRef::new("report", 404), Uuid::new_v4(), &store).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
        assert_eq!(manager.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_rooms_are_isolated_per_subject() {
        let (_dir, store) = temp_store();
        let schema = report_schema();
        let first = SubjectRef::new("report", 1);
        let second = SubjectRef::new("report", 2);
        store.create_subject(&first, &schema, None).unwrap();
        store.create_subject(&second, &schema, None).unwrap();
        let manager = RoomManager::new(16);

        let (room_1, _rx1) = manager.join(&first, Uuid::new_v4(), &store).await.unwrap();
        let (room_2, _rx2) = manager.join(&second, Uuid::new_v4(), &store).await.unwrap();
        assert!(!Arc::ptr_eq(&room_1, &room_2));
        assert_eq!(room_2.subject(), &second);
        assert_eq!(manager.room_count().await, 2);
    }
}
