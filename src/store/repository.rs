use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use super::models::{
    validate_room_name, Message, Participant, Room, TypingState,
};
use crate::shared::SessionError;
use crate::stream::events::{Change, ChangeEvent, Channel};
use crate::stream::feed::{ChangeFeed, ChangeStreamClient};

/// The backing-store contract the sync engine consumes.
///
/// Snapshot queries return already-ordered data: messages ascending by
/// created_at (tie-break by id), participants ascending by joined_at. Writes
/// generate ids and timestamps on the writer side. The engine never talks to
/// storage any other way.
#[async_trait]
pub trait BackingStore: Send + Sync {
    async fn get_room(&self, room_id: &str) -> Result<Option<Room>, SessionError>;
    async fn list_messages(&self, room_id: &str) -> Result<Vec<Message>, SessionError>;
    async fn list_participants(&self, room_id: &str) -> Result<Vec<Participant>, SessionError>;

    /// Writes a new message; the stored row (with generated id and
    /// timestamp) is returned and also delivered to message subscribers.
    async fn insert_message(
        &self,
        room_id: &str,
        author_username: &str,
        content: &str,
    ) -> Result<Message, SessionError>;

    /// Adds a participant row; fails with `Conflict` if the username is
    /// already present in the room.
    async fn insert_participant(
        &self,
        room_id: &str,
        username: &str,
    ) -> Result<Participant, SessionError>;

    /// Removes a participant row; idempotent, removing an absent row is Ok
    async fn delete_participant(&self, room_id: &str, username: &str)
        -> Result<(), SessionError>;

    /// Overwrites the (room, username) typing row in place
    async fn upsert_typing(&self, state: TypingState) -> Result<(), SessionError>;

    /// Removes the (room, username) typing row; idempotent
    async fn delete_typing(&self, room_id: &str, username: &str) -> Result<(), SessionError>;
}

/// In-memory implementation of `BackingStore` for development and testing,
/// wired to a `ChangeFeed` so writes show up on the matching change streams.
pub struct InMemoryBackingStore {
    rooms: Mutex<HashMap<String, Room>>,
    /// room_id -> messages in insertion order
    messages: Mutex<HashMap<String, Vec<Message>>>,
    /// room_id -> participants in join order
    participants: Mutex<HashMap<String, Vec<Participant>>>,
    /// (room_id, username) -> typing row
    typing: Mutex<HashMap<(String, String), TypingState>>,
    feed: ChangeFeed,
}

impl Default for InMemoryBackingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackingStore {
    /// Creates a new empty in-memory store
    pub fn new() -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            messages: Mutex::new(HashMap::new()),
            participants: Mutex::new(HashMap::new()),
            typing: Mutex::new(HashMap::new()),
            feed: ChangeFeed::new(),
        }
    }

    /// The change feed fed by this store's writes
    pub fn feed(&self) -> ChangeFeed {
        self.feed.clone()
    }

    /// Creates a room, validating its name (3-50 trimmed characters).
    ///
    /// Room creation is collaborator glue, not part of the engine contract,
    /// but sessions need rooms to exist so the in-memory store offers it.
    #[instrument(skip(self))]
    pub async fn create_room(&self, name: &str) -> Result<Room, SessionError> {
        let name = validate_room_name(name)?;
        let room = Room::new(name);

        let mut rooms = self.rooms.lock().unwrap();
        rooms.insert(room.id.clone(), room.clone());

        info!(room_id = %room.id, name = %room.name, "Room created in memory");
        Ok(room)
    }
}

#[async_trait]
impl BackingStore for InMemoryBackingStore {
    #[instrument(skip(self))]
    async fn get_room(&self, room_id: &str) -> Result<Option<Room>, SessionError> {
        let rooms = self.rooms.lock().unwrap();
        let room = rooms.get(room_id).cloned();

        match &room {
            Some(r) => debug!(room_id = %room_id, name = %r.name, "Room found in memory"),
            None => debug!(room_id = %room_id, "Room not found in memory"),
        }

        Ok(room)
    }

    #[instrument(skip(self))]
    async fn list_messages(&self, room_id: &str) -> Result<Vec<Message>, SessionError> {
        let messages = self.messages.lock().unwrap();
        let mut snapshot = messages.get(room_id).cloned().unwrap_or_default();
        snapshot.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        debug!(room_id = %room_id, count = snapshot.len(), "Listed messages");
        Ok(snapshot)
    }

    #[instrument(skip(self))]
    async fn list_participants(&self, room_id: &str) -> Result<Vec<Participant>, SessionError> {
        let participants = self.participants.lock().unwrap();
        let mut snapshot = participants.get(room_id).cloned().unwrap_or_default();
        snapshot.sort_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        debug!(room_id = %room_id, count = snapshot.len(), "Listed participants");
        Ok(snapshot)
    }

    #[instrument(skip(self, content))]
    async fn insert_message(
        &self,
        room_id: &str,
        author_username: &str,
        content: &str,
    ) -> Result<Message, SessionError> {
        let message = Message::new(
            room_id.to_string(),
            author_username.to_string(),
            content.to_string(),
        );

        {
            let mut messages = self.messages.lock().unwrap();
            messages
                .entry(room_id.to_string())
                .or_default()
                .push(message.clone());
        }

        debug!(
            room_id = %room_id,
            author = %author_username,
            message_id = %message.id,
            "Message inserted in memory"
        );
        self.feed
            .emit(ChangeEvent::Message(Change::Insert(message.clone())))
            .await;
        Ok(message)
    }

    #[instrument(skip(self))]
    async fn insert_participant(
        &self,
        room_id: &str,
        username: &str,
    ) -> Result<Participant, SessionError> {
        let participant = {
            let mut participants = self.participants.lock().unwrap();
            let rows = participants.entry(room_id.to_string()).or_default();

            if rows.iter().any(|p| p.username == username) {
                warn!(room_id = %room_id, username = %username, "Username already in room");
                return Err(SessionError::Conflict(format!(
                    "username {username} is already taken in this room"
                )));
            }

            let participant = Participant::new(room_id.to_string(), username.to_string());
            rows.push(participant.clone());
            participant
        };

        info!(
            room_id = %room_id,
            username = %username,
            participant_id = %participant.id,
            "Participant joined room"
        );
        self.feed
            .emit(ChangeEvent::Participant(Change::Insert(participant.clone())))
            .await;
        Ok(participant)
    }

    #[instrument(skip(self))]
    async fn delete_participant(
        &self,
        room_id: &str,
        username: &str,
    ) -> Result<(), SessionError> {
        let removed = {
            let mut participants = self.participants.lock().unwrap();
            let rows = match participants.get_mut(room_id) {
                Some(rows) => rows,
                None => return Ok(()),
            };
            match rows.iter().position(|p| p.username == username) {
                Some(index) => Some(rows.remove(index)),
                None => None,
            }
        };

        if let Some(participant) = removed {
            info!(room_id = %room_id, username = %username, "Participant left room");
            self.feed
                .emit(ChangeEvent::Participant(Change::Delete(participant)))
                .await;
        } else {
            debug!(room_id = %room_id, username = %username, "Participant already absent");
        }
        Ok(())
    }

    #[instrument(skip(self, state))]
    async fn upsert_typing(&self, state: TypingState) -> Result<(), SessionError> {
        let previous = {
            let mut typing = self.typing.lock().unwrap();
            typing.insert(
                (state.room_id.clone(), state.username.clone()),
                state.clone(),
            )
        };

        debug!(
            room_id = %state.room_id,
            username = %state.username,
            is_typing = state.is_typing,
            "Typing row upserted"
        );
        let change = if previous.is_some() {
            Change::Update(state)
        } else {
            Change::Insert(state)
        };
        self.feed.emit(ChangeEvent::Typing(change)).await;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_typing(&self, room_id: &str, username: &str) -> Result<(), SessionError> {
        let removed = {
            let mut typing = self.typing.lock().unwrap();
            typing.remove(&(room_id.to_string(), username.to_string()))
        };

        if let Some(state) = removed {
            debug!(room_id = %room_id, username = %username, "Typing row deleted");
            self.feed
                .emit(ChangeEvent::Typing(Change::Delete(state)))
                .await;
        }
        Ok(())
    }
}

#[async_trait]
impl ChangeStreamClient for InMemoryBackingStore {
    async fn subscribe(
        &self,
        channel: Channel,
        room_id: &str,
    ) -> Result<broadcast::Receiver<ChangeEvent>, SessionError> {
        Ok(self.feed.subscribe(channel, room_id).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn create_and_get_room() {
        let store = InMemoryBackingStore::new();
        let room = store.create_room("lounge").await.unwrap();

        let fetched = store.get_room(&room.id).await.unwrap();
        assert_eq!(fetched, Some(room));
    }

    #[tokio::test]
    async fn create_room_rejects_short_name() {
        let store = InMemoryBackingStore::new();
        let result = store.create_room("  x ").await;
        assert!(matches!(result, Err(SessionError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn get_nonexistent_room() {
        let store = InMemoryBackingStore::new();
        let fetched = store.get_room("nonexistent").await.unwrap();
        assert!(fetched.is_none());
    }

    #[tokio::test]
    async fn insert_participant_rejects_duplicate_username() {
        let store = InMemoryBackingStore::new();
        let room = store.create_room("lounge").await.unwrap();

        store.insert_participant(&room.id, "ana").await.unwrap();
        let result = store.insert_participant(&room.id, "ana").await;

        assert!(matches!(result, Err(SessionError::Conflict(_))));
        let rows = store.list_participants(&room.id).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn same_username_allowed_in_different_rooms() {
        let store = InMemoryBackingStore::new();
        let room1 = store.create_room("lounge").await.unwrap();
        let room2 = store.create_room("kitchen").await.unwrap();

        store.insert_participant(&room1.id, "ana").await.unwrap();
        store.insert_participant(&room2.id, "ana").await.unwrap();
    }

    #[tokio::test]
    async fn delete_participant_is_idempotent() {
        let store = InMemoryBackingStore::new();
        let room = store.create_room("lounge").await.unwrap();

        store.insert_participant(&room.id, "ana").await.unwrap();
        store.delete_participant(&room.id, "ana").await.unwrap();
        store.delete_participant(&room.id, "ana").await.unwrap();

        let rows = store.list_participants(&room.id).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn list_messages_orders_by_created_at_then_id() {
        let store = InMemoryBackingStore::new();
        let room = store.create_room("lounge").await.unwrap();

        let now = Utc::now();
        let mut m1 = Message::new(room.id.clone(), "ana".to_string(), "first".to_string());
        let mut m2 = Message::new(room.id.clone(), "bo".to_string(), "second".to_string());
        // Force a created_at tie so ordering falls back to id
        m1.created_at = now;
        m2.created_at = now;
        m1.id = "b".to_string();
        m2.id = "a".to_string();
        {
            let mut messages = store.messages.lock().unwrap();
            messages.insert(room.id.clone(), vec![m1.clone(), m2.clone()]);
        }

        let snapshot = store.list_messages(&room.id).await.unwrap();
        assert_eq!(snapshot, vec![m2, m1]);
    }

    #[tokio::test]
    async fn writes_reach_subscribers() {
        let store = InMemoryBackingStore::new();
        let room = store.create_room("lounge").await.unwrap();
        let mut messages = store.feed().subscribe(Channel::Messages, &room.id).await;
        let mut participants = store
            .feed()
            .subscribe(Channel::Participants, &room.id)
            .await;

        store.insert_participant(&room.id, "ana").await.unwrap();
        store.insert_message(&room.id, "ana", "hello").await.unwrap();

        let event = messages.recv().await.unwrap();
        assert!(matches!(
            event,
            ChangeEvent::Message(Change::Insert(ref m)) if m.content == "hello"
        ));
        let event = participants.recv().await.unwrap();
        assert!(matches!(
            event,
            ChangeEvent::Participant(Change::Insert(ref p)) if p.username == "ana"
        ));
    }

    #[tokio::test]
    async fn typing_upsert_then_delete_emits_insert_update_delete() {
        let store = InMemoryBackingStore::new();
        let room = store.create_room("lounge").await.unwrap();
        let mut typing = store.feed().subscribe(Channel::Typing, &room.id).await;

        let state = TypingState {
            room_id: room.id.clone(),
            username: "ana".to_string(),
            is_typing: true,
            updated_at: Utc::now(),
        };
        store.upsert_typing(state.clone()).await.unwrap();
        store.upsert_typing(state.clone()).await.unwrap();
        store.delete_typing(&room.id, "ana").await.unwrap();
        // A second delete is idempotent and emits nothing
        store.delete_typing(&room.id, "ana").await.unwrap();

        assert!(matches!(
            typing.recv().await.unwrap(),
            ChangeEvent::Typing(Change::Insert(_))
        ));
        assert!(matches!(
            typing.recv().await.unwrap(),
            ChangeEvent::Typing(Change::Update(_))
        ));
        assert!(matches!(
            typing.recv().await.unwrap(),
            ChangeEvent::Typing(Change::Delete(_))
        ));
        assert!(matches!(
            typing.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }
}
