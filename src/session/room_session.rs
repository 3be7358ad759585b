use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::message_stream::MessageStream;
use super::presence::PresenceTracker;
use super::typing::{TypingCoordinator, TYPING_INACTIVITY_TIMEOUT};
use super::view::RoomView;
use crate::shared::SessionError;
use crate::store::models::{
    validate_message_content, validate_room_id, validate_username, Message, Room,
};
use crate::store::repository::BackingStore;
use crate::stream::events::{Change, ChangeEvent, Channel};
use crate::stream::feed::ChangeStreamClient;

/// Observable health of a live session.
///
/// A dropped change stream is reported here as `Disconnected`; the engine
/// does not auto-retry, reconnection is a fresh `join` by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Live,
    Disconnected,
    Closed,
}

enum Command {
    LocalTyping,
}

/// One local user's live membership in one room.
///
/// `join` is the only constructor, so a session that exists is past its
/// `Idle`/`Joining` states: it is `Live` until `leave` (or drop) closes it.
/// All view state lives in a worker task that processes commands, the three
/// change streams, the typing deadline and the staleness sweep strictly one
/// at a time, then republishes the consolidated `RoomView` on a watch
/// channel.
pub struct RoomSession {
    room: Room,
    username: String,
    store: Arc<dyn BackingStore>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    view_rx: watch::Receiver<RoomView>,
    status_rx: watch::Receiver<SessionStatus>,
    worker: Option<JoinHandle<()>>,
}

impl RoomSession {
    /// Joins a room: validates inputs, registers the participant row, opens
    /// the three change subscriptions, seeds the view from the snapshot and
    /// starts the worker.
    ///
    /// Fails with `InvalidInput` before any network call on malformed
    /// username or room id, `NotFound` if the room does not exist,
    /// `Conflict` if the username is already a participant, and `Network`
    /// on store failure. Any failure after the participant row was written
    /// best-effort removes it again, so a retry starts clean.
    pub async fn join(
        store: Arc<dyn BackingStore>,
        streams: Arc<dyn ChangeStreamClient>,
        room_id: &str,
        username: &str,
    ) -> Result<Self, SessionError> {
        let username = validate_username(username)?;
        let room_id = validate_room_id(room_id)?;

        let room = store
            .get_room(&room_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(format!("room {room_id} does not exist")))?;

        store.insert_participant(&room_id, &username).await?;

        match Self::open(&store, &streams, room, username.clone()).await {
            Ok(session) => Ok(session),
            Err(error) => {
                if let Err(cleanup) = store.delete_participant(&room_id, &username).await {
                    warn!(
                        room_id = %room_id,
                        username = %username,
                        error = %cleanup,
                        "Failed to roll back participant row after join failure"
                    );
                }
                Err(error)
            }
        }
    }

    /// Subscriptions, snapshot, seeding and worker startup; split out so
    /// `join` can roll back the participant row when any of it fails.
    async fn open(
        store: &Arc<dyn BackingStore>,
        streams: &Arc<dyn ChangeStreamClient>,
        room: Room,
        username: String,
    ) -> Result<Self, SessionError> {
        // Subscribe before the snapshot: the overlap is collapsed by
        // id-dedup, a gap could not be recovered.
        let message_rx = streams.subscribe(Channel::Messages, &room.id).await?;
        let participant_rx = streams.subscribe(Channel::Participants, &room.id).await?;
        let typing_rx = streams.subscribe(Channel::Typing, &room.id).await?;

        let mut messages = MessageStream::new();
        messages.seed(store.list_messages(&room.id).await?);
        let mut presence = PresenceTracker::new();
        presence.seed(store.list_participants(&room.id).await?);
        // Typing state is never snapshotted - ephemeral live state only
        let typing = TypingCoordinator::new(room.id.clone(), username.clone());

        let initial = build_view(&room, &messages, &presence, &typing);
        let (view_tx, view_rx) = watch::channel(initial);
        let (status_tx, status_rx) = watch::channel(SessionStatus::Live);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let worker = SessionWorker {
            store: Arc::clone(store),
            room: room.clone(),
            username: username.clone(),
            messages,
            presence,
            typing,
            message_rx,
            participant_rx,
            typing_rx,
            cmd_rx,
            view_tx,
            status_tx,
        };
        let handle = tokio::spawn(worker.run());

        info!(room_id = %room.id, username = %username, "Joined room");
        Ok(Self {
            room,
            username,
            store: Arc::clone(store),
            cmd_tx,
            view_rx,
            status_rx,
            worker: Some(handle),
        })
    }

    pub fn room(&self) -> &Room {
        &self.room
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// The latest consolidated view
    pub fn current_view(&self) -> RoomView {
        self.view_rx.borrow().clone()
    }

    /// A watch receiver that yields every republished view
    pub fn watch_view(&self) -> watch::Receiver<RoomView> {
        self.view_rx.clone()
    }

    pub fn status(&self) -> SessionStatus {
        if self.worker.is_none() {
            return SessionStatus::Closed;
        }
        *self.status_rx.borrow()
    }

    /// Validates and sends a message, returning once the write is
    /// acknowledged.
    ///
    /// Blank or oversized content fails with `InvalidInput` without any
    /// network call. A `Network` failure leaves the session live and usable
    /// for further sends. The sent message is not added to the view here; it
    /// arrives back through the message stream like everyone else's and is
    /// deduplicated by id.
    pub async fn send_message(&self, content: &str) -> Result<Message, SessionError> {
        if self.worker.is_none() {
            return Err(SessionError::Closed);
        }
        let content = validate_message_content(content)?;
        self.store
            .insert_message(&self.room.id, &self.username, &content)
            .await
    }

    /// Fire-and-forget notification of local input activity; drives the
    /// debounced typing publication.
    pub fn notify_typing(&self) {
        let _ = self.cmd_tx.send(Command::LocalTyping);
    }

    /// Closes the session: stops the worker (so no further event is
    /// processed once this returns), then best-effort deletes the caller's
    /// typing and participant rows. Idempotent; failures of the deletes are
    /// logged, not surfaced, since the session is ending anyway.
    pub async fn leave(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        worker.abort();
        let _ = worker.await;

        if let Err(error) = self.store.delete_typing(&self.room.id, &self.username).await {
            warn!(
                room_id = %self.room.id,
                username = %self.username,
                error = %error,
                "Best-effort typing cleanup failed on leave"
            );
        }
        if let Err(error) = self
            .store
            .delete_participant(&self.room.id, &self.username)
            .await
        {
            warn!(
                room_id = %self.room.id,
                username = %self.username,
                error = %error,
                "Best-effort participant removal failed on leave"
            );
        }
        info!(room_id = %self.room.id, username = %self.username, "Left room");
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

fn build_view(
    room: &Room,
    messages: &MessageStream,
    presence: &PresenceTracker,
    typing: &TypingCoordinator,
) -> RoomView {
    RoomView {
        room: room.clone(),
        messages: messages.messages().to_vec(),
        participants: presence.participants(),
        typing_usernames: typing.typing_usernames(),
    }
}

/// Owns all mutable session state; every event handler runs to completion
/// before the next queued event on any channel is processed.
struct SessionWorker {
    store: Arc<dyn BackingStore>,
    room: Room,
    username: String,
    messages: MessageStream,
    presence: PresenceTracker,
    typing: TypingCoordinator,
    message_rx: broadcast::Receiver<ChangeEvent>,
    participant_rx: broadcast::Receiver<ChangeEvent>,
    typing_rx: broadcast::Receiver<ChangeEvent>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    view_tx: watch::Sender<RoomView>,
    status_tx: watch::Sender<SessionStatus>,
}

impl SessionWorker {
    async fn run(mut self) {
        let mut sweep = interval(TYPING_INACTIVITY_TIMEOUT);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let deadline = self.typing.publish_deadline();
            tokio::select! {
                command = self.cmd_rx.recv() => match command {
                    Some(Command::LocalTyping) => self.on_local_typing().await,
                    // Session handle dropped
                    None => break,
                },
                event = self.message_rx.recv() => {
                    if !self.on_stream_event(Channel::Messages, event) {
                        break;
                    }
                }
                event = self.participant_rx.recv() => {
                    if !self.on_stream_event(Channel::Participants, event) {
                        break;
                    }
                }
                event = self.typing_rx.recv() => {
                    if !self.on_stream_event(Channel::Typing, event) {
                        break;
                    }
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.on_typing_deadline().await;
                }
                _ = sweep.tick() => {
                    if self.typing.sweep_stale(Utc::now()) {
                        self.republish();
                    }
                }
            }
        }
    }

    async fn on_local_typing(&mut self) {
        if let Some(state) = self.typing.note_local_activity(Instant::now(), Utc::now()) {
            if let Err(error) = self.store.upsert_typing(state).await {
                warn!(
                    room_id = %self.room.id,
                    username = %self.username,
                    error = %error,
                    "Failed to publish start-typing"
                );
            }
        }
    }

    async fn on_typing_deadline(&mut self) {
        if !self.typing.deadline_elapsed() {
            return;
        }
        if let Err(error) = self.store.delete_typing(&self.room.id, &self.username).await {
            warn!(
                room_id = %self.room.id,
                username = %self.username,
                error = %error,
                "Failed to publish stop-typing"
            );
        }
    }

    /// Routes one delivery from a change stream. Returns false when the
    /// stream is gone and the worker should stop.
    fn on_stream_event(
        &mut self,
        channel: Channel,
        event: Result<ChangeEvent, RecvError>,
    ) -> bool {
        match event {
            Ok(event) => {
                if self.apply(channel, event) {
                    self.republish();
                }
                true
            }
            Err(RecvError::Lagged(skipped)) => {
                // Delivery is at-least-once and handlers are idempotent, so
                // a lagged stream degrades to missing history, not
                // corruption. Keep going.
                warn!(
                    room_id = %self.room.id,
                    channel = channel.as_str(),
                    skipped = skipped,
                    "Change stream lagged"
                );
                true
            }
            Err(RecvError::Closed) => {
                warn!(
                    room_id = %self.room.id,
                    channel = channel.as_str(),
                    "Change stream closed"
                );
                let _ = self.status_tx.send(SessionStatus::Disconnected);
                false
            }
        }
    }

    /// Dispatches by channel identity; payload shapes are already typed per
    /// channel so anything else is a routing bug worth logging, not a crash.
    fn apply(&mut self, channel: Channel, event: ChangeEvent) -> bool {
        match (channel, event) {
            (Channel::Messages, ChangeEvent::Message(Change::Insert(message))) => {
                self.messages.apply_insert(message)
            }
            // Messages are never updated or deleted within scope
            (Channel::Messages, ChangeEvent::Message(_)) => false,
            (Channel::Participants, ChangeEvent::Participant(Change::Insert(participant))) => {
                self.presence.apply_insert(participant)
            }
            (Channel::Participants, ChangeEvent::Participant(Change::Delete(participant))) => {
                self.presence.apply_delete(&participant.id)
            }
            // Participants are immutable once joined
            (Channel::Participants, ChangeEvent::Participant(Change::Update(_))) => false,
            (Channel::Typing, ChangeEvent::Typing(change)) => {
                let is_typing = match &change {
                    Change::Insert(state) | Change::Update(state) => state.is_typing,
                    Change::Delete(_) => false,
                };
                let state = change.record();
                self.typing
                    .apply_remote(&state.username, is_typing, state.updated_at)
            }
            (channel, event) => {
                debug!(
                    room_id = %self.room.id,
                    channel = channel.as_str(),
                    kind = event.kind(),
                    "Event arrived on unexpected channel"
                );
                false
            }
        }
    }

    fn republish(&self) {
        self.view_tx.send_replace(build_view(
            &self.room,
            &self.messages,
            &self.presence,
            &self.typing,
        ));
    }
}
