use serde::{Deserialize, Serialize};

use crate::store::models::{Message, Participant, TypingState};

/// The three logical event channels a room exposes.
///
/// Delivery order is preserved within one channel; across channels there is
/// no ordering guarantee, so consumers dispatch by channel identity and never
/// assume, e.g., that a join event precedes that participant's first message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    Messages,
    Participants,
    Typing,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Messages => "messages",
            Channel::Participants => "participants",
            Channel::Typing => "typing",
        }
    }
}

/// A tagged change notification carrying the affected record.
///
/// `Delete` carries the record as it existed before removal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Change<T> {
    Insert(T),
    Update(T),
    Delete(T),
}

impl<T> Change<T> {
    pub fn record(&self) -> &T {
        match self {
            Change::Insert(record) | Change::Update(record) | Change::Delete(record) => record,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Change::Insert(_) => "insert",
            Change::Update(_) => "update",
            Change::Delete(_) => "delete",
        }
    }
}

/// Events delivered over a room's change streams
///
/// Each variant carries a channel-specific typed record; there is no untyped
/// payload to inspect at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ChangeEvent {
    Message(Change<Message>),
    Participant(Change<Participant>),
    Typing(Change<TypingState>),
}

impl ChangeEvent {
    /// The channel this event belongs to
    pub fn channel(&self) -> Channel {
        match self {
            ChangeEvent::Message(_) => Channel::Messages,
            ChangeEvent::Participant(_) => Channel::Participants,
            ChangeEvent::Typing(_) => Channel::Typing,
        }
    }

    /// The room this event is scoped to
    pub fn room_id(&self) -> &str {
        match self {
            ChangeEvent::Message(change) => &change.record().room_id,
            ChangeEvent::Participant(change) => &change.record().room_id,
            ChangeEvent::Typing(change) => &change.record().room_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChangeEvent::Message(change) => change.kind(),
            ChangeEvent::Participant(change) => change.kind(),
            ChangeEvent::Typing(change) => change.kind(),
        }
    }
}
