use std::collections::BTreeSet;

use crate::store::models::{Message, Participant, Room};

/// The consolidated, session-owned view of one room.
///
/// Derived state only: rebuilt incrementally as child components change and
/// republished as a whole, never persisted and never shared across rooms.
/// Participants are ordered by (joined_at, id) and typing usernames are a
/// sorted set, so equal logical state always compares equal.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomView {
    pub room: Room,
    pub messages: Vec<Message>,
    pub participants: Vec<Participant>,
    pub typing_usernames: BTreeSet<String>,
}
