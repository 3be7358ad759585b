use std::collections::HashSet;

use crate::store::models::Message;

/// Ordered, deduplicated message list for one room.
///
/// The snapshot arrives ordered by created_at (id tie-break); live inserts
/// are appended in arrival order and never re-sorted, because reordering
/// content already shown to a user is worse than tolerating clock skew.
/// Duplicate delivery of an id is a no-op, which also absorbs the sender's
/// own message echoing back through the stream.
#[derive(Debug, Default)]
pub struct MessageStream {
    ordered: Vec<Message>,
    seen_ids: HashSet<String>,
}

impl MessageStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the snapshot, replacing any previous contents
    pub fn seed(&mut self, snapshot: Vec<Message>) {
        self.seen_ids = snapshot.iter().map(|m| m.id.clone()).collect();
        self.ordered = snapshot;
    }

    /// Appends a streamed message; returns whether the view changed
    pub fn apply_insert(&mut self, message: Message) -> bool {
        if !self.seen_ids.insert(message.id.clone()) {
            return false;
        }
        self.ordered.push(message);
        true
    }

    /// The current ordered view
    pub fn messages(&self) -> &[Message] {
        &self.ordered
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}
