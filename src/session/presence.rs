use std::collections::HashMap;

use crate::store::models::Participant;

/// Current participant set for one room, keyed by participant id.
///
/// Participants are immutable once joined, so only insert and delete events
/// are meaningful. Both are idempotent: duplicate inserts and deletes of
/// absent ids are no-ops, which tolerates stream replay and out-of-order
/// delete delivery.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    by_id: HashMap<String, Participant>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the snapshot, replacing any previous contents
    pub fn seed(&mut self, snapshot: Vec<Participant>) {
        self.by_id = snapshot.into_iter().map(|p| (p.id.clone(), p)).collect();
    }

    /// Adds a participant if its id is not already present; returns whether
    /// the set changed.
    pub fn apply_insert(&mut self, participant: Participant) -> bool {
        if self.by_id.contains_key(&participant.id) {
            return false;
        }
        self.by_id.insert(participant.id.clone(), participant);
        true
    }

    /// Removes a participant by id; returns whether the set changed
    pub fn apply_delete(&mut self, participant_id: &str) -> bool {
        self.by_id.remove(participant_id).is_some()
    }

    /// The current participants, ordered by (joined_at, id) for a
    /// deterministic view.
    pub fn participants(&self) -> Vec<Participant> {
        let mut rows: Vec<Participant> = self.by_id.values().cloned().collect();
        rows.sort_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        rows
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
