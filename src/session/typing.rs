use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::time::Instant;

use crate::store::models::TypingState;

/// Inactivity window after the last local keystroke before the stop-typing
/// write is issued.
pub const TYPING_INACTIVITY_TIMEOUT: Duration = Duration::from_millis(2000);

/// Remote typing entries older than this are dropped by the staleness sweep,
/// covering lost delete events from disconnected peers. Twice the local
/// inactivity window.
pub const TYPING_STALE_AFTER: Duration = Duration::from_millis(4000);

#[derive(Debug, Clone)]
struct RemoteEntry {
    is_typing: bool,
    updated_at: DateTime<Utc>,
}

/// Typing state for one room session: who else is typing right now, and
/// when the local user's own typing status should be published.
///
/// The local half is a debounce state machine. The first activity after
/// being idle asks for a start-typing upsert and arms the inactivity
/// deadline; further activity only re-arms the deadline. The session worker
/// sleeps on `publish_deadline` and calls `deadline_elapsed` when it fires,
/// which is the only trigger for the stop-typing write.
///
/// The remote half is never seeded - typing is purely ephemeral live state.
/// Events carrying an `updated_at` older than the last applied value for
/// that username are ignored, so stale or reordered deliveries cannot
/// regress the set.
#[derive(Debug)]
pub struct TypingCoordinator {
    room_id: String,
    local_username: String,
    publishing: bool,
    deadline: Option<Instant>,
    remote: HashMap<String, RemoteEntry>,
}

impl TypingCoordinator {
    pub fn new(room_id: String, local_username: String) -> Self {
        Self {
            room_id,
            local_username,
            publishing: false,
            deadline: None,
            remote: HashMap::new(),
        }
    }

    /// Records local input activity.
    ///
    /// Returns the start-typing row to upsert on the idle-to-active
    /// transition only; every call (re)arms the inactivity deadline.
    pub fn note_local_activity(
        &mut self,
        now: Instant,
        wall_now: DateTime<Utc>,
    ) -> Option<TypingState> {
        self.deadline = Some(now + TYPING_INACTIVITY_TIMEOUT);
        if self.publishing {
            return None;
        }
        self.publishing = true;
        Some(TypingState {
            room_id: self.room_id.clone(),
            username: self.local_username.clone(),
            is_typing: true,
            updated_at: wall_now,
        })
    }

    /// The instant at which the stop-typing write is due, if armed
    pub fn publish_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Called when the inactivity deadline fires without being re-armed.
    /// Returns whether a stop-typing write is owed; the coordinator is idle
    /// afterwards either way.
    pub fn deadline_elapsed(&mut self) -> bool {
        self.deadline = None;
        std::mem::take(&mut self.publishing)
    }

    /// Clears the local timer with no further write obligation (leave)
    pub fn cancel_local(&mut self) {
        self.deadline = None;
        self.publishing = false;
    }

    /// Applies a remote typing event; returns whether the visible set
    /// changed. Delete events arrive as `is_typing == false`. Events about
    /// the local user are ignored.
    pub fn apply_remote(
        &mut self,
        username: &str,
        is_typing: bool,
        updated_at: DateTime<Utc>,
    ) -> bool {
        if username == self.local_username {
            return false;
        }
        if let Some(entry) = self.remote.get(username) {
            if updated_at < entry.updated_at {
                return false;
            }
        }

        let was_typing = self
            .remote
            .get(username)
            .map(|e| e.is_typing)
            .unwrap_or(false);
        self.remote.insert(
            username.to_string(),
            RemoteEntry {
                is_typing,
                updated_at,
            },
        );
        was_typing != is_typing
    }

    /// Drops remote entries not refreshed within `TYPING_STALE_AFTER`;
    /// returns whether the visible set changed.
    pub fn sweep_stale(&mut self, wall_now: DateTime<Utc>) -> bool {
        let cutoff =
            wall_now - chrono::Duration::milliseconds(TYPING_STALE_AFTER.as_millis() as i64);
        let mut changed = false;
        self.remote.retain(|_, entry| {
            if entry.updated_at < cutoff {
                changed = changed || entry.is_typing;
                false
            } else {
                true
            }
        });
        changed
    }

    /// Usernames currently known to be typing, local user excluded
    pub fn typing_usernames(&self) -> BTreeSet<String> {
        self.remote
            .iter()
            .filter(|(_, entry)| entry.is_typing)
            .map(|(username, _)| username.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator() -> TypingCoordinator {
        TypingCoordinator::new("room-1".to_string(), "ana".to_string())
    }

    #[tokio::test]
    async fn single_start_write_per_idle_to_active_transition() {
        let mut typing = coordinator();
        let now = Instant::now();

        let first = typing.note_local_activity(now, Utc::now());
        assert!(matches!(first, Some(ref s) if s.is_typing && s.username == "ana"));

        // Keystrokes inside the window only re-arm the deadline
        for i in 1..10 {
            let again =
                typing.note_local_activity(now + Duration::from_millis(i * 100), Utc::now());
            assert!(again.is_none());
        }
        assert_eq!(
            typing.publish_deadline(),
            Some(now + Duration::from_millis(900) + TYPING_INACTIVITY_TIMEOUT)
        );
    }

    #[tokio::test]
    async fn deadline_fires_exactly_one_stop() {
        let mut typing = coordinator();
        typing.note_local_activity(Instant::now(), Utc::now());

        assert!(typing.deadline_elapsed());
        assert!(typing.publish_deadline().is_none());
        // Firing again while idle owes nothing
        assert!(!typing.deadline_elapsed());
    }

    #[tokio::test]
    async fn type_pause_type_pause_yields_one_start_and_one_stop() {
        let mut typing = coordinator();
        let now = Instant::now();

        let mut starts = 0;
        if typing.note_local_activity(now, Utc::now()).is_some() {
            starts += 1;
        }
        // 1000 ms pause is shorter than the window, then more typing
        if typing
            .note_local_activity(now + Duration::from_millis(1000), Utc::now())
            .is_some()
        {
            starts += 1;
        }
        // 2000 ms of silence fires the deadline
        let stops = usize::from(typing.deadline_elapsed());

        assert_eq!(starts, 1);
        assert_eq!(stops, 1);
    }

    #[tokio::test]
    async fn cancel_clears_timer_without_stop_write() {
        let mut typing = coordinator();
        typing.note_local_activity(Instant::now(), Utc::now());

        typing.cancel_local();
        assert!(typing.publish_deadline().is_none());
        assert!(!typing.deadline_elapsed());
    }

    #[test]
    fn remote_true_then_false() {
        let mut typing = coordinator();
        let t0 = Utc::now();

        assert!(typing.apply_remote("bo", true, t0));
        assert!(typing.typing_usernames().contains("bo"));

        assert!(typing.apply_remote("bo", false, t0 + chrono::Duration::seconds(1)));
        assert!(typing.typing_usernames().is_empty());
    }

    #[test]
    fn repeated_true_is_not_a_change() {
        let mut typing = coordinator();
        let t0 = Utc::now();

        assert!(typing.apply_remote("bo", true, t0));
        assert!(!typing.apply_remote("bo", true, t0 + chrono::Duration::seconds(1)));
        assert_eq!(typing.typing_usernames().len(), 1);
    }

    #[test]
    fn stale_events_are_ignored() {
        let mut typing = coordinator();
        let t0 = Utc::now();

        typing.apply_remote("bo", true, t0);
        // An older stop must not regress the newer state
        assert!(!typing.apply_remote("bo", false, t0 - chrono::Duration::seconds(5)));
        assert!(typing.typing_usernames().contains("bo"));
    }

    #[test]
    fn local_username_is_excluded() {
        let mut typing = coordinator();
        assert!(!typing.apply_remote("ana", true, Utc::now()));
        assert!(typing.typing_usernames().is_empty());
    }

    #[test]
    fn sweep_drops_entries_past_the_stale_window() {
        let mut typing = coordinator();
        let t0 = Utc::now();

        typing.apply_remote("bo", true, t0);
        typing.apply_remote("cy", true, t0 + chrono::Duration::seconds(3));

        assert!(typing.sweep_stale(t0 + chrono::Duration::seconds(5)));
        let remaining = typing.typing_usernames();
        assert!(!remaining.contains("bo"));
        assert!(remaining.contains("cy"));
    }

    #[test]
    fn sweep_of_fresh_entries_changes_nothing() {
        let mut typing = coordinator();
        let t0 = Utc::now();

        typing.apply_remote("bo", true, t0);
        assert!(!typing.sweep_stale(t0 + chrono::Duration::seconds(1)));
        assert!(typing.typing_usernames().contains("bo"));
    }
}
