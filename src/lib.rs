// Library crate for the realtime room synchronization engine
// This file exposes the public API for integration tests and embedding clients

pub mod session;
pub mod shared;
pub mod store;
pub mod stream;

// Re-export commonly used types for easier access
pub use session::{MessageStream, PresenceTracker, RoomSession, RoomView, SessionStatus};
pub use shared::SessionError;
pub use store::{BackingStore, InMemoryBackingStore, Message, Participant, Room, TypingState};
pub use stream::{Change, ChangeEvent, ChangeFeed, ChangeStreamClient, Channel};
