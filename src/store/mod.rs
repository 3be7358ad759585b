pub mod models;
pub mod repository;

pub use models::{Message, Participant, Room, TypingState};
pub use repository::{BackingStore, InMemoryBackingStore};
