pub mod message_stream;
pub mod presence;
pub mod room_session;
pub mod typing;
pub mod view;

pub use message_stream::MessageStream;
pub use presence::PresenceTracker;
pub use room_session::{RoomSession, SessionStatus};
pub use typing::{TypingCoordinator, TYPING_INACTIVITY_TIMEOUT};
pub use view::RoomView;
