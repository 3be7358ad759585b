pub mod events;
pub mod feed;

pub use events::{Change, ChangeEvent, Channel};
pub use feed::{ChangeFeed, ChangeStreamClient};
