use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use super::events::{ChangeEvent, Channel};
use crate::shared::SessionError;

/// Capacity of each per-channel broadcast buffer
const CHANNEL_CAPACITY: usize = 100;

/// A change-stream source a session can subscribe to.
///
/// Cancellation is dropping the returned receiver; when the source itself
/// goes away the receiver reports closed and the session surfaces that as a
/// network failure on its status.
#[async_trait]
pub trait ChangeStreamClient: Send + Sync {
    async fn subscribe(
        &self,
        channel: Channel,
        room_id: &str,
    ) -> Result<broadcast::Receiver<ChangeEvent>, SessionError>;
}

/// In-process change feed distributing events per (channel, room)
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    /// (channel, room_id) -> sender
    senders: Arc<RwLock<HashMap<(Channel, String), broadcast::Sender<ChangeEvent>>>>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self {
            senders: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Emits an event to all subscribers of its channel in its room
    pub async fn emit(&self, event: ChangeEvent) {
        let key = (event.channel(), event.room_id().to_string());
        let senders = self.senders.read().await;

        if let Some(sender) = senders.get(&key) {
            match sender.send(event) {
                Ok(receiver_count) => {
                    debug!(
                        channel = key.0.as_str(),
                        room_id = %key.1,
                        receivers = receiver_count,
                        "Change event emitted"
                    );
                }
                Err(_) => {
                    debug!(
                        channel = key.0.as_str(),
                        room_id = %key.1,
                        "Change event emitted with no receivers"
                    );
                }
            }
        } else {
            debug!(
                channel = key.0.as_str(),
                room_id = %key.1,
                "No subscribers for channel - dropping event"
            );
        }
    }

    /// Subscribe to one channel of one room
    pub async fn subscribe(
        &self,
        channel: Channel,
        room_id: &str,
    ) -> broadcast::Receiver<ChangeEvent> {
        let key = (channel, room_id.to_string());
        let senders = self.senders.read().await;

        if let Some(sender) = senders.get(&key) {
            sender.subscribe()
        } else {
            debug!(
                channel = channel.as_str(),
                room_id = %room_id,
                "Creating change channel for subscription"
            );
            drop(senders);

            let mut senders = self.senders.write().await;
            // Another subscriber may have raced us to the write lock
            let sender = senders
                .entry(key)
                .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
            sender.subscribe()
        }
    }
}

#[async_trait]
impl ChangeStreamClient for ChangeFeed {
    async fn subscribe(
        &self,
        channel: Channel,
        room_id: &str,
    ) -> Result<broadcast::Receiver<ChangeEvent>, SessionError> {
        Ok(ChangeFeed::subscribe(self, channel, room_id).await)
    }
}
