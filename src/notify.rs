use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{Id, Notification};

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for committed owner notifications. The push transport lives
/// outside this crate and subscribes per owner.
pub struct NotifyHub {
    channels: DashMap<Id, broadcast::Sender<Notification>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to notifications for an owner. Creates the channel if needed.
    pub fn subscribe(&self, owner_id: Id) -> broadcast::Receiver<Notification> {
        let sender = self
            .channels
            .entry(owner_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Publish a committed notification. No-op if nobody is listening.
    pub fn send(&self, notification: &Notification) {
        if let Some(sender) = self.channels.get(&notification.owner_id) {
            let _ = sender.send(notification.clone());
        }
    }

    /// Drop channels whose subscribers have all gone away.
    pub fn prune(&self) {
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
    }
}
