use crate::view::state::ChatEvent;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    /// A chat event was applied to the chat state
    Chat(ChatEvent),

    /// Something the employee should be told about outside the chat timeline
    SystemNotification {
        level: NotificationLevel,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NotificationLevel {
    /// The session ended and the employee has to log in again.
    Warning,
}

pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(100);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: Event) {
        // We ignore the error if there are no receivers
        let _ = self.tx.send(event);
    }

    pub fn notify(&self, level: NotificationLevel, message: impl Into<String>) {
        self.publish(Event::SystemNotification {
            level,
            message: message.into(),
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
