use crate::chat::ChatMessage;
use crate::contact::ContactSubmission;
use crate::theme::ThemeMode;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum Event {
    /// A message was appended to a session transcript
    ChatMessage {
        session_id: String,
        message: ChatMessage,
    },

    /// The typing indicator of a session changed
    Typing { session_id: String, is_typing: bool },

    /// The widget was opened or closed
    Visibility { session_id: String, is_open: bool },

    /// A contact form passed validation and was handed off
    ContactSubmitted(ContactSubmission),

    ThemeChanged { mode: ThemeMode },
}

impl Event {
    /// The chat session this event belongs to, if any.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Event::ChatMessage { session_id, .. }
            | Event::Typing { session_id, .. }
            | Event::Visibility { session_id, .. } => Some(session_id),
            Event::ContactSubmitted(_) | Event::ThemeChanged { .. } => None,
        }
    }
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
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
