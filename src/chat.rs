use crate::entity::Sender;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const WELCOME_ID: &str = "welcome";
pub const WELCOME_TEXT: &str =
    "Hi there! How can I help you with selling your unused software licenses today?";

/// Questions offered as suggestion bubbles before the visitor types anything.
pub const SUGGESTED_QUESTIONS: [&str; 2] = [
    "How do I sell my license?",
    "Is it safe to share my license?",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub text: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(sender: Sender, text: impl Into<String>) -> Self {
        Self {
            id: format!("{}-{}", sender.id_prefix(), Uuid::new_v4().simple()),
            text: text.into(),
            sender,
            timestamp: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Sender::User, text)
    }

    pub fn bot(text: impl Into<String>) -> Self {
        Self::new(Sender::Bot, text)
    }

    /// The greeting appended the first time the widget opens.
    pub fn welcome() -> Self {
        Self {
            id: WELCOME_ID.to_string(),
            text: WELCOME_TEXT.to_string(),
            sender: Sender::Bot,
            timestamp: Utc::now(),
        }
    }
}

/// Read model of a conversation handed to the presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSnapshot {
    pub session_id: String,
    pub messages: Vec<ChatMessage>,
    pub is_typing: bool,
    pub is_open: bool,
    pub input: String,
    pub suggestions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_sender_prefix() {
        let user = ChatMessage::user("hello");
        let bot = ChatMessage::bot("hi");
        assert!(user.id.starts_with("user-"));
        assert!(bot.id.starts_with("bot-"));
        assert_ne!(user.id, ChatMessage::user("hello").id);
    }

    #[test]
    fn welcome_is_from_bot() {
        let msg = ChatMessage::welcome();
        assert_eq!(msg.id, WELCOME_ID);
        assert_eq!(msg.sender, Sender::Bot);
        assert_eq!(msg.text, WELCOME_TEXT);
    }

    #[test]
    fn snapshot_keys_are_camel_case() {
        let snapshot = ConversationSnapshot {
            session_id: "ses_1".into(),
            messages: vec![ChatMessage::welcome()],
            is_typing: true,
            is_open: true,
            input: String::new(),
            suggestions: Vec::new(),
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["sessionId"], "ses_1");
        assert_eq!(json["isTyping"], true);
        assert_eq!(json["isOpen"], true);
        assert!(json.get("session_id").is_none());
    }
}
