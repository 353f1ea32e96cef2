use crate::chat::{ChainStatus, ChatItem, Message, ScheduledSession, SessionStatus};
use crate::de;
use crate::entity::{Employee, Sender};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Requests

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

#[derive(Debug, Serialize)]
pub struct ForgotPasswordRequest<'a> {
    pub email: &'a str,
}

#[derive(Debug, Serialize)]
pub struct ResetPasswordRequest<'a> {
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
pub struct InitiateChatRequest<'a> {
    pub session_id: &'a str,
}

#[derive(Debug, Serialize)]
pub struct SendMessageRequest<'a> {
    pub message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub struct EndSessionRequest<'a> {
    pub chat_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub struct RegisterDeviceRequest<'a> {
    pub device_token: &'a str,
    pub platform: &'a str,
}

#[derive(Debug, Serialize)]
pub struct UnregisterDeviceRequest<'a> {
    pub device_token: &'a str,
}

// Responses

#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    #[serde(alias = "token", alias = "accessToken")]
    pub access_token: String,
    #[serde(default, alias = "refreshToken")]
    pub refresh_token: Option<String>,
    #[serde(default, alias = "user")]
    pub employee: Option<Employee>,
}

#[derive(Debug, Deserialize)]
pub struct RefreshResponse {
    #[serde(alias = "token", alias = "accessToken")]
    pub access_token: String,
    #[serde(default, alias = "refreshToken")]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusMessage {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResetTokenValidation {
    #[serde(default, alias = "isValid", alias = "is_valid")]
    pub valid: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChatListResponse {
    #[serde(default)]
    pub chats: Vec<ChatItem>,
}

/// A message as the backend sends it. Older endpoints use `message_id`,
/// `text`/`content` and `created_at`; some responses carry both spellings.
#[derive(Debug, Deserialize)]
pub struct ServerMessage {
    #[serde(default, deserialize_with = "de::opt_id")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "de::opt_id")]
    pub message_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub is_user: Option<bool>,
    #[serde(default, deserialize_with = "de::opt_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "de::opt_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub session_status: Option<SessionStatus>,
    #[serde(default)]
    pub chain_status: Option<ChainStatus>,
    #[serde(default)]
    pub can_end_chat: Option<bool>,
}

impl ServerMessage {
    pub fn into_message(self) -> Message {
        let sender = match (self.sender.as_deref(), self.is_user) {
            (Some(raw), _) => Sender::from_wire(raw),
            (None, Some(true)) => Sender::User,
            (None, _) => Sender::Bot,
        };

        Message {
            id: self
                .id
                .or(self.message_id)
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            text: self
                .message
                .or(self.text)
                .or(self.content)
                .unwrap_or_default(),
            is_user: self.is_user.unwrap_or(sender == Sender::User),
            timestamp: self.timestamp.or(self.created_at).unwrap_or_else(Utc::now),
            sender,
            session_status: self.session_status,
            chain_status: self.chain_status,
            can_end_chat: self.can_end_chat,
            is_session_marker: false,
            session_id: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MessagesResponse {
    #[serde(default)]
    pub messages: Vec<ServerMessage>,
    #[serde(default)]
    pub session_status: Option<SessionStatus>,
    #[serde(default)]
    pub chain_status: Option<ChainStatus>,
}

/// Messages of one chat plus the chat-level status reported with them.
#[derive(Debug, Clone)]
pub struct ChatMessages {
    pub messages: Vec<Message>,
    pub session_status: Option<SessionStatus>,
    pub chain_status: Option<ChainStatus>,
}

impl From<MessagesResponse> for ChatMessages {
    fn from(response: MessagesResponse) -> Self {
        Self {
            messages: response
                .messages
                .into_iter()
                .map(ServerMessage::into_message)
                .collect(),
            session_status: response.session_status,
            chain_status: response.chain_status,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ScheduledSessionsResponse {
    #[serde(default, alias = "scheduled_sessions")]
    pub sessions: Vec<ScheduledSession>,
}

#[derive(Debug, Deserialize)]
pub struct SessionChainResponse {
    #[serde(alias = "chainId", deserialize_with = "de::id")]
    pub chain_id: String,
}

#[derive(Debug, Deserialize)]
pub struct InitiateChatResponse {
    #[serde(deserialize_with = "de::id")]
    pub chat_id: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub session_status: Option<SessionStatus>,
}

/// The bot's answer to a sent message.
#[derive(Debug, Deserialize)]
pub struct ChatReply {
    #[serde(default, deserialize_with = "de::opt_id")]
    pub chat_id: Option<String>,
    #[serde(alias = "response", alias = "reply")]
    pub message: String,
    #[serde(default)]
    pub session_status: Option<SessionStatus>,
    #[serde(default)]
    pub chain_status: Option<ChainStatus>,
    #[serde(default)]
    pub can_end_chat: Option<bool>,
}

impl ChatReply {
    pub fn to_message(&self) -> Message {
        Message {
            session_status: self.session_status,
            chain_status: self.chain_status,
            can_end_chat: self.can_end_chat,
            ..Message::new(Sender::Bot, self.message.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_message_conversion() {
        let raw: MessagesResponse = serde_json::from_str(
            r#"{
                "messages": [
                    {"id": 1, "message": "Hi", "sender": "user", "created_at": "2024-01-01T10:00:00Z"},
                    {"content": "Hello!", "is_user": false, "timestamp": "2024-01-01T10:00:05Z",
                     "session_status": "active", "can_end_chat": true}
                ],
                "session_status": "active"
            }"#,
        )
        .unwrap();

        let chat: ChatMessages = raw.into();
        assert_eq!(chat.session_status, Some(SessionStatus::Active));
        assert_eq!(chat.messages.len(), 2);

        let first = &chat.messages[0];
        assert_eq!(first.id, "1");
        assert!(first.is_user);
        assert_eq!(first.sender, Sender::User);

        let second = &chat.messages[1];
        assert!(!second.id.is_empty());
        assert!(!second.is_user);
        assert_eq!(second.sender, Sender::Bot);
        assert_eq!(second.can_end_chat, Some(true));
        assert!(second.timestamp > first.timestamp);
    }

    #[test]
    fn server_message_with_both_spellings() {
        let raw: MessagesResponse = serde_json::from_str(
            r#"{
                "messages": [
                    {"id": 7, "message_id": "m-7", "message": "Hi", "content": "Hi (copy)",
                     "timestamp": "2024-01-01T10:00:00Z", "created_at": "2023-12-31T10:00:00Z"},
                    {"message_id": "m-8", "text": "Later", "created_at": "2024-01-01T11:00:00Z"}
                ],
                "chain_status": "completed"
            }"#,
        )
        .unwrap();

        let chat: ChatMessages = raw.into();
        assert_eq!(chat.chain_status, Some(ChainStatus::Completed));

        let first = &chat.messages[0];
        assert_eq!(first.id, "7");
        assert_eq!(first.text, "Hi");
        assert_eq!(first.timestamp, crate::de::parse_timestamp("2024-01-01T10:00:00Z").unwrap());

        let second = &chat.messages[1];
        assert_eq!(second.id, "m-8");
        assert_eq!(second.text, "Later");
        assert_eq!(second.timestamp, crate::de::parse_timestamp("2024-01-01T11:00:00Z").unwrap());
    }

    #[test]
    fn send_request_omits_missing_ids() {
        let body = serde_json::to_value(SendMessageRequest {
            message: "hello",
            chat_id: None,
            session_id: Some("s1"),
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"message": "hello", "session_id": "s1"}));
    }

    #[test]
    fn reply_becomes_bot_message() {
        let reply: ChatReply = serde_json::from_str(
            r#"{"chat_id": 9, "response": "Noted", "session_status": "inactive"}"#,
        )
        .unwrap();
        let message = reply.to_message();

        assert_eq!(reply.chat_id.as_deref(), Some("9"));
        assert_eq!(message.text, "Noted");
        assert_eq!(message.sender, Sender::Bot);
        assert_eq!(message.session_status, Some(SessionStatus::Inactive));
    }
}
