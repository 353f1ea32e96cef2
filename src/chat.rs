use crate::de;
use crate::entity::Sender;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Active,
    Inactive,
    Completed,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainStatus {
    Active,
    Completed,
    #[serde(other)]
    Unknown,
}

/// One entry of an open chat's timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub text: String,
    pub is_user: bool,
    pub timestamp: DateTime<Utc>,
    pub sender: Sender,
    pub session_status: Option<SessionStatus>,
    pub chain_status: Option<ChainStatus>,
    pub can_end_chat: Option<bool>,
    #[serde(default)]
    pub is_session_marker: bool,
    pub session_id: Option<String>,
}

impl Message {
    pub fn new(sender: Sender, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            is_user: sender == Sender::User,
            timestamp: Utc::now(),
            sender,
            session_status: None,
            chain_status: None,
            can_end_chat: None,
            is_session_marker: false,
            session_id: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Sender::System, text)
    }

    /// Synthetic boundary shown before a session's messages in a chain timeline.
    pub fn session_marker(session_id: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            id: format!("{}-marker", session_id),
            text: format!(
                "Session started at {}",
                started_at.format("%b %d, %Y %H:%M")
            ),
            timestamp: started_at,
            is_session_marker: true,
            session_id: Some(session_id.to_string()),
            ..Self::new(Sender::System, String::new())
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_session_status(mut self, status: SessionStatus) -> Self {
        self.session_status = Some(status);
        self
    }
}

/// One row of the employee's chat list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatItem {
    #[serde(deserialize_with = "de::id")]
    pub chat_id: String,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default, deserialize_with = "de::opt_timestamp")]
    pub last_message_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub total_messages: u32,
    #[serde(default)]
    pub chat_mode: Option<String>,
    #[serde(default)]
    pub is_escalated: bool,
    #[serde(default, deserialize_with = "de::opt_id")]
    pub session_id: Option<String>,
    #[serde(default, deserialize_with = "de::opt_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ChatItem {
    pub fn new(chat_id: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            last_message: None,
            last_message_time: None,
            unread_count: 0,
            total_messages: 0,
            chat_mode: None,
            is_escalated: false,
            session_id: None,
            created_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledSession {
    #[serde(deserialize_with = "de::id")]
    pub session_id: String,
    #[serde(default, deserialize_with = "de::opt_id")]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub status: SessionStatus,
    #[serde(default, deserialize_with = "de::opt_timestamp")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "de::opt_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "de::opt_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ScheduledSession {
    pub fn new(session_id: impl Into<String>, status: SessionStatus) -> Self {
        Self {
            session_id: session_id.into(),
            chat_id: None,
            status,
            scheduled_at: None,
            created_at: None,
            updated_at: None,
        }
    }
}

/// A session record inside a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainSession {
    #[serde(deserialize_with = "de::id")]
    pub session_id: String,
    #[serde(default, deserialize_with = "de::opt_id")]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub status: SessionStatus,
    #[serde(default, deserialize_with = "de::opt_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ChainSession {
    pub fn new(session_id: impl Into<String>, chat_id: Option<&str>) -> Self {
        Self {
            session_id: session_id.into(),
            chat_id: chat_id.map(str::to_string),
            status: SessionStatus::Unknown,
            created_at: None,
        }
    }
}

/// Several sessions grouped under one logical conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainContext {
    #[serde(alias = "chainId", deserialize_with = "de::id")]
    pub chain_id: String,
    #[serde(default, alias = "allSessions", alias = "all_sessions")]
    pub sessions: Vec<ChainSession>,
}

impl ChainContext {
    /// The most recently created session that already has a chat.
    pub fn latest_session(&self) -> Option<&ChainSession> {
        self.sessions
            .iter()
            .filter(|s| s.chat_id.is_some())
            .max_by_key(|s| s.created_at)
    }
}
