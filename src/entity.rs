use crate::de;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Who authored a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
    System,
}

impl Sender {
    /// Map the backend's sender string. Anything that is not the employee or
    /// the system is the conversational bot.
    pub fn from_wire(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "user" | "employee" | "human" => Sender::User,
            "system" => Sender::System,
            _ => Sender::Bot,
        }
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Sender::User => "You",
            Sender::Bot => "Assistant",
            Sender::System => "System",
        };
        f.write_str(name)
    }
}

/// The logged-in employee as returned by `/auth/login`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    #[serde(deserialize_with = "de::id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

impl fmt::Display for Employee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// Everything needed to resume a session without logging in again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub tokens: AuthTokens,
    pub employee: Option<Employee>,
}
