use crate::validation::ValidationError;
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request to {path} failed: {source}")]
    Transport {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{path} returned {status}: {message}")]
    Status {
        path: String,
        status: StatusCode,
        message: String,
    },

    #[error("failed to decode response from {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("not logged in")]
    NotAuthenticated,

    /// The access token was rejected and could not be refreshed.
    #[error("session expired, please log in again")]
    SessionExpired,

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl ApiError {
    /// True when the error ends the employee's session.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ApiError::SessionExpired | ApiError::NotAuthenticated)
    }

    /// Short text suitable for showing to the employee.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Transport { .. } => {
                "Unable to reach the server. Please check your connection and try again.".into()
            }
            ApiError::Status { message, .. } if !message.is_empty() => message.clone(),
            ApiError::Status { .. } | ApiError::Decode { .. } => {
                "Something went wrong. Please try again.".into()
            }
            ApiError::NotAuthenticated | ApiError::SessionExpired => {
                "Your session has expired. Please log in again.".into()
            }
            ApiError::Validation(e) => e.to_string(),
        }
    }
}

/// Pull a human-readable message out of an error body.
pub(crate) fn error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    let from_json = parsed.as_ref().and_then(|v| {
        ["message", "detail", "error"]
            .iter()
            .find_map(|key| v.get(*key).and_then(|m| m.as_str()))
            .map(str::to_string)
    });

    from_json.unwrap_or_else(|| body.trim().chars().take(200).collect())
}
