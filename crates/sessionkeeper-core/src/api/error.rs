use thiserror::Error;

use crate::auth::LogoutReason;
use crate::utils::truncate;

/// Why a token refresh did not produce a new access token.
///
/// `Clone` because one failure is handed to every caller queued behind the
/// refresh that failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("No refresh token available")]
    MissingRefreshToken,

    #[error("Refresh rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Refresh request failed: {0}")]
    Network(String),

    #[error("Invalid refresh response: {0}")]
    InvalidResponse(String),

    #[error("Refresh ended before reporting a result")]
    Abandoned,
}

impl RefreshError {
    pub fn logout_reason(&self) -> LogoutReason {
        match self {
            RefreshError::MissingRefreshToken => LogoutReason::MissingRefreshToken,
            _ => LogoutReason::RefreshFailed,
        }
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Unauthorized - session is no longer valid")]
    Unauthorized,

    #[error("Session refresh failed: {0}")]
    RefreshFailed(#[from] RefreshError),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("{message}")]
    Http { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for server-provided messages surfaced to the user
const MAX_MESSAGE_LENGTH: usize = 300;

impl ApiError {
    /// Normalize a non-success response into one readable message: the
    /// server's own explanation when it sent one, otherwise a per-status default.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            code => ApiError::Http {
                status: code,
                message: server_message(body)
                    .unwrap_or_else(|| default_message(code).to_string()),
            },
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::InvalidCredentials | ApiError::Unauthorized => Some(401),
            ApiError::RefreshFailed(RefreshError::Rejected { status, .. }) => Some(*status),
            ApiError::Http { status, .. } => Some(*status),
            ApiError::NetworkError(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Single human-readable line for display
    pub fn user_message(&self) -> String {
        match self {
            ApiError::InvalidCredentials => "Invalid username or password.".to_string(),
            ApiError::Unauthorized => default_message(401).to_string(),
            ApiError::RefreshFailed(e) => e.logout_reason().message().to_string(),
            ApiError::NetworkError(_) => {
                "Could not reach the server. Check your connection and try again.".to_string()
            }
            ApiError::Http { message, .. } => message.clone(),
            ApiError::InvalidResponse(_) => {
                "The server sent a response we could not read.".to_string()
            }
        }
    }
}

/// Pull an explanation out of an error body.
///
/// Accepts `{"message": "..."}`, `{"message": ["...", "..."]}` (validation
/// errors), `{"detail": "..."}` and `{"error": "..."}`.
pub fn server_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let field = ["message", "detail", "error"]
        .iter()
        .find_map(|key| value.get(*key))?;

    let text = match field {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("; "),
        _ => return None,
    };

    if text.is_empty() {
        None
    } else {
        Some(truncate(&text, MAX_MESSAGE_LENGTH))
    }
}

pub fn default_message(status: u16) -> &'static str {
    match status {
        400 => "The request was not valid.",
        401 => "Your session has expired. Please sign in again.",
        403 => "You do not have permission to do that.",
        404 => "The requested resource was not found.",
        408 => "The server took too long to respond.",
        409 => "That conflicts with the current state of the resource.",
        422 => "Some of the submitted data is invalid.",
        429 => "Too many requests. Please wait a moment and try again.",
        500 => "The server hit an internal error.",
        502..=504 => "The service is temporarily unavailable.",
        400..=499 => "The request could not be completed.",
        _ => "Something went wrong on the server.",
    }
}
