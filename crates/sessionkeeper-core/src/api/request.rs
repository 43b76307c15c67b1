//! Immutable description of an outbound API call.

use reqwest::Method;
use serde::Serialize;

use super::error::ApiError;

pub const LOGIN_PATH: &str = "/auth/login";
pub const USER_PATH: &str = "/auth/user";
pub const REFRESH_PATH: &str = "/auth/refresh";
pub const LOGOUT_PATH: &str = "/auth/logout";
pub const FORGOT_PASSWORD_PATH: &str = "/auth/forgot-password";
pub const RESET_PASSWORD_PATH: &str = "/auth/reset-password";

/// What the gateway sends. The `retried` marker travels with the descriptor
/// instead of being patched onto the live request, so a retry is just a new
/// value with the flag set.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    method: Method,
    path: String,
    body: Option<serde_json::Value>,
    retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Attach a JSON body
    pub fn json<B: Serialize + ?Sized>(self, body: &B) -> Result<Self, ApiError> {
        let body = serde_json::to_value(body).map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to encode request body: {}", e))
        })?;
        Ok(Self {
            body: Some(body),
            ..self
        })
    }

    /// The same call, marked as already retried
    pub fn as_retry(&self) -> Self {
        Self {
            retried: true,
            ..self.clone()
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn body(&self) -> Option<&serde_json::Value> {
        self.body.as_ref()
    }

    pub fn retried(&self) -> bool {
        self.retried
    }

    pub fn is_login(&self) -> bool {
        self.endpoint() == LOGIN_PATH
    }

    pub fn is_refresh(&self) -> bool {
        self.endpoint() == REFRESH_PATH
    }

    /// Path without query string or trailing slash
    fn endpoint(&self) -> &str {
        let path = self.path.split(['?', '#']).next().unwrap_or_default();
        let trimmed = path.trim_end_matches('/');
        if trimmed.is_empty() {
            "/"
        } else {
            trimmed
        }
    }
}
