//! Request and response bodies for the `/auth/*` endpoints.

use serde::{Deserialize, Serialize};

/// Username/password pair typed by the user.
#[derive(Debug, Clone)]
pub struct LoginCredentials {
    pub username: String,
    pub password: String,
}

impl LoginCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub usuario: &'a str,
    pub password: &'a str,
}

impl<'a> From<&'a LoginCredentials> for LoginRequest<'a> {
    fn from(credentials: &'a LoginCredentials) -> Self {
        Self {
            usuario: &credentials.username,
            password: &credentials.password,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenPair {
    #[serde(rename = "accessToken")]
    pub access_token: String,
    #[serde(rename = "refreshToken")]
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct RefreshRequest<'a> {
    #[serde(rename = "refreshToken")]
    pub refresh_token: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    #[serde(rename = "accessToken")]
    pub access_token: String,
    /// Present only when the server rotates refresh tokens
    #[serde(rename = "refreshToken", default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ForgotPasswordRequest<'a> {
    pub email: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForgotPasswordResponse {
    pub message: String,
    /// Some deployments hand the reset token straight back instead of mailing it
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ResetPasswordRequest<'a> {
    pub token: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}
