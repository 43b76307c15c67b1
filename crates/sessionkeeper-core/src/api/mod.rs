//! REST gateway module.
//!
//! This module provides the `ApiClient` every outbound call goes through,
//! the immutable `ApiRequest` descriptor it sends, and the error taxonomy
//! callers see.
//!
//! The API uses JWT bearer tokens obtained from `POST /auth/login` and
//! renewed through `POST /auth/refresh`.

pub mod client;
pub mod error;
pub mod request;

pub use client::ApiClient;
pub use error::{ApiError, RefreshError};
pub use request::ApiRequest;
