//! Request gateway.
//!
//! Every API call goes through `ApiClient::send`: the stored access token is
//! attached as a bearer header, and a 401 on an ordinary endpoint is answered
//! by refreshing the token through the shared coordinator and sending the
//! call once more. Login and refresh are never intercepted.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{header, Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::error::ApiError;
use super::request::ApiRequest;
use crate::auth::{CredentialStore, RefreshCoordinator};

/// API client that owns token attachment and refresh-then-retry.
/// Clone is cheap - reqwest::Client and the shared state are reference counted.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Arc<str>,
    store: Arc<CredentialStore>,
    coordinator: Arc<RefreshCoordinator>,
}

impl ApiClient {
    pub fn new(
        client: Client,
        base_url: &str,
        store: Arc<CredentialStore>,
        coordinator: Arc<RefreshCoordinator>,
    ) -> Self {
        Self {
            client,
            base_url: Arc::from(base_url.trim_end_matches('/')),
            store,
            coordinator,
        }
    }

    /// Build the pooled HTTP client shared by the gateway and the coordinator
    pub fn http_client(timeout: Duration) -> Result<Client, ApiError> {
        Ok(Client::builder().timeout(timeout).build()?)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a request, recovering once from an expired access token.
    pub async fn send(&self, request: ApiRequest) -> Result<Response, ApiError> {
        let token = self.store.access_token().await;
        let response = self.dispatch(&request, token.as_deref()).await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Self::check_response(response).await;
        }

        if request.is_login() {
            return Err(ApiError::InvalidCredentials);
        }
        if request.is_refresh() || request.retried() {
            debug!(path = request.path(), "Unauthorized after refresh, giving up");
            return Err(ApiError::Unauthorized);
        }

        let retry = request.as_retry();
        debug!(path = retry.path(), "Access token rejected, refreshing");
        let token = self.coordinator.request_refresh().await?;

        let response = self.dispatch(&retry, Some(&token)).await?;
        Self::check_response(response).await
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        token: Option<&str>,
    ) -> Result<Response, ApiError> {
        let url = format!("{}{}", self.base_url, request.path());
        let mut builder = self
            .client
            .request(request.method().clone(), &url)
            .header(header::ACCEPT, "application/json");
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = request.body() {
            builder = builder.json(body);
        }

        builder.send().await.map_err(|e| {
            warn!(url = %url, error = %e, "Request failed before reaching the server");
            ApiError::from(e)
        })
    }

    /// Check if response is successful, returning a normalized error if not.
    async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn read_json<T: DeserializeOwned>(
        response: Response,
        path: &str,
    ) -> Result<T, ApiError> {
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("{}: {}", path, e)))
    }

    // ===== Typed helpers =====

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.send(ApiRequest::get(path)).await?;
        Self::read_json(response, path).await
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let response = self.send(ApiRequest::post(path).json(body)?).await?;
        Self::read_json(response, path).await
    }

    /// POST without a body, ignoring whatever comes back
    pub async fn post_empty(&self, path: &str) -> Result<(), ApiError> {
        self.send(ApiRequest::post(path)).await?;
        Ok(())
    }

    /// Send a prepared request and decode its JSON response
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let path = request.path().to_string();
        let response = self.send(request).await?;
        Self::read_json(response, &path).await
    }
}
