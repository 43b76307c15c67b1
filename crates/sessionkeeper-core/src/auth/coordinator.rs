//! Single-flight access token refresh.
//!
//! However many callers ask for a refresh at once, one `POST /auth/refresh`
//! goes out. The first caller moves the coordinator from `Idle` to
//! `Refreshing` and starts the call; everyone arriving while it is in flight
//! joins the waiter queue. When the call settles every waiter is released in
//! the order it joined, with the same token or the same failure.

use std::sync::Arc;

use reqwest::Client;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

use super::events::{SessionBus, SessionEvent};
use super::store::CredentialStore;
use crate::api::error::{default_message, server_message, RefreshError};
use crate::api::request::REFRESH_PATH;
use crate::models::auth::{RefreshRequest, RefreshResponse};

type RefreshOutcome = Result<String, RefreshError>;

enum RefreshState {
    Idle,
    Refreshing {
        waiters: Vec<oneshot::Sender<RefreshOutcome>>,
    },
}

pub struct RefreshCoordinator {
    /// Bare client: the refresh call must never go back through the gateway
    http: Client,
    refresh_url: String,
    store: Arc<CredentialStore>,
    bus: SessionBus,
    state: Mutex<RefreshState>,
}

impl RefreshCoordinator {
    pub fn new(
        http: Client,
        base_url: &str,
        store: Arc<CredentialStore>,
        bus: SessionBus,
    ) -> Arc<Self> {
        Arc::new(Self {
            http,
            refresh_url: format!("{}{}", base_url.trim_end_matches('/'), REFRESH_PATH),
            store,
            bus,
            state: Mutex::new(RefreshState::Idle),
        })
    }

    /// Get a new access token, sharing any refresh already in flight.
    ///
    /// On failure the store has already been cleared and a forced logout
    /// published by the time this returns.
    pub async fn request_refresh(self: &Arc<Self>) -> Result<String, RefreshError> {
        let (tx, rx) = oneshot::channel();
        let leader = {
            let mut state = self.state.lock().await;
            match &mut *state {
                RefreshState::Refreshing { waiters } => {
                    waiters.push(tx);
                    debug!(queued = waiters.len(), "Refresh in flight, waiting");
                    false
                }
                RefreshState::Idle => {
                    *state = RefreshState::Refreshing { waiters: vec![tx] };
                    true
                }
            }
        };

        if leader {
            // Driven on its own task so a caller giving up cannot strand the queue
            let this = Arc::clone(self);
            tokio::spawn(async move { this.run().await });
        }

        rx.await.unwrap_or(Err(RefreshError::Abandoned))
    }

    pub async fn is_refreshing(&self) -> bool {
        matches!(*self.state.lock().await, RefreshState::Refreshing { .. })
    }

    async fn run(&self) {
        let outcome = match self.store.refresh_token().await {
            Some(refresh_token) => self.call_refresh_endpoint(&refresh_token).await,
            None => {
                warn!("Refresh needed but no refresh token is stored");
                Err(RefreshError::MissingRefreshToken)
            }
        };

        // Settle the store before anyone is released, so a woken caller
        // always sees either the new token or an empty store
        let outcome = match outcome {
            Ok(response) => {
                self.store.set_access_token(&response.access_token).await;
                if let Some(ref rotated) = response.refresh_token {
                    self.store.set_refresh_token(rotated).await;
                }
                info!("Access token refreshed");
                Ok(response.access_token)
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, logging out");
                self.store.clear_all().await;
                self.bus.publish(SessionEvent::ForcedLogout(e.logout_reason()));
                Err(e)
            }
        };

        let waiters = {
            let mut state = self.state.lock().await;
            match std::mem::replace(&mut *state, RefreshState::Idle) {
                RefreshState::Refreshing { waiters } => waiters,
                RefreshState::Idle => Vec::new(),
            }
        };

        debug!(waiters = waiters.len(), ok = outcome.is_ok(), "Releasing refresh waiters");
        for waiter in waiters {
            // A waiter whose caller went away just misses the result
            let _ = waiter.send(outcome.clone());
        }
    }

    async fn call_refresh_endpoint(
        &self,
        refresh_token: &str,
    ) -> Result<RefreshResponse, RefreshError> {
        let response = self
            .http
            .post(&self.refresh_url)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(|e| RefreshError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RefreshError::Rejected {
                status: status.as_u16(),
                message: server_message(&body)
                    .unwrap_or_else(|| default_message(status.as_u16()).to_string()),
            });
        }

        response
            .json::<RefreshResponse>()
            .await
            .map_err(|e| RefreshError::InvalidResponse(e.to_string()))
    }
}
