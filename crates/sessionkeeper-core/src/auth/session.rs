//! Session context: what the rest of the application talks to.
//!
//! Owns the credential store, the gateway, the single refresh coordinator,
//! the session clock and the bus, and exposes `is_authenticated`,
//! `time_left` and `error` alongside `login` / `logout` / `refresh_session` /
//! `refresh_user`.
//!
//! Forced logouts arrive over the bus from the coordinator or the clock.
//! Whoever publishes has already cleared the store; the listener here only
//! stops the clock and resets local state. It can run late, so an event that
//! finds a newer session in the store is ignored. Login, logout and forced
//! logout handling are serialized by one transition lock.

use std::sync::{Arc, Weak};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::clock::{ClockHandle, SessionClock, SystemClock, TimeSource};
use super::coordinator::RefreshCoordinator;
use super::events::{LogoutReason, SessionBus, SessionEvent};
use super::store::CredentialStore;
use crate::api::request::{
    ApiRequest, FORGOT_PASSWORD_PATH, LOGIN_PATH, LOGOUT_PATH, RESET_PASSWORD_PATH, USER_PATH,
};
use crate::api::{ApiClient, ApiError};
use crate::config::Config;
use crate::models::auth::{ForgotPasswordRequest, LoginRequest, ResetPasswordRequest};
use crate::models::{
    ForgotPasswordResponse, LoginCredentials, MessageResponse, Profile, Role, TokenPair,
};

/// Consumer-visible session state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub authenticated: bool,
    pub error: Option<String>,
}

/// Cheap to clone; all clones share one session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

struct Inner {
    api: ApiClient,
    store: Arc<CredentialStore>,
    coordinator: Arc<RefreshCoordinator>,
    bus: SessionBus,
    clock: SessionClock,
    clock_handle: Mutex<Option<ClockHandle>>,
    /// Held across login, logout and forced-logout handling
    transition: Mutex<()>,
    state: watch::Sender<SessionSnapshot>,
    time_left: Arc<watch::Sender<Option<i64>>>,
    listener: JoinHandle<()>,
}

impl Session {
    /// Build a session against `config.api_base_url`. Must be called inside
    /// a tokio runtime (the forced-logout listener is spawned here).
    pub fn new(config: &Config, store: CredentialStore) -> Result<Self, ApiError> {
        Self::with_time_source(config, store, Arc::new(SystemClock))
    }

    pub fn with_time_source(
        config: &Config,
        store: CredentialStore,
        time: Arc<dyn TimeSource>,
    ) -> Result<Self, ApiError> {
        let http = ApiClient::http_client(config.request_timeout())?;
        let store = Arc::new(store);
        let bus = SessionBus::new();
        let coordinator = RefreshCoordinator::new(
            http.clone(),
            &config.api_base_url,
            Arc::clone(&store),
            bus.clone(),
        );
        let api = ApiClient::new(
            http,
            &config.api_base_url,
            Arc::clone(&store),
            Arc::clone(&coordinator),
        );
        let (time_left, _) = watch::channel(None);
        let time_left = Arc::new(time_left);
        let clock = SessionClock::new(
            Arc::clone(&store),
            bus.clone(),
            time,
            Arc::clone(&time_left),
        );
        let (state, _) = watch::channel(SessionSnapshot::default());

        // Subscribe before anything can publish
        let events = bus.subscribe();
        let inner = Arc::new_cyclic(|weak| Inner {
            api,
            store,
            coordinator,
            bus,
            clock,
            clock_handle: Mutex::new(None),
            transition: Mutex::new(()),
            state,
            time_left,
            listener: spawn_logout_listener(weak.clone(), events),
        });

        Ok(Self { inner })
    }

    // ===== Accessors =====

    /// Gateway for domain calls; shares tokens and refresh with this session
    pub fn api(&self) -> &ApiClient {
        &self.inner.api
    }

    pub fn bus(&self) -> &SessionBus {
        &self.inner.bus
    }

    pub fn store(&self) -> &CredentialStore {
        &self.inner.store
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.borrow().authenticated
    }

    /// Whole seconds until the access token expires; `None` when unknown
    pub fn time_left(&self) -> Option<i64> {
        *self.inner.time_left.borrow()
    }

    pub fn error(&self) -> Option<String> {
        self.inner.state.borrow().error.clone()
    }

    pub fn state(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.state.subscribe()
    }

    pub fn time_left_updates(&self) -> watch::Receiver<Option<i64>> {
        self.inner.time_left.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.bus.subscribe()
    }

    pub async fn user(&self) -> Option<Profile> {
        self.inner.store.user_profile().await
    }

    pub async fn selected_role(&self) -> Option<Role> {
        self.inner.store.selected_role().await
    }

    // ===== Lifecycle =====

    /// Adopt a persisted session without a network round trip.
    ///
    /// A cached profile with an unexpired (or undecodable) token is trusted
    /// as-is. An expired token is renewed if a refresh token is stored;
    /// anything else is cleared. Returns whether the session is authenticated.
    pub async fn restore(&self) -> bool {
        let stored = self.inner.store.snapshot().await;
        if stored.access_token.is_none() || stored.user.is_none() {
            if !stored.is_empty() {
                debug!("Incomplete persisted session, clearing");
                self.inner.store.clear_all().await;
            }
            return false;
        }

        if !stored.is_expired(chrono::Utc::now()) {
            info!("Restored persisted session");
            self.set_authenticated();
            self.start_clock().await;
            return true;
        }

        if stored.refresh_token.is_none() {
            info!("Persisted session expired");
            self.inner.store.clear_all().await;
            return false;
        }

        match self.refresh_session().await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "Could not renew persisted session");
                false
            }
        }
    }

    /// Exchange username and password for tokens, then load the profile
    pub async fn login(&self, credentials: &LoginCredentials) -> Result<Profile, ApiError> {
        let _transition = self.inner.transition.lock().await;
        self.inner.state.send_modify(|s| s.error = None);

        match self.try_login(credentials).await {
            Ok(profile) => {
                info!(user = %profile.username, "Logged in");
                self.set_authenticated();
                self.start_clock().await;
                Ok(profile)
            }
            Err(e) => {
                warn!(error = %e, "Login failed");
                // Tokens may have been stored before the profile fetch failed
                self.inner.store.clear_all().await;
                self.set_logged_out(Some(e.user_message())).await;
                Err(e)
            }
        }
    }

    async fn try_login(&self, credentials: &LoginCredentials) -> Result<Profile, ApiError> {
        let tokens: TokenPair = self
            .inner
            .api
            .post_json(LOGIN_PATH, &LoginRequest::from(credentials))
            .await?;
        self.inner
            .store
            .set_tokens(&tokens.access_token, &tokens.refresh_token)
            .await;

        let profile: Profile = self.inner.api.get_json(USER_PATH).await?;
        self.inner.store.set_user_profile(&profile).await;
        Ok(profile)
    }

    /// User-initiated logout. The server is told best-effort; local state is
    /// cleared regardless. Nothing is published on the bus.
    pub async fn logout(&self) {
        let _transition = self.inner.transition.lock().await;
        if self.inner.store.access_token().await.is_some() {
            // A dead token is not worth a refresh just to say goodbye
            let request = ApiRequest::post(LOGOUT_PATH).as_retry();
            if let Err(e) = self.inner.api.send(request).await {
                debug!(error = %e, "Server logout failed, ignoring");
            }
        }
        self.inner.store.clear_all().await;
        self.set_logged_out(None).await;
        info!("Logged out");
    }

    /// Renew the access token now. Shares the in-flight guard with the gateway.
    pub async fn refresh_session(&self) -> Result<(), ApiError> {
        match self.inner.coordinator.request_refresh().await {
            Ok(_) => {
                if self.inner.store.user_profile().await.is_some() {
                    self.set_authenticated();
                    self.start_clock().await;
                }
                Ok(())
            }
            Err(e) => {
                // Don't leave the caller waiting on the bus listener
                self.inner.settle_forced_logout(e.logout_reason()).await;
                Err(ApiError::RefreshFailed(e))
            }
        }
    }

    /// Fetch the profile again and recache it
    pub async fn refresh_user(&self) -> Result<Profile, ApiError> {
        let profile: Profile = self.inner.api.get_json(USER_PATH).await?;
        self.inner.store.set_user_profile(&profile).await;
        debug!(user = %profile.username, roles = profile.roles.len(), "Profile refreshed");
        Ok(profile)
    }

    /// Pick one of the profile's roles. `None` if the profile has no such role.
    pub async fn select_role(&self, slug: &str) -> Option<Role> {
        let role = self.inner.store.user_profile().await?.role(slug).cloned()?;
        self.inner.store.set_selected_role(Some(role.clone())).await;
        Some(role)
    }

    pub async fn forgot_password(&self, email: &str) -> Result<ForgotPasswordResponse, ApiError> {
        self.inner
            .api
            .post_json(FORGOT_PASSWORD_PATH, &ForgotPasswordRequest { email })
            .await
    }

    pub async fn reset_password(&self, token: &str, password: &str) -> Result<String, ApiError> {
        let response: MessageResponse = self
            .inner
            .api
            .post_json(RESET_PASSWORD_PATH, &ResetPasswordRequest { token, password })
            .await?;
        Ok(response.message)
    }

    // ===== Internals =====

    fn set_authenticated(&self) {
        self.inner.state.send_replace(SessionSnapshot {
            authenticated: true,
            error: None,
        });
    }

    async fn set_logged_out(&self, error: Option<String>) {
        self.inner.reset(error).await;
    }

    async fn start_clock(&self) {
        let mut slot = self.inner.clock_handle.lock().await;
        // Stop the old clock first so its reset cannot land after the new tick
        drop(slot.take());
        *slot = Some(self.inner.clock.start());
    }
}

impl Inner {
    async fn reset(&self, error: Option<String>) {
        drop(self.clock_handle.lock().await.take());
        self.time_left.send_replace(None);
        self.state.send_replace(SessionSnapshot {
            authenticated: false,
            error,
        });
    }

    /// Reset local state after a forced logout. The publisher has already
    /// cleared the store; if it holds a token again, a newer session was
    /// stored since and the event no longer applies.
    async fn settle_forced_logout(&self, reason: LogoutReason) {
        let _transition = self.transition.lock().await;
        if self.store.access_token().await.is_some() {
            debug!(?reason, "Stale forced logout, a newer session is stored");
            return;
        }
        info!(?reason, "Forced logout");
        self.reset(Some(reason.message().to_string())).await;
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

fn spawn_logout_listener(
    inner: Weak<Inner>,
    mut events: broadcast::Receiver<SessionEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::ForcedLogout(reason)) => {
                    let Some(inner) = inner.upgrade() else { break };
                    inner.settle_forced_logout(reason).await;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Session listener lagged behind the bus");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
