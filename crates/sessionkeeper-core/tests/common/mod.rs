//! In-process mock of the `/auth/*` API plus a few protected data routes.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{json, Value};
use sessionkeeper_core::{Config, CredentialStore, Session};
use tokio::net::TcpListener;

pub const USERNAME: &str = "ana";
pub const PASSWORD: &str = "secret";
pub const RESET_TOKEN: &str = "RST-123";

#[derive(Debug, Clone)]
pub enum RefreshBehavior {
    /// Hand out this access token (and optionally rotate the refresh token)
    Succeed {
        access_token: String,
        refresh_token: Option<String>,
    },
    /// Reject with this status
    Fail(u16),
}

#[derive(Debug, Clone)]
pub struct MockConfig {
    pub refresh_delay: Duration,
    pub refresh: RefreshBehavior,
    /// Token the protected routes accept before any login or refresh
    pub valid_token: String,
    /// Access token returned by a successful login
    pub login_token: String,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            refresh_delay: Duration::from_millis(100),
            refresh: RefreshBehavior::Succeed {
                access_token: "T2".to_string(),
                refresh_token: None,
            },
            valid_token: "T0".to_string(),
            login_token: jwt_expiring_in(3600),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hit {
    pub path: String,
    pub authorization: Option<String>,
}

pub struct MockState {
    config: MockConfig,
    valid_token: Mutex<String>,
    refresh_calls: AtomicUsize,
    logout_calls: AtomicUsize,
    refresh_tokens_seen: Mutex<Vec<String>>,
    hits: Mutex<Vec<Hit>>,
}

pub struct MockApi {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
}

impl MockApi {
    pub async fn spawn(config: MockConfig) -> Self {
        let state = Arc::new(MockState {
            valid_token: Mutex::new(config.valid_token.clone()),
            config,
            refresh_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            refresh_tokens_seen: Mutex::new(Vec::new()),
            hits: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/auth/login", post(login))
            .route("/auth/user", get(user))
            .route("/auth/refresh", post(refresh))
            .route("/auth/logout", post(logout))
            .route("/auth/forgot-password", post(forgot_password))
            .route("/auth/reset-password", post(reset_password))
            .route("/dispositivos", get(protected))
            .route("/sensores", get(protected))
            .route("/locked", get(locked))
            .route("/boom", get(boom))
            .route("/missing", get(missing))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Self { addr, state }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn config(&self) -> Config {
        Config {
            api_base_url: self.base_url(),
            request_timeout_secs: 5,
            ..Config::default()
        }
    }

    pub fn session(&self, store: CredentialStore) -> Session {
        Session::new(&self.config(), store).expect("session")
    }

    pub fn refresh_calls(&self) -> usize {
        self.state.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.state.logout_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_tokens_seen(&self) -> Vec<String> {
        self.state.refresh_tokens_seen.lock().unwrap().clone()
    }

    /// Hits recorded for one path (query string included), in arrival order
    pub fn hits_for(&self, path: &str) -> Vec<Hit> {
        self.state
            .hits
            .lock()
            .unwrap()
            .iter()
            .filter(|h| h.path == path)
            .cloned()
            .collect()
    }

    pub fn total_hits(&self) -> usize {
        self.state.hits.lock().unwrap().len()
    }
}

pub fn jwt_expiring_in(secs: i64) -> String {
    let exp = chrono::Utc::now().timestamp() + secs;
    format!(
        "{}.{}.c2ln",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#),
        URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"42","exp":{}}}"#, exp))
    )
}

pub fn profile_json() -> Value {
    json!({
        "id": 42,
        "usuario": USERNAME,
        "nombre": "Ana Torres",
        "email": "ana@example.com",
        "roles": [
            {"id": 1, "nombre": "Administrador", "slug": "admin"},
            {"id": 2, "nombre": "Operario", "slug": "operario"}
        ],
        "modulos": [{"id": 3, "nombre": "Dispositivos", "slug": "dispositivos"}]
    })
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn is_authorized(state: &MockState, headers: &HeaderMap) -> bool {
    let expected = format!("Bearer {}", state.valid_token.lock().unwrap());
    bearer(headers).as_deref() == Some(expected.as_str())
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({"message": "Unauthorized"}))).into_response()
}

fn record(state: &MockState, uri: &Uri, headers: &HeaderMap) {
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());
    state.hits.lock().unwrap().push(Hit {
        path,
        authorization: bearer(headers),
    });
}

async fn login(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    if body["usuario"] == USERNAME && body["password"] == PASSWORD {
        let token = state.config.login_token.clone();
        *state.valid_token.lock().unwrap() = token.clone();
        Json(json!({"accessToken": token, "refreshToken": "R1"})).into_response()
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"message": "Credenciales inválidas"})),
        )
            .into_response()
    }
}

async fn user(State(state): State<Arc<MockState>>, uri: Uri, headers: HeaderMap) -> Response {
    record(&state, &uri, &headers);
    if is_authorized(&state, &headers) {
        Json(profile_json()).into_response()
    } else {
        unauthorized()
    }
}

async fn refresh(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);
    if let Some(token) = body["refreshToken"].as_str() {
        state.refresh_tokens_seen.lock().unwrap().push(token.to_string());
    }
    tokio::time::sleep(state.config.refresh_delay).await;

    match state.config.refresh.clone() {
        RefreshBehavior::Succeed {
            access_token,
            refresh_token,
        } => {
            *state.valid_token.lock().unwrap() = access_token.clone();
            let mut body = json!({"accessToken": access_token});
            if let Some(rotated) = refresh_token {
                body["refreshToken"] = json!(rotated);
            }
            Json(body).into_response()
        }
        RefreshBehavior::Fail(status) => (
            StatusCode::from_u16(status).unwrap_or(StatusCode::UNAUTHORIZED),
            Json(json!({"message": "Refresh token expirado"})),
        )
            .into_response(),
    }
}

async fn logout(State(state): State<Arc<MockState>>) -> StatusCode {
    state.logout_calls.fetch_add(1, Ordering::SeqCst);
    StatusCode::NO_CONTENT
}

async fn forgot_password(Json(body): Json<Value>) -> Response {
    if body["email"].as_str().map(|e| e.contains('@')).unwrap_or(false) {
        Json(json!({"message": "Correo enviado", "token": RESET_TOKEN})).into_response()
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"message": ["email must be an email"]})),
        )
            .into_response()
    }
}

async fn reset_password(Json(body): Json<Value>) -> Response {
    if body["token"] == RESET_TOKEN && body["password"].as_str().is_some() {
        Json(json!({"message": "Contraseña actualizada"})).into_response()
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"message": "Token inválido o expirado"})),
        )
            .into_response()
    }
}

async fn protected(State(state): State<Arc<MockState>>, uri: Uri, headers: HeaderMap) -> Response {
    record(&state, &uri, &headers);
    if is_authorized(&state, &headers) {
        Json(json!([{"id": 1, "nombre": "Sensor invernadero"}])).into_response()
    } else {
        unauthorized()
    }
}

async fn locked(State(state): State<Arc<MockState>>, uri: Uri, headers: HeaderMap) -> Response {
    record(&state, &uri, &headers);
    unauthorized()
}

async fn boom(State(state): State<Arc<MockState>>, uri: Uri, headers: HeaderMap) -> Response {
    record(&state, &uri, &headers);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"message": "Base de datos caída"})),
    )
        .into_response()
}

async fn missing(State(state): State<Arc<MockState>>, uri: Uri, headers: HeaderMap) -> Response {
    record(&state, &uri, &headers);
    StatusCode::NOT_FOUND.into_response()
}
