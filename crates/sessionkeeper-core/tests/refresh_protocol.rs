//! End-to-end tests of the gateway, refresh coordinator and session context
//! against an in-process mock API.

mod common;

use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;
use sessionkeeper_core::{
    ApiError, CredentialStore, LoginCredentials, LogoutReason, RefreshError, SessionEvent,
};
use tokio::sync::broadcast::error::TryRecvError;

use common::{jwt_expiring_in, MockApi, MockConfig, RefreshBehavior, PASSWORD, USERNAME};

const WAIT: Duration = Duration::from_secs(5);

fn bearer(token: &str) -> Option<String> {
    Some(format!("Bearer {}", token))
}

fn failing_refresh(status: u16) -> MockConfig {
    MockConfig {
        refresh_delay: Duration::from_millis(200),
        refresh: RefreshBehavior::Fail(status),
        ..MockConfig::default()
    }
}

async fn wait_logged_out(session: &sessionkeeper_core::Session) -> Option<String> {
    let mut state = session.state();
    let logged_out = state.wait_for(|s| !s.authenticated && s.error.is_some());
    let snapshot = tokio::time::timeout(WAIT, logged_out)
        .await
        .expect("forced logout reached the session")
        .expect("session alive");
    snapshot.error.clone()
}

#[tokio::test]
async fn test_concurrent_401s_share_one_refresh() {
    let mock = MockApi::spawn(MockConfig {
        refresh_delay: Duration::from_millis(50),
        ..MockConfig::default()
    })
    .await;
    let session = mock.session(CredentialStore::in_memory());
    session.store().set_tokens("T1", "R1").await;
    let api = session.api();

    let (devices, sensors) = tokio::join!(
        api.get_json::<Value>("/dispositivos"),
        api.get_json::<Value>("/sensores"),
    );

    assert!(devices.is_ok(), "dispositivos: {:?}", devices.err());
    assert!(sensors.is_ok(), "sensores: {:?}", sensors.err());
    assert_eq!(mock.refresh_calls(), 1);
    assert_eq!(mock.refresh_tokens_seen(), vec!["R1".to_string()]);

    for path in ["/dispositivos", "/sensores"] {
        let hits = mock.hits_for(path);
        assert_eq!(hits.len(), 2, "{} hit count", path);
        assert_eq!(hits[0].authorization, bearer("T1"));
        assert_eq!(hits[1].authorization, bearer("T2"));
    }
    assert_eq!(session.store().access_token().await.as_deref(), Some("T2"));
    // No rotation: the original refresh token stays
    assert_eq!(session.store().refresh_token().await.as_deref(), Some("R1"));
}

#[tokio::test]
async fn test_many_callers_each_retried_exactly_once() {
    let mock = MockApi::spawn(MockConfig::default()).await;
    let session = mock.session(CredentialStore::in_memory());
    session.store().set_tokens("T1", "R1").await;
    let api = session.api();

    let paths: Vec<String> = (0..8).map(|i| format!("/dispositivos?page={}", i)).collect();
    let results = join_all(paths.iter().map(|p| api.get_json::<Value>(p))).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(mock.refresh_calls(), 1);
    for path in &paths {
        let hits = mock.hits_for(path);
        assert_eq!(hits.len(), 2, "{} hit count", path);
        assert_eq!(hits[0].authorization, bearer("T1"));
        assert_eq!(hits[1].authorization, bearer("T2"));
    }
}

#[tokio::test]
async fn test_rotated_refresh_token_is_stored() {
    let mock = MockApi::spawn(MockConfig {
        refresh: RefreshBehavior::Succeed {
            access_token: "T2".to_string(),
            refresh_token: Some("R2".to_string()),
        },
        ..MockConfig::default()
    })
    .await;
    let session = mock.session(CredentialStore::in_memory());
    session.store().set_tokens("T1", "R1").await;

    session
        .api()
        .get_json::<Value>("/dispositivos")
        .await
        .expect("retried after refresh");

    assert_eq!(session.store().refresh_token().await.as_deref(), Some("R2"));
}

#[tokio::test]
async fn test_refresh_failure_rejects_everyone_and_logs_out_once() {
    let mock = MockApi::spawn(failing_refresh(401)).await;
    let session = mock.session(CredentialStore::in_memory());
    session.store().set_tokens("T1", "R1").await;
    let mut events = session.events();
    let api = session.api();

    let results = join_all((0..5).map(|_| api.get_json::<Value>("/dispositivos"))).await;

    assert_eq!(mock.refresh_calls(), 1);
    for result in results {
        match result {
            Err(ApiError::RefreshFailed(RefreshError::Rejected { status, message })) => {
                assert_eq!(status, 401);
                assert_eq!(message, "Refresh token expirado");
            }
            other => panic!("expected refresh rejection, got {:?}", other.map(|_| ())),
        }
    }
    // Nobody was retried
    assert_eq!(mock.hits_for("/dispositivos").len(), 5);

    // Store is already empty by the time callers see the rejection
    assert!(session.store().snapshot().await.is_empty());
    assert!(session.store().cookies().await.is_empty());

    assert_eq!(
        events.recv().await.expect("forced logout"),
        SessionEvent::ForcedLogout(LogoutReason::RefreshFailed)
    );
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

    let error = wait_logged_out(&session).await;
    assert_eq!(error.as_deref(), Some(LogoutReason::RefreshFailed.message()));
    assert_eq!(session.time_left(), None);
}

#[tokio::test]
async fn test_retried_request_rejected_again_is_unauthorized() {
    let mock = MockApi::spawn(MockConfig::default()).await;
    let session = mock.session(CredentialStore::in_memory());
    session.store().set_tokens("T1", "R1").await;

    let result = session.api().get_json::<Value>("/locked").await;

    assert!(matches!(result, Err(ApiError::Unauthorized)), "{:?}", result);
    assert_eq!(mock.refresh_calls(), 1);
    let hits = mock.hits_for("/locked");
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[1].authorization, bearer("T2"));
    // Refresh itself succeeded, so the session keeps its tokens
    assert_eq!(session.store().access_token().await.as_deref(), Some("T2"));
}

#[tokio::test]
async fn test_non_auth_errors_normalized_without_retry() {
    let mock = MockApi::spawn(MockConfig::default()).await;
    let session = mock.session(CredentialStore::in_memory());
    session.store().set_tokens("T1", "R1").await;
    let api = session.api();

    match api.get_json::<Value>("/boom").await {
        Err(ApiError::Http { status, message }) => {
            assert_eq!(status, 500);
            assert_eq!(message, "Base de datos caída");
        }
        other => panic!("expected 500, got {:?}", other),
    }

    let missing = api.get_json::<Value>("/missing").await;
    let err = missing.expect_err("404");
    assert_eq!(err.status(), Some(404));

    assert_eq!(mock.hits_for("/boom").len(), 1);
    assert_eq!(mock.hits_for("/missing").len(), 1);
    assert_eq!(mock.refresh_calls(), 0);
}

#[tokio::test]
async fn test_unreachable_server_is_a_network_error() {
    let config = sessionkeeper_core::Config {
        api_base_url: "http://127.0.0.1:9".to_string(),
        request_timeout_secs: 2,
        ..sessionkeeper_core::Config::default()
    };
    let session = sessionkeeper_core::Session::new(&config, CredentialStore::in_memory())
        .expect("session");
    session.store().set_tokens("T1", "R1").await;

    let result = session.api().get_json::<Value>("/dispositivos").await;

    assert!(matches!(result, Err(ApiError::NetworkError(_))), "{:?}", result);
    // Plain network failures leave the session alone
    assert_eq!(session.store().access_token().await.as_deref(), Some("T1"));
}

#[tokio::test]
async fn test_login_loads_profile_and_starts_clock() {
    let mock = MockApi::spawn(MockConfig::default()).await;
    let session = mock.session(CredentialStore::in_memory());
    let mut time_left = session.time_left_updates();

    let profile = session
        .login(&LoginCredentials::new(USERNAME, PASSWORD))
        .await
        .expect("login");

    assert_eq!(profile.username, USERNAME);
    assert_eq!(profile.display_name(), "Ana Torres");
    assert!(session.is_authenticated());
    assert_eq!(session.error(), None);
    assert_eq!(session.user().await, Some(profile));
    assert_eq!(session.store().refresh_token().await.as_deref(), Some("R1"));

    let left = *tokio::time::timeout(WAIT, time_left.wait_for(Option::is_some))
        .await
        .expect("clock ticked")
        .expect("session alive");
    let left = left.expect("countdown");
    assert!(left > 3500 && left <= 3600, "time left {}", left);

    assert!(session.store().allows_module("dispositivos").await);
    assert!(!session.store().allows_module("reportes").await);
    let cookies = session.store().cookies().await;
    assert_eq!(cookies.role_slugs(chrono::Utc::now()), vec!["admin", "operario"]);
    assert_eq!(mock.refresh_calls(), 0);
}

#[tokio::test]
async fn test_wrong_password_is_credentials_error() {
    let mock = MockApi::spawn(MockConfig::default()).await;
    let session = mock.session(CredentialStore::in_memory());

    let result = session
        .login(&LoginCredentials::new(USERNAME, "nope"))
        .await;

    assert!(matches!(result, Err(ApiError::InvalidCredentials)), "{:?}", result);
    assert_eq!(mock.refresh_calls(), 0);
    assert!(!session.is_authenticated());
    assert_eq!(
        session.error(),
        Some(ApiError::InvalidCredentials.user_message())
    );
    assert!(session.store().snapshot().await.is_empty());
}

#[tokio::test]
async fn test_logout_clears_everything_without_forced_event() {
    let mock = MockApi::spawn(MockConfig::default()).await;
    let session = mock.session(CredentialStore::in_memory());
    session
        .login(&LoginCredentials::new(USERNAME, PASSWORD))
        .await
        .expect("login");
    let mut events = session.events();

    session.logout().await;

    assert_eq!(mock.logout_calls(), 1);
    assert!(!session.is_authenticated());
    assert_eq!(session.error(), None);
    assert_eq!(session.time_left(), None);
    assert_eq!(session.store().access_token().await, None);
    assert_eq!(session.store().refresh_token().await, None);
    assert_eq!(session.user().await, None);
    assert!(session.store().cookies().await.is_empty());
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(mock.refresh_calls(), 0);
}

#[tokio::test]
async fn test_logout_with_dead_token_does_not_refresh() {
    let mock = MockApi::spawn(MockConfig::default()).await;
    let session = mock.session(CredentialStore::in_memory());
    session.store().set_tokens("T1", "R1").await;

    session.logout().await;

    assert_eq!(mock.refresh_calls(), 0);
    assert!(session.store().snapshot().await.is_empty());
}

#[tokio::test]
async fn test_refresh_session_without_refresh_token_skips_network() {
    let mock = MockApi::spawn(MockConfig::default()).await;
    let session = mock.session(CredentialStore::in_memory());
    session.store().set_access_token("T1").await;

    let result = session.refresh_session().await;

    assert!(
        matches!(
            result,
            Err(ApiError::RefreshFailed(RefreshError::MissingRefreshToken))
        ),
        "{:?}",
        result
    );
    assert_eq!(mock.refresh_calls(), 0);
    assert!(session.store().snapshot().await.is_empty());

    let error = wait_logged_out(&session).await;
    assert_eq!(
        error.as_deref(),
        Some(LogoutReason::MissingRefreshToken.message())
    );
}

#[tokio::test]
async fn test_refresh_session_and_gateway_share_one_refresh() {
    let mock = MockApi::spawn(MockConfig {
        refresh_delay: Duration::from_millis(300),
        ..MockConfig::default()
    })
    .await;
    let session = mock.session(CredentialStore::in_memory());
    session.store().set_tokens("T1", "R1").await;

    let (refreshed, devices) = tokio::join!(
        session.refresh_session(),
        session.api().get_json::<Value>("/dispositivos"),
    );

    refreshed.expect("refresh");
    devices.expect("dispositivos");
    assert_eq!(mock.refresh_calls(), 1);
    assert_eq!(mock.hits_for("/dispositivos")[1].authorization, bearer("T2"));
}

#[tokio::test]
async fn test_refresh_user_and_role_selection() {
    let mock = MockApi::spawn(MockConfig::default()).await;
    let session = mock.session(CredentialStore::in_memory());
    session
        .login(&LoginCredentials::new(USERNAME, PASSWORD))
        .await
        .expect("login");

    let profile = session.refresh_user().await.expect("profile");
    assert_eq!(profile.module_slugs(), vec!["dispositivos"]);

    let role = session.select_role("operario").await.expect("role granted");
    assert_eq!(role.name, "Operario");
    assert_eq!(session.selected_role().await, Some(role));
    assert_eq!(session.select_role("superuser").await, None);
}

#[tokio::test]
async fn test_password_recovery() {
    let mock = MockApi::spawn(MockConfig::default()).await;
    let session = mock.session(CredentialStore::in_memory());

    let sent = session
        .forgot_password("ana@example.com")
        .await
        .expect("forgot password");
    assert_eq!(sent.message, "Correo enviado");
    let token = sent.token.expect("reset token");

    let message = session
        .reset_password(&token, "n3w-secret")
        .await
        .expect("reset");
    assert_eq!(message, "Contraseña actualizada");

    match session.reset_password("bogus", "n3w-secret").await {
        Err(ApiError::Http { status, message }) => {
            assert_eq!(status, 400);
            assert_eq!(message, "Token inválido o expirado");
        }
        other => panic!("expected 400, got {:?}", other),
    }

    match session.forgot_password("not-an-email").await {
        Err(ApiError::Http { status, message }) => {
            assert_eq!(status, 400);
            assert_eq!(message, "email must be an email");
        }
        other => panic!("expected 400, got {:?}", other.map(|r| r.message)),
    }
    assert_eq!(mock.refresh_calls(), 0);
}

#[tokio::test]
async fn test_restore_trusts_unexpired_cache_without_network() {
    let mock = MockApi::spawn(MockConfig::default()).await;
    let dir = tempfile::tempdir().expect("tempdir");

    {
        let session = mock.session(CredentialStore::open(dir.path()).expect("store"));
        session
            .login(&LoginCredentials::new(USERNAME, PASSWORD))
            .await
            .expect("login");
    }
    let hits_after_login = mock.total_hits();

    let session = mock.session(CredentialStore::open(dir.path()).expect("store"));
    assert!(session.restore().await);
    assert!(session.is_authenticated());
    assert_eq!(
        session.user().await.map(|p| p.username),
        Some(USERNAME.to_string())
    );
    assert_eq!(mock.total_hits(), hits_after_login);
    assert_eq!(mock.refresh_calls(), 0);
}

#[tokio::test]
async fn test_restore_renews_expired_session() {
    let mock = MockApi::spawn(MockConfig {
        refresh: RefreshBehavior::Succeed {
            access_token: jwt_expiring_in(900),
            refresh_token: None,
        },
        ..MockConfig::default()
    })
    .await;
    let store = CredentialStore::in_memory();
    store.set_tokens(&jwt_expiring_in(-60), "R1").await;
    store
        .set_user_profile(&serde_json::from_value(common::profile_json()).expect("profile"))
        .await;

    let session = mock.session(store);
    assert!(session.restore().await);
    assert!(session.is_authenticated());
    assert_eq!(mock.refresh_calls(), 1);
    let left = session.store().expiry().await.expect("fresh expiry") - chrono::Utc::now();
    assert!(left.num_seconds() > 800);
}

#[tokio::test]
async fn test_restore_clears_expired_session_without_refresh_token() {
    let mock = MockApi::spawn(MockConfig::default()).await;
    let store = CredentialStore::in_memory();
    store.set_access_token(&jwt_expiring_in(-60)).await;
    store
        .set_user_profile(&serde_json::from_value(common::profile_json()).expect("profile"))
        .await;

    let session = mock.session(store);
    assert!(!session.restore().await);
    assert!(!session.is_authenticated());
    assert!(session.store().snapshot().await.is_empty());
    assert_eq!(mock.refresh_calls(), 0);
}
