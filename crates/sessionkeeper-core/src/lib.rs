//! sessionkeeper-core: session lifecycle management for a REST API client.
//!
//! Acquires tokens, renews them under concurrent load with a single
//! in-flight refresh, tracks their remaining lifetime, and tells every
//! consumer when the session is forcibly ended.
//!
//! ```no_run
//! use sessionkeeper_core::{Config, CredentialStore, LoginCredentials, Session};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let store = CredentialStore::open(config.data_dir()?)?;
//! let session = Session::new(&config, store)?;
//! if !session.restore().await {
//!     session.login(&LoginCredentials::new("ana", "secret")).await?;
//! }
//! let devices: serde_json::Value = session.api().get_json("/dispositivos").await?;
//! # let _ = devices;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod utils;

pub use api::{ApiClient, ApiError, ApiRequest, RefreshError};
pub use auth::{
    decode_claims, CredentialStore, Keychain, LogoutReason, RefreshCoordinator, Session,
    SessionBus, SessionEvent, SessionSnapshot,
};
pub use config::Config;
pub use models::{LoginCredentials, Profile, Role};
