//! Durable credential storage.
//!
//! `session.json` holds what the client runs on: both tokens, the cached
//! profile, the selected role and the expiry decoded from the access token.
//! `cookies.json` mirrors the edge tier. Both are rewritten under one write
//! lock, so a reader sees either the whole session or none of it.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::claims::parse_claims;
use super::cookies::EdgeCookies;
use crate::models::{Profile, Role};

/// Session file name in the data directory
const SESSION_FILE: &str = "session.json";

/// Edge cookie jar file name in the data directory
const COOKIES_FILE: &str = "cookies.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    #[serde(rename = "accessToken", default)]
    pub access_token: Option<String>,
    #[serde(rename = "refreshToken", default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub user: Option<Profile>,
    #[serde(rename = "selectedRole", default)]
    pub selected_role: Option<Role>,
    /// Absolute expiry from the access token's `exp` claim, stored as epoch ms
    #[serde(
        rename = "expiresAt",
        with = "chrono::serde::ts_milliseconds_option",
        default
    )]
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoredSession {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| now >= exp).unwrap_or(false)
    }
}

#[derive(Debug, Default)]
struct Tiers {
    session: StoredSession,
    cookies: EdgeCookies,
}

pub struct CredentialStore {
    dir: Option<PathBuf>,
    tiers: RwLock<Tiers>,
}

impl CredentialStore {
    /// A store that forgets everything when dropped
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            tiers: RwLock::new(Tiers::default()),
        }
    }

    /// Open (or create) a store persisted under `dir`.
    ///
    /// Unreadable files are logged and treated as an empty session rather
    /// than failing startup.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create data directory {}", dir.display()))?;

        let session: StoredSession = load_or_default(&dir.join(SESSION_FILE));
        let cookies: EdgeCookies = load_or_default(&dir.join(COOKIES_FILE));
        debug!(
            dir = %dir.display(),
            has_token = session.access_token.is_some(),
            "Credential store opened"
        );

        Ok(Self {
            dir: Some(dir),
            tiers: RwLock::new(Tiers { session, cookies }),
        })
    }

    // ===== Writers =====

    /// Store the access token and derive the session expiry from its `exp`.
    ///
    /// A token that cannot be decoded is still stored; the expiry just
    /// becomes unknown.
    pub async fn set_access_token(&self, token: &str) {
        let expires_at = expiry_of(token);
        let now = Utc::now();
        self.update(|tiers| {
            tiers.session.access_token = Some(token.to_string());
            tiers.session.expires_at = expires_at;
            tiers.cookies.set_access_token(token, now);
        })
        .await;
    }

    pub async fn set_refresh_token(&self, token: &str) {
        let now = Utc::now();
        self.update(|tiers| {
            tiers.session.refresh_token = Some(token.to_string());
            tiers.cookies.set_refresh_token(token, now);
        })
        .await;
    }

    /// Store a fresh token pair in one write (used by login)
    pub async fn set_tokens(&self, access_token: &str, refresh_token: &str) {
        let expires_at = expiry_of(access_token);
        let now = Utc::now();
        self.update(|tiers| {
            tiers.session.access_token = Some(access_token.to_string());
            tiers.session.refresh_token = Some(refresh_token.to_string());
            tiers.session.expires_at = expires_at;
            tiers.cookies.set_access_token(access_token, now);
            tiers.cookies.set_refresh_token(refresh_token, now);
        })
        .await;
    }

    /// Cache the profile. A selected role the profile no longer grants is dropped.
    pub async fn set_user_profile(&self, profile: &Profile) {
        let now = Utc::now();
        self.update(|tiers| {
            tiers
                .cookies
                .set_slugs(&profile.role_slugs(), &profile.module_slugs(), now);
            if let Some(ref role) = tiers.session.selected_role {
                if !profile.has_role(&role.slug) {
                    tiers.session.selected_role = None;
                }
            }
            tiers.session.user = Some(profile.clone());
        })
        .await;
    }

    pub async fn set_selected_role(&self, role: Option<Role>) {
        self.update(|tiers| tiers.session.selected_role = role).await;
    }

    /// Remove every credential, profile and expiry from both tiers at once
    pub async fn clear_all(&self) {
        let mut tiers = self.tiers.write().await;
        *tiers = Tiers::default();
        if let Some(ref dir) = self.dir {
            // Blank first: a file that then fails to delete still restores nothing
            if let Err(e) = self.persist(&tiers) {
                warn!(error = %e, "Failed to blank credential files");
            }
            for file in [SESSION_FILE, COOKIES_FILE] {
                let path = dir.join(file);
                if path.exists() {
                    if let Err(e) = std::fs::remove_file(&path) {
                        warn!(
                            error = %e,
                            path = %path.display(),
                            "Failed to remove credential file"
                        );
                    }
                }
            }
        }
        debug!("Credential store cleared");
    }

    // ===== Readers =====

    pub async fn access_token(&self) -> Option<String> {
        self.tiers.read().await.session.access_token.clone()
    }

    pub async fn refresh_token(&self) -> Option<String> {
        self.tiers.read().await.session.refresh_token.clone()
    }

    pub async fn user_profile(&self) -> Option<Profile> {
        self.tiers.read().await.session.user.clone()
    }

    pub async fn selected_role(&self) -> Option<Role> {
        self.tiers.read().await.session.selected_role.clone()
    }

    pub async fn expiry(&self) -> Option<DateTime<Utc>> {
        self.tiers.read().await.session.expires_at
    }

    /// Consistent copy of the whole durable tier
    pub async fn snapshot(&self) -> StoredSession {
        self.tiers.read().await.session.clone()
    }

    pub async fn cookies(&self) -> EdgeCookies {
        self.tiers.read().await.cookies.clone()
    }

    pub async fn allows_module(&self, module: &str) -> bool {
        self.tiers.read().await.cookies.allows_module(module, Utc::now())
    }

    // ===== Persistence =====

    async fn update(&self, mutate: impl FnOnce(&mut Tiers)) {
        let mut tiers = self.tiers.write().await;
        mutate(&mut tiers);
        if let Err(e) = self.persist(&tiers) {
            // Keep running on the in-memory copy; the next write retries
            warn!(error = %e, "Failed to persist credentials");
        }
    }

    fn persist(&self, tiers: &Tiers) -> Result<()> {
        let Some(ref dir) = self.dir else {
            return Ok(());
        };
        write_atomically(&dir.join(SESSION_FILE), &tiers.session)?;
        write_atomically(&dir.join(COOKIES_FILE), &tiers.cookies)?;
        Ok(())
    }
}

fn expiry_of(token: &str) -> Option<DateTime<Utc>> {
    match parse_claims(token) {
        Ok(claims) => claims.expires_at(),
        Err(e) => {
            debug!(error = %e, "Access token is not a decodable JWT; expiry unknown");
            None
        }
    }
}

fn load_or_default<T: Default + for<'de> Deserialize<'de>>(path: &Path) -> T {
    if !path.exists() {
        return T::default();
    }
    let parsed = std::fs::read_to_string(path)
        .context("Failed to read credential file")
        .and_then(|contents| {
            serde_json::from_str(&contents).context("Failed to parse credential file")
        });
    match parsed {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, path = %path.display(), "Ignoring unreadable credential file");
            T::default()
        }
    }
}

/// Write to a sibling temp file and rename over the target
fn write_atomically<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let contents = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, contents)
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}
