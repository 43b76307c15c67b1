//! Edge cookie tier.
//!
//! A second, coarser copy of the session meant for route gating before any
//! API call is made: the access token plus role and module slugs. Each cookie
//! carries its own lifetime, so a stale jar can outlive the token it mirrors
//! and still be refused.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub const ACCESS_TOKEN_COOKIE: &str = "access_token";
pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";
pub const ROLES_COOKIE: &str = "user_roles";
pub const MODULES_COOKIE: &str = "user_modules";

/// Lifetime of the access-related cookies (token, roles, modules).
pub const ACCESS_COOKIE_DAYS: i64 = 7;

/// Lifetime of the refresh token cookie.
pub const REFRESH_COOKIE_DAYS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl Cookie {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeCookies {
    cookies: BTreeMap<String, Cookie>,
}

impl EdgeCookies {
    pub fn set(&mut self, name: &str, value: impl Into<String>, ttl: Duration, now: DateTime<Utc>) {
        self.cookies.insert(
            name.to_string(),
            Cookie {
                value: value.into(),
                expires_at: now + ttl,
            },
        );
    }

    pub fn set_access_token(&mut self, token: &str, now: DateTime<Utc>) {
        self.set(ACCESS_TOKEN_COOKIE, token, Duration::days(ACCESS_COOKIE_DAYS), now);
    }

    pub fn set_refresh_token(&mut self, token: &str, now: DateTime<Utc>) {
        self.set(REFRESH_TOKEN_COOKIE, token, Duration::days(REFRESH_COOKIE_DAYS), now);
    }

    /// Mirror role and module slugs as comma-separated lists
    pub fn set_slugs(&mut self, roles: &[&str], modules: &[&str], now: DateTime<Utc>) {
        let ttl = Duration::days(ACCESS_COOKIE_DAYS);
        self.set(ROLES_COOKIE, roles.join(","), ttl, now);
        self.set(MODULES_COOKIE, modules.join(","), ttl, now);
    }

    /// Value of a cookie that has not yet expired
    pub fn get(&self, name: &str, now: DateTime<Utc>) -> Option<&str> {
        self.cookies
            .get(name)
            .filter(|c| !c.is_expired(now))
            .map(|c| c.value.as_str())
    }

    pub fn expires_at(&self, name: &str) -> Option<DateTime<Utc>> {
        self.cookies.get(name).map(|c| c.expires_at)
    }

    fn slugs(&self, name: &str, now: DateTime<Utc>) -> Vec<&str> {
        self.get(name, now)
            .map(|v| v.split(',').filter(|s| !s.is_empty()).collect())
            .unwrap_or_default()
    }

    pub fn role_slugs(&self, now: DateTime<Utc>) -> Vec<&str> {
        self.slugs(ROLES_COOKIE, now)
    }

    pub fn module_slugs(&self, now: DateTime<Utc>) -> Vec<&str> {
        self.slugs(MODULES_COOKIE, now)
    }

    /// Route gate: a live access token and the module among the granted slugs.
    pub fn allows_module(&self, module: &str, now: DateTime<Utc>) -> bool {
        self.get(ACCESS_TOKEN_COOKIE, now).is_some()
            && self.module_slugs(now).iter().any(|m| *m == module)
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }
}
