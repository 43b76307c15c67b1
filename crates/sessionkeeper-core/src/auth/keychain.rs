//! Remembered login passwords in the OS keychain.
//!
//! Only the password typed at login is kept here (for `login --remember`).
//! Tokens live in the credential store, never in the keychain.

use anyhow::{Context, Result};
use keyring::Entry;
use tracing::warn;

const SERVICE_NAME: &str = "sessionkeeper";

pub struct Keychain {
    service: String,
}

impl Keychain {
    pub fn new() -> Self {
        Self {
            service: SERVICE_NAME.to_string(),
        }
    }

    fn entry(&self, username: &str) -> Result<Entry> {
        Entry::new(&self.service, username).context("Failed to create keyring entry")
    }

    /// Store the password for a username
    pub fn remember(&self, username: &str, password: &str) -> Result<()> {
        self.entry(username)?
            .set_password(password)
            .context("Failed to store password in keychain")
    }

    /// The remembered password, if any. Keychain failures are logged, not raised,
    /// since the caller can always prompt instead.
    pub fn recall(&self, username: &str) -> Option<String> {
        let entry = match self.entry(username) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Keychain unavailable");
                return None;
            }
        };
        match entry.get_password() {
            Ok(password) => Some(password),
            Err(keyring::Error::NoEntry) => None,
            Err(e) => {
                warn!(error = %e, "Failed to read password from keychain");
                None
            }
        }
    }

    /// Delete the remembered password. Forgetting an unknown user is not an error.
    pub fn forget(&self, username: &str) -> Result<()> {
        match self.entry(username)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete credential from keychain"),
        }
    }
}

impl Default for Keychain {
    fn default() -> Self {
        Self::new()
    }
}
