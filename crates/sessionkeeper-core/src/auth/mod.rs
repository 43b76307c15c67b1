//! Authentication module: everything that keeps a session alive.
//!
//! This module provides:
//! - `CredentialStore`: tokens, cached profile and expiry, persisted in two tiers
//! - `RefreshCoordinator`: one in-flight token refresh, shared by every caller
//! - `SessionClock`: the one-second countdown that enforces expiry
//! - `SessionBus`: typed broadcast of forced logouts
//! - `Session`: the consumer-facing context tying them together
//! - `Keychain`: OS keychain for remembered login passwords
//!
//! Session expiry comes solely from the access token's `exp` claim.

pub mod claims;
pub mod clock;
pub mod cookies;
pub mod coordinator;
pub mod events;
pub mod keychain;
pub mod session;
pub mod store;

pub use claims::{decode_claims, parse_claims, Claims, DecodeError};
pub use clock::{seconds_left, ClockHandle, SessionClock, SystemClock, TimeSource};
pub use cookies::EdgeCookies;
pub use coordinator::RefreshCoordinator;
pub use events::{LogoutReason, SessionBus, SessionEvent, Subscription};
pub use keychain::Keychain;
pub use session::{Session, SessionSnapshot};
pub use store::{CredentialStore, StoredSession};
