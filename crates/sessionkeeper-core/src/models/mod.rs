//! Data models shared by the session manager and its consumers.
//!
//! - `Profile`, `Role`, `Module`: the authenticated identity
//! - Wire bodies for the `/auth/*` endpoints

pub mod auth;
pub mod profile;

pub use auth::{
    ForgotPasswordResponse, LoginCredentials, MessageResponse, RefreshResponse, TokenPair,
};
pub use profile::{Module, Profile, Role};
