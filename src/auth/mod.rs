//! Session and credential management.
//!
//! This module provides:
//! - `SessionManager`: the state machine mediating anonymous/authenticated
//!   transitions, with persisted-storage sync and forced-logout signaling
//! - `SessionStore`: persisted key-value storage for the token and username
//! - `CredentialStore`: OS-level password storage via keyring
//!
//! Tokens are opaque bearer credentials issued by the management API; the
//! backend signals invalidation through 401 responses.

pub mod credentials;
pub mod error;
pub mod session;
pub mod store;

pub use credentials::CredentialStore;
pub use error::AuthError;
pub use session::{
    CredentialVerifier, InitMode, Session, SessionEvent, SessionManager, SessionPhase, SharedToken,
};
pub use store::{FileStore, SessionStore, KEY_AUTH_TOKEN, KEY_USERNAME};
