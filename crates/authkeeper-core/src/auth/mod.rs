//! Authentication state: where tokens live and who is signed in.
//!
//! This module provides:
//! - `CredentialStore`: synchronous access/refresh token storage over a pluggable backend
//! - `SessionState`: observable, versioned session shared with the UI
//! - `SessionContext`: the paired write paths (establish, rotate, teardown)

pub mod backends;
pub mod context;
pub mod credentials;
pub mod session;

pub use backends::{CredentialBackend, EncryptedFileBackend, KeyringBackend, MemoryBackend};
pub use context::{Rotation, SessionContext, TokenPair};
pub use credentials::{
    CookieOptions, CredentialError, CredentialKind, CredentialStore, SameSite, StoredCredential,
};
pub use session::{Avatar, Session, SessionEvent, SessionPatch, SessionState, UserIdentity};
